//! Layered prompt context.
//!
//! Every generation call is framed by one of two context depths:
//!
//! - [`ContextDepth::Basic`]: campaign outline and current act. Used for
//!   content design.
//! - [`ContextDepth::Located`]: basic plus the current location and the
//!   recent campaign log. Used for anything players will read.
//!
//! The log is rendered from message summaries only, never full text.

use crate::error::EngineError;
use crate::model::{Campaign, CampaignId, PlayerCharacter};
use crate::repository::{RepoResult, Repository};
use std::fmt::Write as _;
use std::sync::Arc;

pub const OUTLINE: &str = "campaign outline";
pub const ACT_DESCRIPTION: &str = "current act description";
pub const ACT_RESOLUTION: &str = "current act resolution";
pub const ACT_ENCOUNTERS: &str = "current act encounters";
pub const LOCATION: &str = "current location";
pub const RECENT_LOG: &str = "recent campaign log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDepth {
    Basic,
    Located,
}

/// Ordered, labelled context sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    sections: Vec<(String, String)>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section. Blank bodies are skipped.
    pub fn push(&mut self, label: impl Into<String>, body: impl Into<String>) {
        let body = body.into();
        if body.trim().is_empty() {
            return;
        }
        self.sections.push((label.into(), body.trim().to_string()));
    }

    pub fn with(mut self, label: impl Into<String>, body: impl Into<String>) -> Self {
        self.push(label, body);
        self
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, body)| body.as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(label, _)| label.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Render as a `<context>` block of `<label>` sections.
    pub fn render(&self) -> String {
        let mut out = String::from("<context>\n");
        for (label, body) in &self.sections {
            let _ = write!(out, "<{label}>\n{body}\n</{label}>\n");
        }
        out.push_str("</context>");
        out
    }

    /// The context followed by an instruction.
    pub fn prompt(&self, instruction: &str) -> String {
        format!("{}\n\n{}", self.render(), instruction.trim())
    }
}

/// Campaign state loaded once per logical operation.
///
/// Components receive the scope explicitly instead of reading shared state,
/// and it is dropped when the operation ends.
#[derive(Debug, Clone)]
pub struct CampaignScope {
    pub campaign: Campaign,
    pub players: Vec<PlayerCharacter>,
}

impl CampaignScope {
    pub async fn load(repository: &dyn Repository, id: CampaignId) -> Result<Self, EngineError> {
        let campaign = repository.get_campaign(id).await?;
        let players = repository.list_players(id).await?;
        Ok(Self { campaign, players })
    }

    pub fn id(&self) -> CampaignId {
        self.campaign.id
    }
}

/// Builds [`PromptContext`]s from stored campaign state.
#[derive(Clone)]
pub struct ContextAssembler {
    repository: Arc<dyn Repository>,
    recent_log_limit: usize,
}

impl ContextAssembler {
    pub fn new(repository: Arc<dyn Repository>, recent_log_limit: usize) -> Self {
        Self {
            repository,
            recent_log_limit,
        }
    }

    pub async fn assemble(
        &self,
        scope: &CampaignScope,
        depth: ContextDepth,
    ) -> RepoResult<PromptContext> {
        let campaign = &scope.campaign;
        let mut context = PromptContext::new();

        if let Some(outline) = &campaign.outline {
            context.push(OUTLINE, outline.as_str());
        }
        if let Some(number) = campaign.current_act {
            if let Some(act) = self.repository.get_act(campaign.id, number).await? {
                context.push(ACT_DESCRIPTION, format!("Act {}: {}\n{}", act.number, act.name, act.description));
                context.push(ACT_RESOLUTION, act.resolution_criteria.as_str());
                context.push(ACT_ENCOUNTERS, act.render_encounters());
            }
        }

        if depth == ContextDepth::Basic {
            return Ok(context);
        }

        if let Some(location_id) = campaign.current_location_id {
            let location = self.repository.get_entity(location_id).await?;
            context.push(
                LOCATION,
                format!("{}\n{}", location.name, location.full_information),
            );
        }

        let log = self
            .repository
            .recent_messages(campaign.id, self.recent_log_limit)
            .await?;
        let rendered = log
            .iter()
            .enumerate()
            .map(|(i, message)| format!("{}. {}", i + 1, message.summary.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        context.push(RECENT_LOG, rendered);

        Ok(context)
    }
}
