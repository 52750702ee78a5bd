//! Testing utilities for the campaign engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedGenerator` for deterministic generation without API calls
//! - `TestHarness` for seeding campaigns and scripting whole setups
//! - Assertion helpers for verifying campaign state

use crate::config::EngineConfig;
use crate::engine::CampaignEngine;
use crate::generation::{Completion, GenerationError, GenerationRequest, GenerationService, SystemRole};
use crate::model::{
    Act, Campaign, CampaignId, CampaignStatus, CharacterSheet, Encounter, EncounterImportance,
    Entity, EntityType, Message, PlayerCharacter,
};
use crate::repository::{InMemoryRepository, Repository, RepositorySnapshot};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Outline returned by [`TestHarness::script_setup`].
pub const OUTLINE: &str = "Thieves plan to rob the vault of a floating city during the eclipse festival.";
/// Name of the starting location in [`TestHarness::script_setup`].
pub const START_LOCATION: &str = "The Sky Dock";
pub const START_LOCATION_FULL: &str =
    "A windswept landing platform. Dockmaster Quill takes bribes from the thieves' guild.";
pub const START_LOCATION_KNOWN: &str = "A windswept landing platform.";
/// NPC speaking in the scripted opening.
pub const OPENING_NPC: &str = "Dockmaster Quill";

/// What a matched rule replies with.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Json(Value),
    Fail(GenerationError),
}

/// A scripted reply and the requests it answers.
#[derive(Debug, Clone)]
pub struct Rule {
    role: Option<SystemRole>,
    schema: Option<String>,
    needle: Option<String>,
    reply: ScriptedReply,
    /// `None` repeats forever.
    remaining: Option<usize>,
}

impl Rule {
    pub fn text(text: impl Into<String>) -> Self {
        Self::reply(ScriptedReply::Text(text.into()))
    }

    pub fn json(value: Value) -> Self {
        Self::reply(ScriptedReply::Json(value))
    }

    pub fn fail(error: GenerationError) -> Self {
        Self::reply(ScriptedReply::Fail(error))
    }

    fn reply(reply: ScriptedReply) -> Self {
        Self {
            role: None,
            schema: None,
            needle: None,
            reply,
            remaining: None,
        }
    }

    /// Only answer structured requests for this schema name.
    pub fn for_schema(mut self, name: impl Into<String>) -> Self {
        self.schema = Some(name.into());
        self
    }

    pub fn for_role(mut self, role: SystemRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Only answer prompts containing `needle`.
    pub fn containing(mut self, needle: impl Into<String>) -> Self {
        self.needle = Some(needle.into());
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    fn matches(&self, request: &GenerationRequest) -> bool {
        if self.remaining == Some(0) {
            return false;
        }
        match self.role {
            Some(role) if role != request.role => return false,
            None if request.role == SystemRole::Summarizer => return false,
            _ => {}
        }
        match (&self.schema, &request.output) {
            (Some(name), Some(output)) if *name == output.name => {}
            (Some(_), _) => return false,
            _ => {}
        }
        if let Some(needle) = &self.needle {
            if !request.prompt.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A [`GenerationService`] that answers from scripted rules.
///
/// Rules are tried in the order they were added; the first match answers.
/// Summarizer requests only match rules scoped with
/// [`Rule::for_role`]; unmatched ones get an automatic summary. Anything
/// else unmatched fails as unavailable.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, rule: Rule) -> &Self {
        self.lock_rules().push(rule);
        self
    }

    /// Put a rule ahead of every existing one.
    pub fn push_front(&self, rule: Rule) -> &Self {
        self.lock_rules().insert(0, rule);
        self
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.lock_calls().clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    /// Number of structured requests for `schema`.
    pub fn schema_calls(&self, schema: &str) -> usize {
        self.lock_calls()
            .iter()
            .filter(|r| r.output.as_ref().is_some_and(|o| o.name == schema))
            .count()
    }

    /// Number of requests whose prompt contains `needle`.
    pub fn prompt_calls(&self, needle: &str) -> usize {
        self.lock_calls()
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }

    fn lock_rules(&self) -> std::sync::MutexGuard<'_, Vec<Rule>> {
        self.rules.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<GenerationRequest>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, request: &GenerationRequest) -> Option<ScriptedReply> {
        let mut rules = self.lock_rules();
        let rule = rules.iter_mut().find(|r| r.matches(request))?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.reply.clone())
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn complete(&self, request: GenerationRequest) -> Result<Completion, GenerationError> {
        self.lock_calls().push(request.clone());

        match self.next_reply(&request) {
            Some(ScriptedReply::Text(text)) => Ok(Completion::Text(text)),
            Some(ScriptedReply::Json(value)) => Ok(Completion::Structured(value)),
            Some(ScriptedReply::Fail(err)) => Err(err),
            None if request.role == SystemRole::Summarizer => {
                Ok(Completion::Text(auto_summary(&request.prompt)))
            }
            None => Err(GenerationError::Unavailable(format!(
                "no scripted reply for {} request{}",
                request.role.name(),
                request
                    .output
                    .as_ref()
                    .map(|o| format!(" with schema {}", o.name))
                    .unwrap_or_default()
            ))),
        }
    }
}

fn auto_summary(prompt: &str) -> String {
    let body = prompt
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or(prompt)
        .trim()
        .trim_matches('"');
    let short: String = body.chars().take(80).collect();
    format!("summary: {short}")
}

/// Acts that pass structuring: three mandatory and three optional
/// encounters each, numbered from `first`.
pub fn acts_fixture(count: u32, first: u32) -> Value {
    let acts: Vec<Value> = (0..count)
        .map(|i| {
            let number = first + i;
            let mut encounters = Vec::new();
            for (importance, label) in [("MANDATORY", "required"), ("OPTIONAL", "side")] {
                for n in 1..=3 {
                    encounters.push(json!({
                        "encounter_description": format!("Act {number} {label} encounter {n}"),
                        "story_importance": importance,
                    }));
                }
            }
            json!({
                "number": number,
                "name": format!("Act {number}"),
                "description": format!("Events of act {number}."),
                "resolution": format!("Act {number} ends when the crew escapes."),
                "encounters": encounters,
            })
        })
        .collect();
    json!({ "acts": acts })
}

/// Test harness wiring an engine to an in-memory repository and a
/// scripted generator.
pub struct TestHarness {
    pub generator: Arc<ScriptedGenerator>,
    pub repository: Arc<InMemoryRepository>,
    pub engine: CampaignEngine,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_repository(InMemoryRepository::new(), config)
    }

    /// Start from previously saved state, e.g. a snapshot that predates
    /// name uniqueness checks.
    pub fn from_snapshot(snapshot: RepositorySnapshot) -> Self {
        Self::with_repository(InMemoryRepository::from_snapshot(snapshot), EngineConfig::default())
    }

    fn with_repository(repository: InMemoryRepository, config: EngineConfig) -> Self {
        let generator = Arc::new(ScriptedGenerator::new());
        let repository = Arc::new(repository);
        let engine = CampaignEngine::new(repository.clone(), generator.clone(), config);
        Self {
            generator,
            repository,
            engine,
        }
    }

    /// Add a rule to the generator.
    pub fn expect(&self, rule: Rule) -> &Self {
        self.generator.push(rule);
        self
    }

    /// Create a campaign, add one player per name and mark players added.
    pub async fn campaign_with_players(&self, names: &[&str]) -> (CampaignId, Vec<PlayerCharacter>) {
        let campaign = self.engine.create_campaign("Test Campaign").await.unwrap();
        let mut players = Vec::new();
        for name in names {
            let sheet = CharacterSheet::new(*name, "Rogue", "Human", "Urchin");
            players.push(self.engine.add_player(campaign.id, sheet).await.unwrap());
        }
        self.engine.mark_players_added(campaign.id).await.unwrap();
        (campaign.id, players)
    }

    /// Seed a running campaign directly, without generation: outline, one
    /// act, and the players placed at a known starting location.
    pub async fn running_campaign(&self, names: &[&str]) -> (CampaignId, Vec<PlayerCharacter>) {
        let (id, _) = self.campaign_with_players(names).await;

        let mut act = Act::new(id, 1, "Arrival");
        act.description = "The crew lands on the floating city.".into();
        act.resolution_criteria = "The crew meets their fixer.".into();
        act.encounters = vec![Encounter::new("Customs inspection", EncounterImportance::Mandatory)];
        self.repository.replace_acts(id, vec![act]).await.unwrap();

        let dock = Entity::new(id, START_LOCATION, EntityType::Location)
            .with_information(START_LOCATION_FULL, START_LOCATION_KNOWN)
            .with_known_to_player(true);
        let dock_id = dock.id;
        self.repository.insert_entity(dock).await.unwrap();
        self.repository.set_players_location(id, dock_id).await.unwrap();

        let mut campaign = self.campaign(id).await;
        campaign.outline = Some(OUTLINE.to_string());
        campaign.current_act = Some(1);
        campaign.current_location_id = Some(dock_id);
        campaign.advance_to(CampaignStatus::Running).unwrap();
        self.repository.save_campaign(&campaign).await.unwrap();

        (id, self.repository.list_players(id).await.unwrap())
    }

    /// Script every generation call `generate_campaign` makes.
    pub fn script_setup(&self, act_count: u32) -> &Self {
        self.expect(Rule::text(format!("Draft: {OUTLINE}")).containing("Give me an outline"))
            .expect(Rule::text(OUTLINE).containing("Here is an outline"))
            .expect(Rule::text("Act one is a gentle arrival; later acts escalate.").containing("different acts"))
            .expect(Rule::json(acts_fixture(act_count, 1)).for_schema("record_acts"))
            .expect(Rule::json(json!({ "name": START_LOCATION })).for_schema("starting_location"))
            .expect(Rule::text(START_LOCATION_FULL).containing("Give me background content for LOCATION"))
            .expect(Rule::text(START_LOCATION_KNOWN).containing("what would the player characters know"))
            .expect(Rule::text("Open with the wind, then let the dockmaster greet them.").containing("directions for introducing"))
            .expect(
                Rule::json(json!({
                    "messages": [
                        { "speaker": "Game Master", "message": "Wind whips across the dock." },
                        { "speaker": OPENING_NPC, "message": "Papers, please. Or coin." }
                    ]
                }))
                .for_schema("opening_messages"),
            )
    }

    pub async fn campaign(&self, id: CampaignId) -> Campaign {
        self.repository.get_campaign(id).await.unwrap()
    }

    pub async fn entities(&self, id: CampaignId) -> Vec<Entity> {
        self.repository.list_entities(id, None).await.unwrap()
    }

    pub async fn messages(&self, id: CampaignId) -> Vec<Message> {
        self.repository.recent_messages(id, usize::MAX).await.unwrap()
    }

    pub async fn acts(&self, id: CampaignId) -> Vec<Act> {
        self.repository.list_acts(id).await.unwrap()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

#[track_caller]
pub fn assert_status(campaign: &Campaign, status: CampaignStatus) {
    assert_eq!(
        campaign.status, status,
        "Expected campaign status {status}, got {}",
        campaign.status
    );
}

/// Assert nobody holds a live speaking lease.
#[track_caller]
pub fn assert_not_speaking(campaign: &Campaign) {
    let now = chrono::Utc::now();
    assert!(
        campaign.speaking_flag(now).is_none(),
        "Expected no speaking flag, found {:?}",
        campaign.speaking_flag(now)
    );
}

#[track_caller]
pub fn assert_has_entity(entities: &[Entity], name: &str) {
    assert!(
        entities.iter().any(|e| e.matches_name(name)),
        "Expected entity '{name}' to exist"
    );
}

#[track_caller]
pub fn assert_no_entity(entities: &[Entity], name: &str) {
    assert!(
        !entities.iter().any(|e| e.matches_name(name)),
        "Expected entity '{name}' to NOT exist"
    );
}

/// Assert acts are numbered exactly `1..=count`.
#[track_caller]
pub fn assert_act_numbers(acts: &[Act], count: u32) {
    let numbers: Vec<u32> = acts.iter().map(|a| a.number).collect();
    let expected: Vec<u32> = (1..=count).collect();
    assert_eq!(numbers, expected, "Expected acts numbered 1..={count}");
}

/// Assert every sentence of the known information appears in the full
/// information. Meaningful with fixture text, where subsets are literal.
#[track_caller]
pub fn assert_knowledge_subset(entity: &Entity) {
    assert!(
        entity.knowledge_is_consistent(),
        "Entity '{}' has known information but no full information",
        entity.name
    );
    let full = entity.full_information.to_lowercase();
    for sentence in entity
        .known_information
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        assert!(
            full.contains(&sentence.to_lowercase()),
            "Entity '{}' known information claims '{sentence}', absent from full information",
            entity.name
        );
    }
}
