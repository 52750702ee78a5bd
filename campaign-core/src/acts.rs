//! Act planning.

use crate::context::{CampaignScope, ContextAssembler, ContextDepth};
use crate::error::{EngineError, StepExt};
use crate::generation::outputs::{ActDraft, StructuredActs, StoryImportance};
use crate::generation::{GenerationClient, SystemRole};
use crate::model::{Act, CampaignId};
use crate::repository::Repository;
use std::sync::Arc;
use tracing::info;

/// Minimum encounters of each importance per act.
pub const MIN_ENCOUNTERS_PER_IMPORTANCE: usize = 3;

/// Generates the acts of a campaign from its outline.
#[derive(Clone)]
pub struct ActPlanner {
    repository: Arc<dyn Repository>,
    generation: GenerationClient,
    context: ContextAssembler,
}

impl ActPlanner {
    pub fn new(
        repository: Arc<dyn Repository>,
        generation: GenerationClient,
        context: ContextAssembler,
    ) -> Self {
        Self {
            repository,
            generation,
            context,
        }
    }

    /// Write `count` acts as prose, structure them, and store them as one
    /// batch numbered `1..=count`. Nothing is stored if structuring fails.
    ///
    /// Works from the basic context, so the campaign must have an outline.
    pub async fn plan_acts(
        &self,
        scope: &CampaignScope,
        count: u32,
    ) -> Result<Vec<Act>, EngineError> {
        let campaign_id = scope.id();
        if scope.campaign.outline.as_deref().map_or(true, |o| o.trim().is_empty()) {
            return Err(EngineError::invalid_state(
                scope.campaign.status,
                "plan acts without an outline",
            ));
        }
        let context = self.context.assemble(scope, ContextDepth::Basic).await?;

        info!(%campaign_id, count, "generating acts");
        let acts_text = self
            .generation
            .text(
                SystemRole::GameDesigner,
                context.prompt(&format!(
                    "Come up with {count} different acts for the campaign outlined above. \
                     Each act needs an explanation of its resolution, which will later decide \
                     whether we are ready to move on to the next act.\n\n\
                     The first act should not be too dangerous, to ease the players into the story."
                )),
            )
            .await
            .step("campaign acts")?;

        info!(%campaign_id, "structuring acts");
        let expected = count as usize;
        let structured: StructuredActs = self
            .generation
            .structured_checked(
                SystemRole::GameDesigner,
                context.clone().with("acts", acts_text).prompt(&format!(
                    "Record these {count} acts. Give every act at least \
                     {MIN_ENCOUNTERS_PER_IMPORTANCE} MANDATORY encounters that must happen for \
                     the act to resolve and at least {MIN_ENCOUNTERS_PER_IMPORTANCE} OPTIONAL \
                     encounters the players may run into. Fill in encounters from the outline \
                     where the acts text does not name enough."
                )),
                |acts: &StructuredActs| check_acts(acts, expected),
            )
            .await
            .step("campaign acts")?;

        let mut drafts = structured.acts;
        drafts.sort_by_key(|d| d.number);
        let acts: Vec<Act> = drafts
            .into_iter()
            .zip(1..)
            .map(|(draft, number)| into_act(campaign_id, number, draft))
            .collect();

        self.repository.replace_acts(campaign_id, acts.clone()).await?;
        info!(%campaign_id, count = acts.len(), "acts stored");
        Ok(acts)
    }
}

fn check_acts(acts: &StructuredActs, expected: usize) -> Result<(), String> {
    if acts.acts.len() != expected {
        return Err(format!("expected {expected} acts, got {}", acts.acts.len()));
    }
    for act in &acts.acts {
        let mandatory = act
            .encounters
            .iter()
            .filter(|e| e.story_importance == StoryImportance::Mandatory)
            .count();
        let optional = act.encounters.len() - mandatory;
        if mandatory < MIN_ENCOUNTERS_PER_IMPORTANCE || optional < MIN_ENCOUNTERS_PER_IMPORTANCE {
            return Err(format!(
                "act '{}' has {mandatory} mandatory and {optional} optional encounters",
                act.name
            ));
        }
    }
    Ok(())
}

fn into_act(campaign_id: CampaignId, number: u32, draft: ActDraft) -> Act {
    let mut act = Act::new(campaign_id, number, draft.name.trim());
    act.description = draft.description;
    act.resolution_criteria = draft.resolution;
    act.encounters = draft.encounters.into_iter().map(Into::into).collect();
    act
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::outputs::EncounterDraft;

    fn draft(number: u32, mandatory: usize, optional: usize) -> ActDraft {
        let encounter = |importance| EncounterDraft {
            encounter_description: "something happens".into(),
            story_importance: importance,
        };
        let mut encounters = Vec::new();
        encounters.extend((0..mandatory).map(|_| encounter(StoryImportance::Mandatory)));
        encounters.extend((0..optional).map(|_| encounter(StoryImportance::Optional)));
        ActDraft {
            number,
            name: format!("Act {number}"),
            description: "desc".into(),
            resolution: "res".into(),
            encounters,
        }
    }

    #[test]
    fn test_check_acts() {
        let good = StructuredActs {
            acts: vec![draft(1, 3, 3), draft(2, 4, 3)],
        };
        assert!(check_acts(&good, 2).is_ok());
        assert!(check_acts(&good, 3).unwrap_err().contains("expected 3 acts"));

        let thin = StructuredActs {
            acts: vec![draft(1, 3, 2)],
        };
        assert!(check_acts(&thin, 1).unwrap_err().contains("2 optional"));
    }

    #[test]
    fn test_into_act_maps_encounters() {
        let act = into_act(CampaignId::new(), 2, draft(7, 3, 3));
        assert_eq!(act.number, 2);
        assert_eq!(act.encounters.len(), 6);
        assert_eq!(act.resolution_criteria, "res");
    }
}
