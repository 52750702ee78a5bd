//! Acts and their encounters.

use super::ids::{ActId, CampaignId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncounterImportance {
    /// Must happen for the act to resolve.
    Mandatory,
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub description: String,
    pub importance: EncounterImportance,
}

impl Encounter {
    pub fn new(description: impl Into<String>, importance: EncounterImportance) -> Self {
        Self {
            description: description.into(),
            importance,
        }
    }
}

/// A numbered story segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Act {
    pub id: ActId,
    pub campaign_id: CampaignId,
    /// 1-based and contiguous within a campaign.
    pub number: u32,
    pub name: String,
    pub description: String,
    pub resolution_criteria: String,
    pub encounters: Vec<Encounter>,
}

impl Act {
    pub fn new(campaign_id: CampaignId, number: u32, name: impl Into<String>) -> Self {
        Self {
            id: ActId::new(),
            campaign_id,
            number,
            name: name.into(),
            description: String::new(),
            resolution_criteria: String::new(),
            encounters: Vec::new(),
        }
    }

    pub fn count_encounters(&self, importance: EncounterImportance) -> usize {
        self.encounters
            .iter()
            .filter(|e| e.importance == importance)
            .count()
    }

    /// Encounters as a bulleted list, mandatory ones first.
    pub fn render_encounters(&self) -> String {
        let mut lines = Vec::with_capacity(self.encounters.len());
        for importance in [EncounterImportance::Mandatory, EncounterImportance::Optional] {
            let label = match importance {
                EncounterImportance::Mandatory => "required",
                EncounterImportance::Optional => "optional",
            };
            for encounter in self.encounters.iter().filter(|e| e.importance == importance) {
                lines.push(format!("- ({label}) {}", encounter.description));
            }
        }
        lines.join("\n")
    }
}
