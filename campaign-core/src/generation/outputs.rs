//! Typed results of every structured generation call.
//!
//! Doc comments on these types end up in the JSON schema the model sees, so
//! they are written as instructions.

use crate::model::{
    Encounter, EncounterImportance, EntityClassification, EntityDelta, EntityId, EntityType,
};
use campaign_macros::OutputSchema;
use serde::{Deserialize, Serialize};

/// What a player message is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, OutputSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageIntent {
    /// Asking the Game Master for information.
    GmRequestInfo,
    /// Talking to or asking something of an NPC.
    NpcRequestInfo,
    /// Doing something in the world.
    PerformAction,
}

impl MessageIntent {
    pub fn name(&self) -> &'static str {
        match self {
            MessageIntent::GmRequestInfo => "GM_REQUEST_INFO",
            MessageIntent::NpcRequestInfo => "NPC_REQUEST_INFO",
            MessageIntent::PerformAction => "PERFORM_ACTION",
        }
    }
}

/// Classify the most recent player message
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "classify_message")]
pub struct MessageClassification {
    /// GM_REQUEST_INFO when the player asks the Game Master a question, NPC_REQUEST_INFO when the player addresses an NPC, PERFORM_ACTION when the player character acts
    pub intent: MessageIntent,
}

/// Judge whether a player's question to the Game Master can be answered
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "judge_question")]
pub struct QuestionJudgement {
    /// True if the question is something the player characters could reasonably find out right now
    pub is_reasonable: bool,
    /// Short explanation of the judgement
    pub justification: Option<String>,
    /// Names of every location, NPC, group or object the question is about
    pub entities: Vec<String>,
}

/// Decide whether a referenced name is one of the known entities
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "match_entity")]
pub struct EntityMatch {
    /// True if exactly one known entity is the thing being referenced
    pub found_match: bool,
    /// Exact name of the matched entity, copied from the list
    pub matched_entity: Option<String>,
    /// True if more than one known entity could be the thing being referenced
    #[serde(default)]
    #[schema(optional)]
    pub ambiguous: bool,
}

/// Kind of thing a name refers to, OTHER if it is none of the listed kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, OutputSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Location,
    Npc,
    Group,
    Object,
    Other,
}

impl From<EntityKind> for EntityClassification {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Location => EntityClassification::Typed(EntityType::Location),
            EntityKind::Npc => EntityClassification::Typed(EntityType::Npc),
            EntityKind::Group => EntityClassification::Typed(EntityType::Group),
            EntityKind::Object => EntityClassification::Typed(EntityType::Object),
            EntityKind::Other => EntityClassification::Discarded,
        }
    }
}

/// Classify a named thing from the campaign
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "classify_entity")]
pub struct EntityKindAnswer {
    /// LOCATION, NPC, GROUP, OBJECT, or OTHER if it is none of these
    pub entity_type: EntityKind,
}

/// Name the location where the campaign begins
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "starting_location")]
pub struct LocationName {
    /// Proper name of a single place, not a region or a building with many rooms
    pub name: String,
}

/// How important an encounter is to the act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, OutputSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoryImportance {
    Mandatory,
    Optional,
}

impl From<StoryImportance> for EncounterImportance {
    fn from(importance: StoryImportance) -> Self {
        match importance {
            StoryImportance::Mandatory => EncounterImportance::Mandatory,
            StoryImportance::Optional => EncounterImportance::Optional,
        }
    }
}

/// An anticipated encounter
#[derive(Debug, Clone, Deserialize, OutputSchema)]
pub struct EncounterDraft {
    /// What happens in the encounter
    pub encounter_description: String,
    /// MANDATORY if the act cannot resolve without it, otherwise OPTIONAL
    pub story_importance: StoryImportance,
}

impl From<EncounterDraft> for Encounter {
    fn from(draft: EncounterDraft) -> Self {
        Encounter::new(draft.encounter_description, draft.story_importance.into())
    }
}

/// A single act of the campaign
#[derive(Debug, Clone, Deserialize, OutputSchema)]
pub struct ActDraft {
    /// Position of the act, starting at 1
    pub number: u32,
    pub name: String,
    /// What happens during the act
    pub description: String,
    /// What must be true for the act to be resolved
    pub resolution: String,
    /// At least 3 MANDATORY and at least 3 OPTIONAL encounters
    pub encounters: Vec<EncounterDraft>,
}

/// Record the acts of the campaign
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "record_acts")]
pub struct StructuredActs {
    /// Every act, in order
    pub acts: Vec<ActDraft>,
}

/// A line of dialogue
#[derive(Debug, Clone, Deserialize, OutputSchema)]
pub struct OpeningLine {
    /// "Game Master" or the name of the NPC speaking
    pub speaker: String,
    /// What is said
    pub message: String,
}

/// Write the messages that open the campaign
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "opening_messages")]
pub struct OpeningMessages {
    /// At least two messages, at least one spoken by an NPC
    pub messages: Vec<OpeningLine>,
}

/// A new or changed entity
#[derive(Debug, Clone, Deserialize, OutputSchema)]
pub struct EntityUpdate {
    /// Id of the existing entity, omitted for a new one
    pub id: Option<String>,
    /// Name of the entity, required for a new one
    pub name: Option<String>,
    /// Kind of the entity, required for a new one
    pub entity_type: Option<EntityKind>,
    /// Additional names the entity is known by
    pub updated_aliases: Option<Vec<String>>,
    /// Complete updated Game Master information
    pub updated_full_information: Option<String>,
    /// Complete updated information the players know
    pub updated_known_information: Option<String>,
    /// Whether the players have encountered the entity
    pub known_to_players: Option<bool>,
}

impl EntityUpdate {
    /// Convert to a delta. `None` when the update names an unparseable id or
    /// a kind outside the tracked set.
    pub fn into_delta(self) -> Option<EntityDelta> {
        let id = match self.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<EntityId>().ok()?),
            None => None,
        };
        let entity_type = match self.entity_type {
            Some(kind) => Some(EntityClassification::from(kind).entity_type()?),
            None => None,
        };
        Some(EntityDelta {
            id,
            name: self.name,
            entity_type,
            aliases: self.updated_aliases,
            full_information: self.updated_full_information,
            known_information: self.updated_known_information,
            known_to_player: self.known_to_players,
        })
    }
}

/// Register or update entities mentioned in the campaign log
#[derive(Debug, Clone, Deserialize, OutputSchema)]
#[schema(name = "update_entities")]
pub struct EntityUpdates {
    pub entities: Vec<EntityUpdate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use claude::OutputSchema;

    #[test]
    fn test_intent_schema_uses_wire_names() {
        let schema = MessageClassification::schema();
        assert_eq!(
            schema["properties"]["intent"]["enum"],
            serde_json::json!(["GM_REQUEST_INFO", "NPC_REQUEST_INFO", "PERFORM_ACTION"])
        );
        assert_eq!(MessageClassification::schema_name(), "classify_message");
    }

    #[test]
    fn test_optional_fields_not_required() {
        let schema = EntityMatch::schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required, &vec![serde_json::json!("found_match")]);
    }

    #[test]
    fn test_nested_act_schema() {
        let schema = StructuredActs::schema();
        let encounter = &schema["properties"]["acts"]["items"]["properties"]["encounters"]["items"];
        assert_eq!(
            encounter["properties"]["story_importance"]["enum"],
            serde_json::json!(["MANDATORY", "OPTIONAL"])
        );
    }

    #[test]
    fn test_other_kind_is_discarded() {
        assert_eq!(
            EntityClassification::from(EntityKind::Other),
            EntityClassification::Discarded
        );
        assert_eq!(
            EntityClassification::from(EntityKind::Npc).entity_type(),
            Some(EntityType::Npc)
        );
    }

    #[test]
    fn test_entity_update_into_delta() {
        let id = EntityId::new();
        let update: EntityUpdate = serde_json::from_value(serde_json::json!({
            "id": id.to_string(),
            "updated_known_information": "A quiet harbor.",
        }))
        .unwrap();
        let delta = update.into_delta().unwrap();
        assert_eq!(delta.id, Some(id));
        assert_eq!(delta.known_information.as_deref(), Some("A quiet harbor."));
        assert!(delta.name.is_none());

        let bad: EntityUpdate =
            serde_json::from_value(serde_json::json!({"id": "nope", "name": "X"})).unwrap();
        assert!(bad.into_delta().is_none());

        let other: EntityUpdate =
            serde_json::from_value(serde_json::json!({"name": "Fog", "entity_type": "OTHER"}))
                .unwrap();
        assert!(other.into_delta().is_none());
    }
}
