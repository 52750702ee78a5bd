//! Campaign data model.
//!
//! The campaign is the aggregate root. Players, entities, acts and messages
//! reference it by id and are stored independently.

pub mod act;
pub mod campaign;
pub mod entity;
pub mod ids;
pub mod message;
pub mod player;

pub use act::{Act, Encounter, EncounterImportance};
pub use campaign::{Campaign, CampaignStatus, SpeakingLease, StatusRegression};
pub use entity::{normalize_name, Entity, EntityClassification, EntityDelta, EntityType};
pub use ids::{ActId, CampaignId, EntityId, LeaseOwner, MessageId, PlayerId};
pub use message::{Message, GAME_MASTER};
pub use player::{AbilityScores, CharacterSheet, PlayerCharacter, SheetError};
