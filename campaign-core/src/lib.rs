//! Procedural tabletop campaign engine driven by a text-generation service.
//!
//! This crate provides:
//! - A campaign lifecycle from player sheets to a running game
//! - Act planning with structured, validated generation
//! - Lazily generated world entities with separate ground truth and player knowledge
//! - Player message routing under a speaking lease
//! - A pluggable repository with an in-memory implementation and JSON snapshots
//!
//! # Quick Start
//!
//! ```ignore
//! use campaign_core::{CampaignEngine, CharacterSheet, ClaudeGenerator, EngineConfig, InMemoryRepository};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load("campaign.toml")?;
//!     let generator = ClaudeGenerator::from_env(config.generation.clone())?;
//!     let engine = CampaignEngine::new(Arc::new(InMemoryRepository::new()), Arc::new(generator), config);
//!
//!     let campaign = engine.create_campaign("Eclipse Heist").await?;
//!     let mira = engine
//!         .add_player(campaign.id, CharacterSheet::new("Mira", "Rogue", "Elf", "Urchin"))
//!         .await?;
//!     engine.mark_players_added(campaign.id).await?;
//!     engine.generate_campaign(campaign.id, "a heist in a floating city").await?;
//!
//!     let outcome = engine
//!         .submit_player_message(campaign.id, mira.id, "What does the vault look like?")
//!         .await?;
//!     if let Some(answer) = outcome.response {
//!         println!("{}", answer.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod acts;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod generation;
pub mod model;
pub mod repository;
pub mod resolver;
pub mod router;
pub mod testing;

// Re-export for convenience
pub use campaign_macros::OutputSchema;

// Primary public API
pub use config::{ConfigError, EngineConfig, GenerationConfig};
pub use context::{CampaignScope, ContextDepth, PromptContext};
pub use engine::CampaignEngine;
pub use error::EngineError;
pub use generation::outputs::MessageIntent;
pub use generation::{
    ClaudeGenerator, Completion, GenerationError, GenerationRequest, GenerationService, SystemRole,
};
pub use model::{
    Act, Campaign, CampaignId, CampaignStatus, CharacterSheet, Entity, EntityId, EntityType,
    Message, PlayerCharacter, PlayerId,
};
pub use repository::{InMemoryRepository, Repository, RepositoryError, RepositorySnapshot};
pub use resolver::{EntityResolver, Resolution, UpdateReport};
pub use router::MessageOutcome;
pub use testing::{Rule, ScriptedGenerator, TestHarness};

#[cfg(test)]
mod tests {
    use super::*;
    use claude::OutputSchema as _;
    use serde::Deserialize;

    /// Pick the next scene for the players
    #[derive(OutputSchema, Deserialize)]
    #[schema(name = "pick_scene")]
    struct PickScene {
        /// Name of the scene
        scene: String,
        /// Optional mood of the scene
        mood: Option<String>,
        /// How many rounds the scene lasts
        #[schema(optional)]
        rounds: u32,
    }

    #[test]
    fn test_output_schema_derive() {
        assert_eq!(PickScene::schema_name(), "pick_scene");
        assert_eq!(PickScene::schema_description(), "Pick the next scene for the players");
    }

    #[test]
    fn test_output_schema_shape() {
        let schema = PickScene::schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["scene"]["type"], "string");
        assert_eq!(schema["properties"]["mood"]["type"], "string");
        assert_eq!(schema["properties"]["rounds"]["type"], "integer");

        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("scene")));
        assert!(!required.contains(&serde_json::json!("mood")));
        assert!(!required.contains(&serde_json::json!("rounds")));
    }

    #[test]
    fn test_schema_accepts_its_own_examples() {
        let schema = PickScene::schema();
        let value = serde_json::json!({ "scene": "the vault", "rounds": 3 });
        assert!(generation::schema::validate(&value, &schema).is_ok());

        let parsed: PickScene = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.scene, "the vault");
        assert!(parsed.mood.is_none());
    }
}
