//! The persistence port.
//!
//! Everything the engine stores goes through [`Repository`]. The backing
//! store is up to the adapter; [`InMemoryRepository`] keeps everything in
//! process and can be written to and read from JSON snapshots.

mod memory;
pub mod snapshot;

pub use memory::InMemoryRepository;
pub use snapshot::{RepositorySnapshot, SnapshotError};

use crate::model::{
    Act, Campaign, CampaignId, Entity, EntityId, EntityType, LeaseOwner, Message, MessageId,
    PlayerCharacter, SpeakingLease,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// An entity with the same normalized name already exists.
    #[error("entity named '{name}' already exists as {existing}")]
    Conflict { existing: EntityId, name: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        RepositoryError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Storage for campaigns and everything they own.
#[async_trait]
pub trait Repository: Send + Sync {
    // Campaigns

    async fn create_campaign(&self, campaign: Campaign) -> RepoResult<()>;

    async fn get_campaign(&self, id: CampaignId) -> RepoResult<Campaign>;

    /// Overwrite a campaign. The speaking lease is not written; it only
    /// changes through [`try_acquire_speaking`](Self::try_acquire_speaking)
    /// and [`release_speaking`](Self::release_speaking).
    async fn save_campaign(&self, campaign: &Campaign) -> RepoResult<()>;

    /// Install `lease` unless a different live lease is held at `now`.
    /// Returns whether the lease was installed.
    async fn try_acquire_speaking(
        &self,
        id: CampaignId,
        lease: SpeakingLease,
        now: DateTime<Utc>,
    ) -> RepoResult<bool>;

    /// Clear the lease if `owner` still holds it. Returns whether it was
    /// cleared.
    async fn release_speaking(&self, id: CampaignId, owner: LeaseOwner) -> RepoResult<bool>;

    // Players

    async fn insert_player(&self, player: PlayerCharacter) -> RepoResult<()>;

    /// Players of a campaign in insertion order.
    async fn list_players(&self, campaign: CampaignId) -> RepoResult<Vec<PlayerCharacter>>;

    /// Move every player of the campaign to `location`. Returns how many
    /// players were updated.
    async fn set_players_location(
        &self,
        campaign: CampaignId,
        location: EntityId,
    ) -> RepoResult<usize>;

    // Entities

    async fn get_entity(&self, id: EntityId) -> RepoResult<Entity>;

    /// Entities of a campaign, optionally restricted to one type.
    async fn list_entities(
        &self,
        campaign: CampaignId,
        entity_type: Option<EntityType>,
    ) -> RepoResult<Vec<Entity>>;

    /// Every entity whose normalized name or alias equals the normalized
    /// `name`.
    async fn find_entity_by_name(&self, campaign: CampaignId, name: &str)
        -> RepoResult<Vec<Entity>>;

    /// Insert a new entity. Fails with [`RepositoryError::Conflict`] if an
    /// entity of the campaign already answers to its name.
    async fn insert_entity(&self, entity: Entity) -> RepoResult<()>;

    async fn save_entity(&self, entity: &Entity) -> RepoResult<()>;

    // Acts

    /// Replace all acts of a campaign in one step.
    async fn replace_acts(&self, campaign: CampaignId, acts: Vec<Act>) -> RepoResult<()>;

    /// Acts ordered by number.
    async fn list_acts(&self, campaign: CampaignId) -> RepoResult<Vec<Act>>;

    async fn get_act(&self, campaign: CampaignId, number: u32) -> RepoResult<Option<Act>>;

    // Messages

    async fn append_message(&self, message: Message) -> RepoResult<()>;

    async fn set_message_directed(&self, id: MessageId, directed_at_gm: bool) -> RepoResult<()>;

    /// The last `limit` messages, oldest first.
    async fn recent_messages(&self, campaign: CampaignId, limit: usize)
        -> RepoResult<Vec<Message>>;

    async fn last_message(&self, campaign: CampaignId) -> RepoResult<Option<Message>>;

    async fn count_messages(&self, campaign: CampaignId) -> RepoResult<usize>;
}
