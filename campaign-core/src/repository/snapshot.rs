//! Whole-store JSON snapshots for saving and resuming campaigns.

use crate::model::{Act, Campaign, Entity, Message, PlayerCharacter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Every record in a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub campaigns: Vec<Campaign>,
    pub players: Vec<PlayerCharacter>,
    pub entities: Vec<Entity>,
    pub acts: Vec<Act>,
    pub messages: Vec<Message>,
}

impl RepositorySnapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            campaigns: Vec::new(),
            players: Vec::new(),
            entities: Vec::new(),
            acts: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Parse and check the format version.
    pub fn from_json(content: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, GAME_MASTER};
    use crate::repository::{InMemoryRepository, Repository};

    #[tokio::test]
    async fn test_snapshot_restores_repository() {
        let repo = InMemoryRepository::new();
        let campaign = Campaign::new("Skyport");
        let id = campaign.id;
        repo.create_campaign(campaign).await.unwrap();
        repo.insert_entity(Entity::new(id, "Dock", EntityType::Location))
            .await
            .unwrap();
        repo.append_message(Message::new(id, GAME_MASTER, "first", "f"))
            .await
            .unwrap();
        repo.append_message(Message::new(id, "Mira", "second", "s"))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save.json");
        repo.snapshot().await.save_json(&path).await.unwrap();

        let restored = InMemoryRepository::from_snapshot(RepositorySnapshot::load_json(&path).await.unwrap());
        assert_eq!(restored.get_campaign(id).await.unwrap().name, "Skyport");
        assert_eq!(restored.list_entities(id, None).await.unwrap().len(), 1);
        let log = restored.recent_messages(id, 10).await.unwrap();
        assert_eq!(log[0].text, "first");
        assert_eq!(log[1].text, "second");
    }

    #[test]
    fn test_version_mismatch() {
        let mut snapshot = RepositorySnapshot::empty();
        snapshot.version = 99;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(matches!(
            RepositorySnapshot::from_json(&json),
            Err(SnapshotError::VersionMismatch { expected: 1, found: 99 })
        ));
    }
}
