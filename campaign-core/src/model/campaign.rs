//! The campaign aggregate root, its status machine and the speaking lease.

use super::ids::{CampaignId, EntityId, LeaseOwner};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a campaign.
///
/// Variants are declared in lifecycle order; the derived `Ord` is the
/// ordering used to keep transitions forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    /// Campaign exists, players are still being added.
    Created,
    /// All player characters have been added.
    PlayersAdded,
    /// Outline and acts exist, but the campaign is not yet playable.
    StoryGenerated,
    /// Starting location is set; players may submit messages.
    Running,
}

impl CampaignStatus {
    /// Wire/display name.
    pub fn name(&self) -> &'static str {
        match self {
            CampaignStatus::Created => "CREATED",
            CampaignStatus::PlayersAdded => "PLAYERS_ADDED",
            CampaignStatus::StoryGenerated => "STORY_GENERATED",
            CampaignStatus::Running => "RUNNING",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Attempted to move a campaign backwards.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move campaign from {from} back to {to}")]
pub struct StatusRegression {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
}

/// Advisory mutual-exclusion token marking who is currently responding.
///
/// A lease expires on its own, so a crashed operation cannot leave the
/// campaign permanently speaking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingLease {
    pub owner: LeaseOwner,
    pub speaker: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SpeakingLease {
    /// Create a lease for `speaker` valid for `ttl` from `now`.
    pub fn new(speaker: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            owner: LeaseOwner::new(),
            speaker: speaker.into(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether the lease still holds at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A single running instance of the narrative engine for one group of players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    /// GM-only campaign outline.
    pub outline: Option<String>,
    pub current_context: Option<String>,
    /// 1-based number of the act in play.
    pub current_act: Option<u32>,
    pub current_location_id: Option<EntityId>,
    #[serde(default)]
    pub speaking: Option<SpeakingLease>,
}

impl Campaign {
    /// Create a new campaign in the `Created` status.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CampaignId::new(),
            name: name.into(),
            status: CampaignStatus::Created,
            outline: None,
            current_context: None,
            current_act: None,
            current_location_id: None,
            speaking: None,
        }
    }

    /// Move to `next`. Re-asserting the current status is a no-op; moving
    /// backwards is refused.
    pub fn advance_to(&mut self, next: CampaignStatus) -> Result<(), StatusRegression> {
        if next < self.status {
            return Err(StatusRegression {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Name of whoever currently holds a live speaking lease.
    pub fn speaking_flag(&self, now: DateTime<Utc>) -> Option<&str> {
        self.speaking
            .as_ref()
            .filter(|lease| lease.is_live(now))
            .map(|lease| lease.speaker.as_str())
    }

    /// Whether the campaign accepts player messages.
    pub fn is_running(&self) -> bool {
        self.status == CampaignStatus::Running
    }
}
