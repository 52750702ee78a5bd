//! The append-only campaign log.

use super::ids::{CampaignId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker name used for everything the GM says.
pub const GAME_MASTER: &str = "Game Master";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub campaign_id: CampaignId,
    pub speaker: String,
    pub text: String,
    /// Compressed form used when assembling context.
    pub summary: String,
    /// `None` until the message has been classified. Only player messages
    /// are classified.
    #[serde(default)]
    pub directed_at_gm: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        campaign_id: CampaignId,
        speaker: impl Into<String>,
        text: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            campaign_id,
            speaker: speaker.into(),
            text: text.into(),
            summary: summary.into(),
            directed_at_gm: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_from_game_master(&self) -> bool {
        self.speaker == GAME_MASTER
    }
}
