//! Player characters.

use super::ids::{CampaignId, EntityId, PlayerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with a submitted character sheet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetError {
    #[error("character name is empty")]
    EmptyName,

    #[error("level must be at least 1")]
    InvalidLevel,

    #[error("hit points {hp} exceed maximum {max_hp}")]
    HitPointsAboveMaximum { hp: i32, max_hp: i32 },

    #[error("maximum hit points must be positive")]
    InvalidMaxHitPoints,

    #[error("{ability} score {score} is outside 1..=30")]
    AbilityOutOfRange { ability: &'static str, score: u8 },
}

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    fn named(&self) -> [(&'static str, u8); 6] {
        [
            ("strength", self.strength),
            ("dexterity", self.dexterity),
            ("constitution", self.constitution),
            ("intelligence", self.intelligence),
            ("wisdom", self.wisdom),
            ("charisma", self.charisma),
        ]
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

/// What the caller submits when adding a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub race: String,
    pub background: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub xp: u32,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(default)]
    pub abilities: AbilityScores,
}

fn default_level() -> u32 {
    1
}

impl CharacterSheet {
    /// A level 1 sheet with average scores.
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        race: impl Into<String>,
        background: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            race: race.into(),
            background: background.into(),
            level: 1,
            xp: 0,
            hp: 10,
            max_hp: 10,
            abilities: AbilityScores::default(),
        }
    }

    pub fn with_hit_points(mut self, hp: i32, max_hp: i32) -> Self {
        self.hp = hp;
        self.max_hp = max_hp;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_abilities(mut self, abilities: AbilityScores) -> Self {
        self.abilities = abilities;
        self
    }

    /// Check the sheet is internally consistent.
    pub fn validate(&self) -> Result<(), SheetError> {
        if self.name.trim().is_empty() {
            return Err(SheetError::EmptyName);
        }
        if self.level == 0 {
            return Err(SheetError::InvalidLevel);
        }
        if self.max_hp <= 0 {
            return Err(SheetError::InvalidMaxHitPoints);
        }
        if self.hp > self.max_hp {
            return Err(SheetError::HitPointsAboveMaximum {
                hp: self.hp,
                max_hp: self.max_hp,
            });
        }
        for (ability, score) in self.abilities.named() {
            if !(1..=30).contains(&score) {
                return Err(SheetError::AbilityOutOfRange { ability, score });
            }
        }
        Ok(())
    }
}

/// A character in the world played by a real person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCharacter {
    pub id: PlayerId,
    pub campaign_id: CampaignId,
    pub name: String,
    pub class_name: String,
    pub race: String,
    pub background: String,
    pub level: u32,
    pub xp: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub abilities: AbilityScores,
    pub location_id: Option<EntityId>,
}

impl PlayerCharacter {
    /// Build a player from a validated sheet.
    pub fn from_sheet(campaign_id: CampaignId, sheet: CharacterSheet) -> Result<Self, SheetError> {
        sheet.validate()?;
        Ok(Self {
            id: PlayerId::new(),
            campaign_id,
            name: sheet.name.trim().to_string(),
            class_name: sheet.class_name,
            race: sheet.race,
            background: sheet.background,
            level: sheet.level,
            xp: sheet.xp,
            hp: sheet.hp,
            max_hp: sheet.max_hp,
            abilities: sheet.abilities,
            location_id: None,
        })
    }

    /// One-line description used in outline prompts.
    pub fn describe(&self) -> String {
        format!(
            "{} - Level {} {} - {} {}",
            self.name, self.level, self.class_name, self.background, self.race
        )
    }
}
