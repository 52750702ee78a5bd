//! World entities: NPCs, locations, groups and objects.

use super::ids::{CampaignId, EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of things the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// A non-player character.
    Npc,
    /// A single place; never a multi-room complex.
    Location,
    /// An organization, faction or crowd.
    Group,
    /// An item or other inanimate thing.
    Object,
}

impl EntityType {
    /// Wire/display name.
    pub fn name(&self) -> &'static str {
        match self {
            EntityType::Npc => "NPC",
            EntityType::Location => "LOCATION",
            EntityType::Group => "GROUP",
            EntityType::Object => "OBJECT",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of classifying a reference that had no known type.
///
/// `Discarded` is a content filter, not a failure: nothing gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityClassification {
    Typed(EntityType),
    Discarded,
}

impl EntityClassification {
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            EntityClassification::Typed(t) => Some(*t),
            EntityClassification::Discarded => None,
        }
    }
}

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A named world object with a GM-truth record and a player-visible subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub campaign_id: CampaignId,
    pub name: String,
    /// Alternative names; kept free of duplicates.
    pub aliases: Vec<String>,
    pub entity_type: EntityType,
    /// Ground truth. Never shown to players.
    pub full_information: String,
    /// What player characters are entitled to know.
    pub known_information: String,
    pub known_to_player: bool,
}

impl Entity {
    /// Create an empty stub entity.
    pub fn new(campaign_id: CampaignId, name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: EntityId::new(),
            campaign_id,
            name: name.into().trim().to_string(),
            aliases: Vec::new(),
            entity_type,
            full_information: String::new(),
            known_information: String::new(),
            known_to_player: false,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.add_alias(alias);
        self
    }

    pub fn with_information(
        mut self,
        full_information: impl Into<String>,
        known_information: impl Into<String>,
    ) -> Self {
        self.full_information = full_information.into();
        self.known_information = known_information.into();
        self
    }

    pub fn with_known_to_player(mut self, known: bool) -> Self {
        self.known_to_player = known;
        self
    }

    /// Add an alias unless it duplicates the name or an existing alias.
    pub fn add_alias(&mut self, alias: impl Into<String>) {
        let alias = alias.into().trim().to_string();
        if alias.is_empty() || self.matches_name(&alias) {
            return;
        }
        self.aliases.push(alias);
    }

    /// The normalized primary name.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Every normalized name this entity answers to.
    pub fn normalized_names(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|n| normalize_name(n))
    }

    /// Case and whitespace insensitive match against the name or any alias.
    pub fn matches_name(&self, query: &str) -> bool {
        let query = normalize_name(query);
        !query.is_empty() && self.normalized_names().any(|n| n == query)
    }

    /// Apply a partial update. Fields absent from the delta are left alone;
    /// aliases are merged.
    pub fn apply_delta(&mut self, delta: &EntityDelta) {
        if let Some(name) = delta.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            if normalize_name(name) != self.normalized_name() {
                let old = std::mem::replace(&mut self.name, name.to_string());
                self.aliases.retain(|a| normalize_name(a) != normalize_name(name));
                self.add_alias(old);
            }
        }
        if let Some(entity_type) = delta.entity_type {
            self.entity_type = entity_type;
        }
        if let Some(aliases) = &delta.aliases {
            for alias in aliases {
                self.add_alias(alias.clone());
            }
        }
        if let Some(full) = &delta.full_information {
            self.full_information = full.clone();
        }
        if let Some(known) = &delta.known_information {
            self.known_information = known.clone();
        }
        if let Some(known) = delta.known_to_player {
            self.known_to_player = known;
        }
    }

    /// Structural form of the knowledge invariant: players cannot know
    /// anything about an entity whose ground truth is empty.
    pub fn knowledge_is_consistent(&self) -> bool {
        self.known_information.trim().is_empty() || !self.full_information.trim().is_empty()
    }

    /// Full information cut to `max_chars`, on a char boundary.
    pub fn info_preview(&self, max_chars: usize) -> String {
        let text = self.full_information.trim();
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        }
    }
}

/// A partial change to an entity. With an `id` it patches that entity;
/// without one it describes a new entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_information: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_information: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_to_player: Option<bool>,
}

impl EntityDelta {
    pub fn for_entity(id: EntityId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn new_entity(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: Some(name.into()),
            entity_type: Some(entity_type),
            ..Self::default()
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = Some(aliases);
        self
    }

    pub fn with_full_information(mut self, text: impl Into<String>) -> Self {
        self.full_information = Some(text.into());
        self
    }

    pub fn with_known_information(mut self, text: impl Into<String>) -> Self {
        self.known_information = Some(text.into());
        self
    }

    pub fn with_known_to_player(mut self, known: bool) -> Self {
        self.known_to_player = Some(known);
        self
    }

    /// Build the entity a delta without an id describes. `None` when the
    /// delta lacks a name or type.
    pub fn into_entity(&self, campaign_id: CampaignId) -> Option<Entity> {
        let name = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())?;
        let entity_type = self.entity_type?;
        let mut entity = Entity::new(campaign_id, name, entity_type);
        entity.apply_delta(&EntityDelta {
            name: None,
            entity_type: None,
            ..self.clone()
        });
        if entity.full_information.trim().is_empty() && !entity.known_information.trim().is_empty() {
            entity.full_information = entity.known_information.clone();
        }
        Some(entity)
    }
}
