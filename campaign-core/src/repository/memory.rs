use super::{RepoResult, Repository, RepositoryError, RepositorySnapshot};
use crate::model::{
    Act, Campaign, CampaignId, Entity, EntityId, EntityType, LeaseOwner, Message,
    MessageId, PlayerCharacter, SpeakingLease,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Store {
    campaigns: HashMap<CampaignId, Campaign>,
    players: HashMap<CampaignId, Vec<PlayerCharacter>>,
    entities: HashMap<CampaignId, Vec<Entity>>,
    acts: HashMap<CampaignId, Vec<Act>>,
    messages: HashMap<CampaignId, Vec<Message>>,
}

impl Store {
    fn campaign_mut(&mut self, id: CampaignId) -> RepoResult<&mut Campaign> {
        self.campaigns
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("campaign", id))
    }

    fn require_campaign(&self, id: CampaignId) -> RepoResult<()> {
        if self.campaigns.contains_key(&id) {
            Ok(())
        } else {
            Err(RepositoryError::not_found("campaign", id))
        }
    }

    fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|e| e.id == id)
    }
}

/// In-process [`Repository`] guarded by a single `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything currently stored.
    pub async fn snapshot(&self) -> RepositorySnapshot {
        let store = self.store.read().await;
        let mut snapshot = RepositorySnapshot::empty();
        snapshot.campaigns = store.campaigns.values().cloned().collect();
        snapshot.campaigns.sort_by_key(|c| c.id);
        for campaign in &snapshot.campaigns {
            let id = campaign.id;
            snapshot
                .players
                .extend(store.players.get(&id).into_iter().flatten().cloned());
            snapshot
                .entities
                .extend(store.entities.get(&id).into_iter().flatten().cloned());
            snapshot
                .acts
                .extend(store.acts.get(&id).into_iter().flatten().cloned());
            snapshot
                .messages
                .extend(store.messages.get(&id).into_iter().flatten().cloned());
        }
        snapshot
    }

    /// Rebuild a repository from a snapshot. Record order within each
    /// campaign is preserved.
    pub fn from_snapshot(snapshot: RepositorySnapshot) -> Self {
        let mut store = Store::default();
        for campaign in snapshot.campaigns {
            store.campaigns.insert(campaign.id, campaign);
        }
        for player in snapshot.players {
            store.players.entry(player.campaign_id).or_default().push(player);
        }
        for entity in snapshot.entities {
            store.entities.entry(entity.campaign_id).or_default().push(entity);
        }
        for act in snapshot.acts {
            store.acts.entry(act.campaign_id).or_default().push(act);
        }
        for message in snapshot.messages {
            store.messages.entry(message.campaign_id).or_default().push(message);
        }
        Self {
            store: RwLock::new(store),
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_campaign(&self, campaign: Campaign) -> RepoResult<()> {
        let mut store = self.store.write().await;
        if store.campaigns.contains_key(&campaign.id) {
            return Err(RepositoryError::Storage(format!(
                "campaign {} already exists",
                campaign.id
            )));
        }
        store.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get_campaign(&self, id: CampaignId) -> RepoResult<Campaign> {
        self.store
            .read()
            .await
            .campaigns
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("campaign", id))
    }

    async fn save_campaign(&self, campaign: &Campaign) -> RepoResult<()> {
        let mut store = self.store.write().await;
        let stored = store.campaign_mut(campaign.id)?;
        let lease = stored.speaking.take();
        *stored = campaign.clone();
        stored.speaking = lease;
        Ok(())
    }

    async fn try_acquire_speaking(
        &self,
        id: CampaignId,
        lease: SpeakingLease,
        now: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        let campaign = store.campaign_mut(id)?;
        if let Some(current) = &campaign.speaking {
            if current.is_live(now) && current.owner != lease.owner {
                return Ok(false);
            }
        }
        campaign.speaking = Some(lease);
        Ok(true)
    }

    async fn release_speaking(&self, id: CampaignId, owner: LeaseOwner) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        let campaign = store.campaign_mut(id)?;
        match &campaign.speaking {
            Some(lease) if lease.owner == owner => {
                campaign.speaking = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_player(&self, player: PlayerCharacter) -> RepoResult<()> {
        let mut store = self.store.write().await;
        store.require_campaign(player.campaign_id)?;
        store.players.entry(player.campaign_id).or_default().push(player);
        Ok(())
    }

    async fn list_players(&self, campaign: CampaignId) -> RepoResult<Vec<PlayerCharacter>> {
        let store = self.store.read().await;
        Ok(store.players.get(&campaign).cloned().unwrap_or_default())
    }

    async fn set_players_location(
        &self,
        campaign: CampaignId,
        location: EntityId,
    ) -> RepoResult<usize> {
        let mut store = self.store.write().await;
        store.require_campaign(campaign)?;
        let players = store.players.entry(campaign).or_default();
        for player in players.iter_mut() {
            player.location_id = Some(location);
        }
        Ok(players.len())
    }

    async fn get_entity(&self, id: EntityId) -> RepoResult<Entity> {
        let store = self.store.read().await;
        store
            .entities
            .values()
            .flatten()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("entity", id))
    }

    async fn list_entities(
        &self,
        campaign: CampaignId,
        entity_type: Option<EntityType>,
    ) -> RepoResult<Vec<Entity>> {
        let store = self.store.read().await;
        Ok(store
            .entities
            .get(&campaign)
            .into_iter()
            .flatten()
            .filter(|e| entity_type.map_or(true, |t| e.entity_type == t))
            .cloned()
            .collect())
    }

    async fn find_entity_by_name(
        &self,
        campaign: CampaignId,
        name: &str,
    ) -> RepoResult<Vec<Entity>> {
        let store = self.store.read().await;
        Ok(store
            .entities
            .get(&campaign)
            .into_iter()
            .flatten()
            .filter(|e| e.matches_name(name))
            .cloned()
            .collect())
    }

    async fn insert_entity(&self, entity: Entity) -> RepoResult<()> {
        let mut store = self.store.write().await;
        store.require_campaign(entity.campaign_id)?;
        let list = store.entities.entry(entity.campaign_id).or_default();
        if let Some(conflict) = name_conflict(list, &entity) {
            return Err(conflict);
        }
        list.push(entity);
        Ok(())
    }

    async fn save_entity(&self, entity: &Entity) -> RepoResult<()> {
        let mut store = self.store.write().await;
        let siblings = store
            .entities
            .get(&entity.campaign_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if let Some(conflict) = name_conflict(siblings, entity) {
            return Err(conflict);
        }
        let stored = store
            .entity_mut(entity.id)
            .ok_or_else(|| RepositoryError::not_found("entity", entity.id))?;
        *stored = entity.clone();
        Ok(())
    }

    async fn replace_acts(&self, campaign: CampaignId, mut acts: Vec<Act>) -> RepoResult<()> {
        let mut store = self.store.write().await;
        store.require_campaign(campaign)?;
        if let Some(stray) = acts.iter().find(|a| a.campaign_id != campaign) {
            return Err(RepositoryError::Storage(format!(
                "act {} belongs to campaign {}",
                stray.number, stray.campaign_id
            )));
        }
        acts.sort_by_key(|a| a.number);
        store.acts.insert(campaign, acts);
        Ok(())
    }

    async fn list_acts(&self, campaign: CampaignId) -> RepoResult<Vec<Act>> {
        let store = self.store.read().await;
        Ok(store.acts.get(&campaign).cloned().unwrap_or_default())
    }

    async fn get_act(&self, campaign: CampaignId, number: u32) -> RepoResult<Option<Act>> {
        let store = self.store.read().await;
        Ok(store
            .acts
            .get(&campaign)
            .and_then(|acts| acts.iter().find(|a| a.number == number))
            .cloned())
    }

    async fn append_message(&self, message: Message) -> RepoResult<()> {
        let mut store = self.store.write().await;
        store.require_campaign(message.campaign_id)?;
        store.messages.entry(message.campaign_id).or_default().push(message);
        Ok(())
    }

    async fn set_message_directed(&self, id: MessageId, directed_at_gm: bool) -> RepoResult<()> {
        let mut store = self.store.write().await;
        let message = store
            .messages
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|m| m.id == id)
            .ok_or_else(|| RepositoryError::not_found("message", id))?;
        message.directed_at_gm = Some(directed_at_gm);
        Ok(())
    }

    async fn recent_messages(
        &self,
        campaign: CampaignId,
        limit: usize,
    ) -> RepoResult<Vec<Message>> {
        let store = self.store.read().await;
        let all = store.messages.get(&campaign).map(Vec::as_slice).unwrap_or(&[]);
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn last_message(&self, campaign: CampaignId) -> RepoResult<Option<Message>> {
        let store = self.store.read().await;
        Ok(store
            .messages
            .get(&campaign)
            .and_then(|list| list.last())
            .cloned())
    }

    async fn count_messages(&self, campaign: CampaignId) -> RepoResult<usize> {
        let store = self.store.read().await;
        Ok(store.messages.get(&campaign).map_or(0, Vec::len))
    }
}

/// A different entity already answering to one of `entity`'s names.
fn name_conflict(entities: &[Entity], entity: &Entity) -> Option<RepositoryError> {
    entity.normalized_names().find_map(|name| {
        entities
            .iter()
            .find(|other| other.id != entity.id && other.matches_name(&name))
            .map(|other| RepositoryError::Conflict {
                existing: other.id,
                name: name.clone(),
            })
    })
}
