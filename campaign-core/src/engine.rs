//! The campaign state machine.
//!
//! [`CampaignEngine`] is the caller-facing API. It owns campaign status and
//! drives the other components through the campaign lifecycle:
//!
//! ```text
//! CREATED -> PLAYERS_ADDED -> STORY_GENERATED -> RUNNING
//! ```
//!
//! Transitions are forward-only. Setup failures leave the campaign in the
//! last status it fully reached, from which `generate_campaign` can be
//! retried.

use crate::acts::ActPlanner;
use crate::config::EngineConfig;
use crate::context::{CampaignScope, ContextAssembler, ContextDepth};
use crate::error::{EngineError, StepExt};
use crate::generation::outputs::{EntityUpdates, LocationName, OpeningMessages};
use crate::generation::{GenerationClient, GenerationService, SystemRole};
use crate::model::{
    normalize_name, Campaign, CampaignId, CampaignStatus, CharacterSheet, Entity, EntityDelta,
    EntityType, Message, PlayerCharacter, PlayerId, GAME_MASTER,
};
use crate::repository::Repository;
use crate::resolver::{EntityResolver, Resolution, UpdateReport};
use crate::router::{MessageLog, MessageOutcome, MessageRouter};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Extra context given when generating the starting location.
pub const STARTING_LOCATION: &str = "starting location";

pub struct CampaignEngine {
    repository: Arc<dyn Repository>,
    generation: GenerationClient,
    config: EngineConfig,
    context: ContextAssembler,
    resolver: EntityResolver,
    planner: ActPlanner,
    router: MessageRouter,
    log: MessageLog,
}

impl CampaignEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        service: Arc<dyn GenerationService>,
        config: EngineConfig,
    ) -> Self {
        let generation = GenerationClient::new(service);
        let context = ContextAssembler::new(repository.clone(), config.recent_log_limit);
        let resolver = EntityResolver::new(
            repository.clone(),
            generation.clone(),
            context.clone(),
            config.entity_info_preview_chars,
        );
        let planner = ActPlanner::new(repository.clone(), generation.clone(), context.clone());
        let router = MessageRouter::new(
            repository.clone(),
            generation.clone(),
            context.clone(),
            resolver.clone(),
            config.speaking_lease_ttl(),
        );
        let log = MessageLog::new(repository.clone(), generation.clone());

        Self {
            repository,
            generation,
            config,
            context,
            resolver,
            planner,
            router,
            log,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub async fn create_campaign(&self, name: &str) -> Result<Campaign, EngineError> {
        let campaign = Campaign::new(name.trim());
        self.repository.create_campaign(campaign.clone()).await?;
        info!(campaign_id = %campaign.id, name = %campaign.name, "campaign created");
        Ok(campaign)
    }

    /// Add a player character. Only allowed before players are marked added.
    pub async fn add_player(
        &self,
        campaign_id: CampaignId,
        sheet: CharacterSheet,
    ) -> Result<PlayerCharacter, EngineError> {
        let campaign = self.repository.get_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Created {
            return Err(EngineError::invalid_state(campaign.status, "add a player"));
        }
        let player = PlayerCharacter::from_sheet(campaign_id, sheet)?;
        self.repository.insert_player(player.clone()).await?;
        info!(%campaign_id, player = %player.name, "player added");
        Ok(player)
    }

    /// `CREATED -> PLAYERS_ADDED`. Requires at least one player.
    pub async fn mark_players_added(&self, campaign_id: CampaignId) -> Result<Campaign, EngineError> {
        let mut scope = CampaignScope::load(self.repository.as_ref(), campaign_id).await?;
        match scope.campaign.status {
            CampaignStatus::Created => {}
            CampaignStatus::PlayersAdded => return Ok(scope.campaign),
            status => return Err(EngineError::invalid_state(status, "mark players added")),
        }
        if scope.players.is_empty() {
            return Err(EngineError::invalid_state(
                scope.campaign.status,
                "mark players added without any players",
            ));
        }
        scope.campaign.advance_to(CampaignStatus::PlayersAdded)?;
        self.repository.save_campaign(&scope.campaign).await?;
        info!(%campaign_id, players = scope.players.len(), "players added");
        Ok(scope.campaign)
    }

    /// Outline, acts, starting location, then opening messages.
    ///
    /// Allowed from `PLAYERS_ADDED`, or from `STORY_GENERATED` to retry a
    /// setup that failed after the acts were stored.
    pub async fn generate_campaign(
        &self,
        campaign_id: CampaignId,
        premise: &str,
    ) -> Result<Campaign, EngineError> {
        let mut scope = CampaignScope::load(self.repository.as_ref(), campaign_id).await?;
        let status = scope.campaign.status;
        if !matches!(
            status,
            CampaignStatus::PlayersAdded | CampaignStatus::StoryGenerated
        ) {
            return Err(EngineError::invalid_state(status, "generate the campaign"));
        }

        info!(%campaign_id, premise, "generating outline");
        let outline = self.generate_outline(&scope, premise).await?;
        scope.campaign.outline = Some(outline);
        scope.campaign.current_act = Some(1);
        self.repository.save_campaign(&scope.campaign).await?;

        self.planner.plan_acts(&scope, self.config.act_count).await?;
        scope.campaign.advance_to(CampaignStatus::StoryGenerated)?;
        self.repository.save_campaign(&scope.campaign).await?;

        let location = self.setup_starting_location(&scope).await?;
        scope.campaign.current_location_id = Some(location.id);
        let moved = self
            .repository
            .set_players_location(campaign_id, location.id)
            .await?;
        scope.campaign.advance_to(CampaignStatus::Running)?;
        self.repository.save_campaign(&scope.campaign).await?;
        info!(%campaign_id, location = %location.name, players = moved, "campaign running");

        self.generate_opening_messages(&scope).await?;
        Ok(scope.campaign)
    }

    /// Route a player message. The campaign must be running.
    pub async fn submit_player_message(
        &self,
        campaign_id: CampaignId,
        player_id: PlayerId,
        text: &str,
    ) -> Result<MessageOutcome, EngineError> {
        let scope = CampaignScope::load(self.repository.as_ref(), campaign_id).await?;
        if !scope.campaign.is_running() {
            return Err(EngineError::invalid_state(
                scope.campaign.status,
                "submit a player message",
            ));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        let player = scope
            .players
            .iter()
            .find(|p| p.id == player_id)
            .ok_or_else(|| EngineError::NotFound {
                kind: "player",
                id: player_id.to_string(),
            })?;

        self.router.route(&scope, player, text).await
    }

    /// Register or update every location mentioned in the recent log.
    pub async fn refresh_locations(
        &self,
        campaign_id: CampaignId,
    ) -> Result<UpdateReport, EngineError> {
        let scope = CampaignScope::load(self.repository.as_ref(), campaign_id).await?;
        if !scope.campaign.is_running() {
            return Err(EngineError::invalid_state(
                scope.campaign.status,
                "refresh locations",
            ));
        }

        let locations = self
            .repository
            .list_entities(campaign_id, Some(EntityType::Location))
            .await?;
        let known_ids: HashSet<_> = locations.iter().map(|l| l.id).collect();
        let listing = locations
            .iter()
            .map(|l| {
                format!(
                    "- id: {} name: \"{}\" aliases: [{}] known to players: {}\n  {}",
                    l.id,
                    l.name,
                    l.aliases.join(", "),
                    l.known_to_player,
                    l.known_information.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let context = self
            .context
            .assemble(&scope, ContextDepth::Located)
            .await?
            .with("known locations", listing);
        let reply: EntityUpdates = self
            .generation
            .structured(
                SystemRole::GameMaster,
                context.prompt(
                    "Register every location mentioned in the recent campaign log. For a \
                     location already in the known locations, give its id and only the fields \
                     that changed. For a new location, leave out the id and give its name, \
                     entity_type LOCATION, full information, known information and whether the \
                     players have been there. Only include locations.",
                ),
            )
            .await
            .step("location updates")?;

        let mut deltas = Vec::new();
        let mut rejected = 0;
        for update in reply.entities {
            let Some(mut delta) = update.into_delta() else {
                rejected += 1;
                continue;
            };
            let target = delta.id;
            match target {
                Some(id) if known_ids.contains(&id) => {
                    delta.entity_type = None;
                    deltas.push(delta);
                }
                None if delta.entity_type == Some(EntityType::Location) => {
                    if self.names_non_location(campaign_id, &delta).await? {
                        rejected += 1;
                    } else {
                        deltas.push(delta);
                    }
                }
                _ => rejected += 1,
            }
        }
        if rejected > 0 {
            warn!(%campaign_id, rejected, "ignored non-location updates");
        }

        let mut report = self.resolver.apply_updates(campaign_id, deltas).await?;
        report.skipped += rejected;
        info!(%campaign_id, updated = report.updated, created = report.created, "locations refreshed");
        Ok(report)
    }

    /// Whether a new location's name or aliases already belong to
    /// something that is not a location.
    async fn names_non_location(
        &self,
        campaign_id: CampaignId,
        delta: &EntityDelta,
    ) -> Result<bool, EngineError> {
        let names = delta.name.iter().chain(delta.aliases.iter().flatten());
        for name in names {
            let clashes = self.repository.find_entity_by_name(campaign_id, name).await?;
            if clashes.iter().any(|e| e.entity_type != EntityType::Location) {
                warn!(%campaign_id, location = %name, "name belongs to a non-location entity");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn generate_outline(
        &self,
        scope: &CampaignScope,
        premise: &str,
    ) -> Result<String, EngineError> {
        let context = self.context.assemble(scope, ContextDepth::Basic).await?;
        let players = scope
            .players
            .iter()
            .map(|p| format!("- {}", p.describe()))
            .collect::<Vec<_>>()
            .join("\n");

        let draft = self
            .generation
            .text(
                SystemRole::GameDesigner,
                context.prompt(&format!(
                    "Give me an outline for a campaign that fits this description:\n\"{premise}\"\n\n\
                     These are the player characters of the campaign:\n{players}\n\n\
                     Work the player characters into the campaign lore.\n\n\
                     The outline is not shown to the players; it is used to generate other \
                     details later. Include key characters and locations, explain the conflict, \
                     and give a few possible resolutions.\n\n\
                     Reply with the text of the outline only."
                )),
            )
            .await
            .step("campaign outline")?;

        self.generation
            .text(
                SystemRole::GameDesigner,
                context.prompt(&format!(
                    "Here is an outline for a campaign you are helping design:\n\"{draft}\"\n\n\
                     What questions does it leave open? Is any content hinted at but missing? \
                     Are there events or activities that would be hard to run for lack of detail?\n\n\
                     Give me an updated outline that answers these questions.\n\
                     Reply with the text of the outline only."
                )),
            )
            .await
            .step("campaign outline")
    }

    async fn setup_starting_location(&self, scope: &CampaignScope) -> Result<Entity, EngineError> {
        let context = self.context.assemble(scope, ContextDepth::Basic).await?;
        let reply: LocationName = self
            .generation
            .structured_checked(
                SystemRole::GameDesigner,
                context.prompt(
                    "Where should the players be when the campaign begins? Name a single \
                     location small enough for one encounter.",
                ),
                |l: &LocationName| {
                    if normalize_name(&l.name).is_empty() {
                        Err("location name is empty".to_string())
                    } else {
                        Ok(())
                    }
                },
            )
            .await
            .step("starting location")?;

        let resolution = self
            .resolver
            .get_or_create(
                scope,
                &reply.name,
                Some(EntityType::Location),
                Some(STARTING_LOCATION),
            )
            .await?;
        match resolution {
            Resolution::Existing(entity) | Resolution::Created(entity)
                if entity.entity_type == EntityType::Location =>
            {
                Ok(entity)
            }
            _ => Err(EngineError::UnresolvedReference(reply.name)),
        }
    }

    async fn generate_opening_messages(
        &self,
        scope: &CampaignScope,
    ) -> Result<Vec<Message>, EngineError> {
        let campaign_id = scope.id();
        let located = self.context.assemble(scope, ContextDepth::Located).await?;

        let directions = self
            .generation
            .text(
                SystemRole::GameDesigner,
                located.prompt(
                    "Give the Game Master directions for introducing the story through a mix of \
                     Game Master narration and NPC dialogue, speaking directly to the Game Master. \
                     Do not write the dialogue itself. At least one message must come from the \
                     Game Master and at least one from an NPC. What is the minimum the players \
                     need to learn for their introduction? Which parts should come from the \
                     Game Master, and which from which NPC?",
                ),
            )
            .await
            .step("opening directions")?;

        let opening: OpeningMessages = self
            .generation
            .structured_checked(
                SystemRole::GameMaster,
                located.prompt(&format!(
                    "<directions>\n{directions}\n</directions>\n\
                     Write the opening messages of the campaign following these directions. Each \
                     message has a speaker, either \"{GAME_MASTER}\" or the name of the NPC \
                     speaking, and the spoken text."
                )),
                check_opening,
            )
            .await
            .step("opening messages")?;

        let mut messages = Vec::with_capacity(opening.messages.len());
        for line in opening.messages {
            let speaker = if is_game_master(&line.speaker) {
                GAME_MASTER.to_string()
            } else {
                line.speaker.trim().to_string()
            };
            messages.push(self.log.record(campaign_id, &speaker, line.message.trim()).await?);
        }
        info!(%campaign_id, count = messages.len(), "opening messages logged");
        Ok(messages)
    }
}

fn is_game_master(speaker: &str) -> bool {
    let speaker = normalize_name(speaker);
    speaker == normalize_name(GAME_MASTER) || speaker == "gm"
}

fn check_opening(opening: &OpeningMessages) -> Result<(), String> {
    if opening.messages.len() < 2 {
        return Err(format!(
            "expected at least 2 messages, got {}",
            opening.messages.len()
        ));
    }
    if opening
        .messages
        .iter()
        .any(|m| m.message.trim().is_empty() || normalize_name(&m.speaker).is_empty())
    {
        return Err("every message needs a speaker and text".into());
    }
    if opening.messages.iter().all(|m| is_game_master(&m.speaker)) {
        return Err("at least one message must come from an NPC".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::outputs::OpeningLine;

    fn line(speaker: &str, message: &str) -> OpeningLine {
        OpeningLine {
            speaker: speaker.into(),
            message: message.into(),
        }
    }

    #[test]
    fn test_check_opening() {
        let good = OpeningMessages {
            messages: vec![line("Game Master", "Wind howls."), line("Mira", "Welcome aboard.")],
        };
        assert!(check_opening(&good).is_ok());

        let gm_only = OpeningMessages {
            messages: vec![line("Game Master", "a"), line("GM", "b")],
        };
        assert!(check_opening(&gm_only).unwrap_err().contains("NPC"));

        let short = OpeningMessages {
            messages: vec![line("Mira", "Hi.")],
        };
        assert!(check_opening(&short).is_err());

        let blank = OpeningMessages {
            messages: vec![line("Mira", " "), line("Game Master", "Hi.")],
        };
        assert!(check_opening(&blank).is_err());
    }

    #[test]
    fn test_is_game_master() {
        assert!(is_game_master("game  master"));
        assert!(is_game_master("GM"));
        assert!(!is_game_master("Mira"));
    }
}
