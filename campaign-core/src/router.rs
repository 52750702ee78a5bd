//! Player message routing.
//!
//! Each player message is logged, classified, and for questions to the Game
//! Master answered under the campaign's speaking lease. Other intents are
//! logged and classified only.

use crate::context::{CampaignScope, ContextAssembler, ContextDepth};
use crate::error::{EngineError, StepExt};
use crate::generation::outputs::{MessageClassification, MessageIntent, QuestionJudgement};
use crate::generation::{GenerationClient, SystemRole};
use crate::model::{
    normalize_name, CampaignId, Entity, EntityDelta, Message, MessageId, PlayerCharacter,
    SpeakingLease, GAME_MASTER,
};
use crate::repository::Repository;
use crate::resolver::{entity_context, EntityResolver, Resolution};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a submitted player message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageOutcome {
    pub intent: MessageIntent,
    /// The logged player message.
    pub player_message: MessageId,
    /// The Game Master's answer, if one was generated.
    pub response: Option<Message>,
    /// References that matched nothing and could not be generated.
    pub unresolved: Vec<String>,
    pub judged_unreasonable: bool,
    pub justification: Option<String>,
}

impl MessageOutcome {
    fn logged(intent: MessageIntent, player_message: MessageId) -> Self {
        Self {
            intent,
            player_message,
            response: None,
            unresolved: Vec::new(),
            judged_unreasonable: false,
            justification: None,
        }
    }
}

/// Appends messages to the campaign log with a generated summary.
#[derive(Clone)]
pub struct MessageLog {
    repository: Arc<dyn Repository>,
    generation: GenerationClient,
}

impl MessageLog {
    pub fn new(repository: Arc<dyn Repository>, generation: GenerationClient) -> Self {
        Self {
            repository,
            generation,
        }
    }

    /// Summarize and append. Nothing is stored if summarizing fails.
    pub async fn record(
        &self,
        campaign_id: CampaignId,
        speaker: &str,
        text: &str,
    ) -> Result<Message, EngineError> {
        let summary = self
            .generation
            .text(
                SystemRole::Summarizer,
                format!("Summarize the following text:\n\"{speaker} says: \"{text}\"\""),
            )
            .await
            .step("message summary")?;
        let message = Message::new(campaign_id, speaker, text, summary);
        self.repository.append_message(message.clone()).await?;
        debug!(%campaign_id, speaker, message_id = %message.id, "message logged");
        Ok(message)
    }
}

#[derive(Clone)]
pub struct MessageRouter {
    repository: Arc<dyn Repository>,
    generation: GenerationClient,
    context: ContextAssembler,
    resolver: EntityResolver,
    log: MessageLog,
    lease_ttl: chrono::Duration,
}

impl MessageRouter {
    pub fn new(
        repository: Arc<dyn Repository>,
        generation: GenerationClient,
        context: ContextAssembler,
        resolver: EntityResolver,
        lease_ttl: chrono::Duration,
    ) -> Self {
        let log = MessageLog::new(repository.clone(), generation.clone());
        Self {
            repository,
            generation,
            context,
            resolver,
            log,
            lease_ttl,
        }
    }

    /// Handle one player message.
    pub async fn route(
        &self,
        scope: &CampaignScope,
        player: &PlayerCharacter,
        text: &str,
    ) -> Result<MessageOutcome, EngineError> {
        let campaign_id = scope.id();
        let logged = self.log.record(campaign_id, &player.name, text).await?;

        let intent = self.classify(scope, player, text).await?;
        let directed = intent == MessageIntent::GmRequestInfo;
        self.repository.set_message_directed(logged.id, directed).await?;
        info!(%campaign_id, player = %player.name, classification = intent.name(), "message classified");

        if !directed {
            return Ok(MessageOutcome::logged(intent, logged.id));
        }

        let now = Utc::now();
        let lease = SpeakingLease::new(GAME_MASTER, now, self.lease_ttl);
        let owner = lease.owner;
        if !self.repository.try_acquire_speaking(campaign_id, lease, now).await? {
            let campaign = self.repository.get_campaign(campaign_id).await?;
            let speaker = campaign.speaking_flag(now).unwrap_or(GAME_MASTER).to_string();
            warn!(%campaign_id, %speaker, "speaking lease held, question not answered");
            return Err(EngineError::Busy { speaker });
        }
        debug!(%campaign_id, lease_owner = %owner, "speaking lease acquired");

        let result = self
            .answer_question(scope, player, text, MessageOutcome::logged(intent, logged.id))
            .await;

        match self.repository.release_speaking(campaign_id, owner).await {
            Ok(true) => debug!(%campaign_id, lease_owner = %owner, "speaking lease released"),
            Ok(false) => warn!(%campaign_id, lease_owner = %owner, "speaking lease was already gone"),
            Err(err) => {
                warn!(%campaign_id, error = %err, "failed to release speaking lease");
                if result.is_ok() {
                    return Err(err.into());
                }
            }
        }
        result
    }

    async fn classify(
        &self,
        scope: &CampaignScope,
        player: &PlayerCharacter,
        text: &str,
    ) -> Result<MessageIntent, EngineError> {
        let context = self.context.assemble(scope, ContextDepth::Located).await?;
        let reply: MessageClassification = self
            .generation
            .structured(
                SystemRole::GameMaster,
                context.prompt(&format!(
                    "The player character {} just said: \"{text}\"\n\
                     Is this a question for the Game Master, something said to an NPC, or an \
                     action in the world?",
                    player.name
                )),
            )
            .await
            .step("message classification")?;
        Ok(reply.intent)
    }

    async fn answer_question(
        &self,
        scope: &CampaignScope,
        player: &PlayerCharacter,
        text: &str,
        mut outcome: MessageOutcome,
    ) -> Result<MessageOutcome, EngineError> {
        let campaign_id = scope.id();
        let located = self.context.assemble(scope, ContextDepth::Located).await?;

        let judgement: QuestionJudgement = self
            .generation
            .structured(
                SystemRole::GameMaster,
                located.prompt(&format!(
                    "The player character {} asks the Game Master: \"{text}\"\n\
                     Is this a reasonable question, given the current context, that the player \
                     characters could get an answer to right now? List every location, NPC, group \
                     or object the question is about.",
                    player.name
                )),
            )
            .await
            .step("question judgement")?;

        if !judgement.is_reasonable {
            info!(%campaign_id, justification = ?judgement.justification, "question judged unreasonable");
            outcome.judged_unreasonable = true;
            outcome.justification = judgement.justification;
            return Ok(outcome);
        }

        let (entities, unresolved) = self.resolve_all(scope, &judgement.entities, text).await;
        outcome.unresolved = unresolved;
        outcome.justification = judgement.justification;

        let prompt = entity_context(&entities).render();
        let answer = self
            .generation
            .text(
                SystemRole::GameMaster,
                located.prompt(&format!(
                    "<referenced entities>\n{prompt}\n</referenced entities>\n\
                     The player character {} asks you: \"{text}\"\n\
                     Answer as the Game Master. Share only what the player characters could \
                     plausibly already know or directly perceive; use the full information only \
                     to stay consistent, never reveal it.",
                    player.name
                )),
            )
            .await
            .step("game master answer")?;

        let response = self.log.record(campaign_id, GAME_MASTER, &answer).await?;

        let exposed: Vec<EntityDelta> = entities
            .iter()
            .filter(|e| !e.known_to_player)
            .map(|e| EntityDelta::for_entity(e.id).with_known_to_player(true))
            .collect();
        if !exposed.is_empty() {
            self.resolver.apply_updates(campaign_id, exposed).await?;
        }

        outcome.response = Some(response);
        Ok(outcome)
    }

    /// Resolve references concurrently. Failures are soft: the name is
    /// reported as unresolved and the answer goes ahead without it.
    async fn resolve_all(
        &self,
        scope: &CampaignScope,
        names: &[String],
        question: &str,
    ) -> (Vec<Entity>, Vec<String>) {
        let mut seen = Vec::new();
        let names: Vec<&String> = names
            .iter()
            .filter(|n| {
                let key = normalize_name(n);
                if key.is_empty() || seen.contains(&key) {
                    return false;
                }
                seen.push(key);
                true
            })
            .collect();

        let extra = format!("make sure content exists to answer the question \"{question}\"");
        let resolutions = join_all(
            names
                .iter()
                .map(|name| self.resolver.get_or_create(scope, name, None, Some(&extra))),
        )
        .await;

        let mut entities: Vec<Entity> = Vec::new();
        let mut unresolved = Vec::new();
        for (name, resolution) in names.into_iter().zip(resolutions) {
            match resolution {
                Ok(Resolution::Existing(entity)) | Ok(Resolution::Created(entity)) => {
                    if !entities.iter().any(|e| e.id == entity.id) {
                        entities.push(entity);
                    }
                }
                Ok(Resolution::Discarded) => {
                    debug!(reference = %name, "reference discarded");
                }
                Err(err) => {
                    warn!(reference = %name, error = %err, "reference unresolved");
                    unresolved.push(name.clone());
                }
            }
        }
        (entities, unresolved)
    }
}
