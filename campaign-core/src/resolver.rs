//! Entity resolution and lazy creation.
//!
//! References from play are matched against the known entities of a
//! campaign. Exact name or alias matches win outright; otherwise the
//! generation service is asked whether the reference describes a known
//! entity. Anything ambiguous fails closed. Unknown references get content
//! generated on demand, split into ground truth and what players may know.

use crate::context::{CampaignScope, ContextAssembler, ContextDepth, PromptContext};
use crate::error::{EngineError, StepExt};
use crate::generation::outputs::{EntityKindAnswer, EntityMatch};
use crate::generation::{GenerationClient, SystemRole};
use crate::model::{
    normalize_name, CampaignId, Entity, EntityClassification, EntityDelta, EntityId, EntityType,
};
use crate::repository::{Repository, RepositoryError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reply the designer gives when players would know nothing.
const NOTHING_KNOWN: &str = "NONE";

/// Outcome of [`EntityResolver::get_or_create`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Existing(Entity),
    Created(Entity),
    /// Classified as none of the tracked kinds; nothing was stored.
    Discarded,
}

impl Resolution {
    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Resolution::Existing(e) | Resolution::Created(e) => Some(e),
            Resolution::Discarded => None,
        }
    }
}

/// Counts from [`EntityResolver::apply_updates`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub updated: usize,
    pub created: usize,
    pub skipped: usize,
}

type CreationKey = (CampaignId, String);

#[derive(Clone)]
pub struct EntityResolver {
    repository: Arc<dyn Repository>,
    generation: GenerationClient,
    context: ContextAssembler,
    info_preview_chars: usize,
    creation_locks: Arc<DashMap<CreationKey, Arc<Mutex<()>>>>,
}

impl EntityResolver {
    pub fn new(
        repository: Arc<dyn Repository>,
        generation: GenerationClient,
        context: ContextAssembler,
        info_preview_chars: usize,
    ) -> Self {
        Self {
            repository,
            generation,
            context,
            info_preview_chars,
            creation_locks: Arc::new(DashMap::new()),
        }
    }

    /// Find the entity `name` refers to, if exactly one does.
    pub async fn resolve_reference(
        &self,
        scope: &CampaignScope,
        name: &str,
    ) -> Result<Option<EntityId>, EngineError> {
        let campaign_id = scope.id();

        let exact = self.repository.find_entity_by_name(campaign_id, name).await?;
        match exact.as_slice() {
            [entity] => return Ok(Some(entity.id)),
            [] => {}
            many => {
                warn!(%campaign_id, reference = name, matches = many.len(), "ambiguous exact match");
                return Ok(None);
            }
        }

        let known = self.repository.list_entities(campaign_id, None).await?;
        if known.is_empty() {
            return Ok(None);
        }

        let entity_list = known
            .iter()
            .map(|e| self.describe_for_matching(e))
            .collect::<Vec<_>>()
            .join("\n");
        let context = self
            .context
            .assemble(scope, ContextDepth::Basic)
            .await?
            .with("master entity list", entity_list);

        let reply: EntityMatch = self
            .generation
            .structured(
                SystemRole::GameMaster,
                context.prompt(&format!(
                    "The players referred to \"{name}\". If this reference is probably one of the \
                     entities in the master entity list, because the name is similar or the \
                     description fits, give the exact name from the list. If more than one entity \
                     could be meant, report the match as ambiguous."
                )),
            )
            .await
            .step("entity match")?;

        if reply.ambiguous || !reply.found_match {
            debug!(%campaign_id, reference = name, ambiguous = reply.ambiguous, "no unique match");
            return Ok(None);
        }
        let Some(matched) = reply.matched_entity else {
            return Ok(None);
        };

        let candidates: Vec<&Entity> = known.iter().filter(|e| e.matches_name(&matched)).collect();
        match candidates.as_slice() {
            [entity] => {
                debug!(%campaign_id, reference = name, entity = %entity.name, "matched entity");
                Ok(Some(entity.id))
            }
            _ => {
                warn!(%campaign_id, reference = name, matched = %matched, "match is not a unique known entity");
                Ok(None)
            }
        }
    }

    /// Return the entity `name` refers to, creating it if nothing matches.
    ///
    /// With no `entity_type` the new entity is classified after its content
    /// is generated, and may come back [`Resolution::Discarded`].
    pub async fn get_or_create(
        &self,
        scope: &CampaignScope,
        name: &str,
        entity_type: Option<EntityType>,
        extra_context: Option<&str>,
    ) -> Result<Resolution, EngineError> {
        let name = name.trim();
        if normalize_name(name).is_empty() {
            return Err(EngineError::UnresolvedReference(name.to_string()));
        }

        if let Some(id) = self.resolve_reference(scope, name).await? {
            return Ok(Resolution::Existing(self.repository.get_entity(id).await?));
        }

        let key = (scope.id(), normalize_name(name));
        let lock = self.creation_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(scope, name, entity_type, extra_context).await
        };
        drop(lock);
        self.creation_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn create_locked(
        &self,
        scope: &CampaignScope,
        name: &str,
        entity_type: Option<EntityType>,
        extra_context: Option<&str>,
    ) -> Result<Resolution, EngineError> {
        let campaign_id = scope.id();

        // Someone may have created it while we waited for the lock.
        match self
            .repository
            .find_entity_by_name(campaign_id, name)
            .await?
            .as_slice()
        {
            [] => {}
            [entity] => return Ok(Resolution::Existing(entity.clone())),
            many => {
                warn!(%campaign_id, entity = name, matches = many.len(), "name is ambiguous, not creating");
                return Err(EngineError::UnresolvedReference(name.to_string()));
            }
        }

        info!(%campaign_id, entity = name, "generating entity content");
        let basic = self.context.assemble(scope, ContextDepth::Basic).await?;
        let full_information = self
            .generation
            .text(
                SystemRole::GameDesigner,
                basic.prompt(&full_information_instruction(name, entity_type, extra_context)),
            )
            .await
            .step("entity information")?;

        let known_reply = self
            .generation
            .text(
                SystemRole::GameDesigner,
                basic.prompt(&known_information_instruction(name, &full_information)),
            )
            .await
            .step("entity known information")?;
        let known_information = if known_reply.trim().eq_ignore_ascii_case(NOTHING_KNOWN) {
            String::new()
        } else {
            known_reply
        };

        let entity_type = match entity_type {
            Some(t) => t,
            None => match self.classify(scope, name, &known_information, &full_information).await? {
                EntityClassification::Typed(t) => t,
                EntityClassification::Discarded => {
                    info!(%campaign_id, entity = name, "reference discarded by classification");
                    return Ok(Resolution::Discarded);
                }
            },
        };

        let known_to_player = !known_information.trim().is_empty();
        let entity = Entity::new(campaign_id, name, entity_type)
            .with_information(full_information, known_information)
            .with_known_to_player(known_to_player);

        match self.repository.insert_entity(entity.clone()).await {
            Ok(()) => {
                info!(%campaign_id, entity = %entity.name, entity_type = %entity.entity_type, "created entity");
                Ok(Resolution::Created(entity))
            }
            Err(RepositoryError::Conflict { existing, .. }) => {
                debug!(%campaign_id, entity = name, "entity created concurrently");
                Ok(Resolution::Existing(self.repository.get_entity(existing).await?))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Assign a tracked kind to a reference, or discard it.
    pub async fn classify(
        &self,
        scope: &CampaignScope,
        name: &str,
        known_information: &str,
        full_information: &str,
    ) -> Result<EntityClassification, EngineError> {
        let info = if known_information.trim().is_empty() {
            full_information
        } else {
            known_information
        };
        let context = self.context.assemble(scope, ContextDepth::Located).await?;
        let reply: EntityKindAnswer = self
            .generation
            .structured(
                SystemRole::GameMaster,
                context.prompt(&format!(
                    "<entity info>\n{info}\n</entity info>\n\
                     Based on the entity info, what type of entity is \"{name}\"?\n\n\
                     - LOCATION: a physical place where characters could be present\n\
                     - NPC: any character with dialogue, motives and background, including \
                     animals, ghosts and machines\n\
                     - GROUP: an organization or union of characters\n\
                     - OBJECT: an inanimate thing with lore that can be held\n\
                     - OTHER: anything else, such as concepts or generic terms"
                )),
            )
            .await
            .step("entity classification")?;
        Ok(reply.entity_type.into())
    }

    /// Apply deltas from play. Deltas with an id patch that entity; deltas
    /// without one insert a new entity. Invalid deltas are skipped.
    pub async fn apply_updates(
        &self,
        campaign_id: CampaignId,
        updates: Vec<EntityDelta>,
    ) -> Result<UpdateReport, EngineError> {
        let mut report = UpdateReport::default();

        for delta in updates {
            let target = match delta.id {
                Some(id) => match self.repository.get_entity(id).await {
                    Ok(entity) if entity.campaign_id == campaign_id => Some(entity),
                    Ok(_) | Err(RepositoryError::NotFound { .. }) => {
                        warn!(%campaign_id, entity_id = %id, "update for unknown entity skipped");
                        report.skipped += 1;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                },
                None => None,
            };

            if let Some(mut entity) = target {
                entity.apply_delta(&delta);
                self.save_patched(campaign_id, entity, &mut report).await?;
                continue;
            }

            let Some(entity) = delta.into_entity(campaign_id) else {
                warn!(%campaign_id, ?delta, "new entity without name or type skipped");
                report.skipped += 1;
                continue;
            };

            match self.repository.insert_entity(entity).await {
                Ok(()) => report.created += 1,
                Err(RepositoryError::Conflict { existing, .. }) => {
                    // Same name as a stored entity: patch it, but its kind stays.
                    let mut entity = self.repository.get_entity(existing).await?;
                    entity.apply_delta(&EntityDelta {
                        id: None,
                        name: None,
                        entity_type: None,
                        ..delta
                    });
                    self.save_patched(campaign_id, entity, &mut report).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(report)
    }

    async fn save_patched(
        &self,
        campaign_id: CampaignId,
        mut entity: Entity,
        report: &mut UpdateReport,
    ) -> Result<(), EngineError> {
        backfill_full_information(&mut entity);
        match self.repository.save_entity(&entity).await {
            Ok(()) => report.updated += 1,
            Err(RepositoryError::Conflict { name, .. }) => {
                warn!(%campaign_id, entity = %entity.name, clash = %name, "update would duplicate a name, skipped");
                report.skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn describe_for_matching(&self, entity: &Entity) -> String {
        let mut line = format!("- \"{}\" ({})", entity.name, entity.entity_type);
        if !entity.aliases.is_empty() {
            line.push_str(&format!(" also known as {}", entity.aliases.join(", ")));
        }
        let preview = entity.info_preview(self.info_preview_chars);
        if !preview.is_empty() {
            line.push_str(": ");
            line.push_str(&preview);
        }
        line
    }
}

/// Render resolved entities for a player-facing prompt.
pub fn entity_context(entities: &[Entity]) -> PromptContext {
    let mut context = PromptContext::new();
    for entity in entities {
        context.push(
            format!("{} {}", entity.entity_type.name().to_lowercase(), entity.name),
            format!(
                "<full information>\n{}\n</full information>\n<known information>\n{}\n</known information>",
                entity.full_information.trim(),
                entity.known_information.trim()
            ),
        );
    }
    context
}

fn backfill_full_information(entity: &mut Entity) {
    if !entity.knowledge_is_consistent() {
        entity.full_information = entity.known_information.clone();
    }
}

fn full_information_instruction(
    name: &str,
    entity_type: Option<EntityType>,
    extra_context: Option<&str>,
) -> String {
    let subject = match entity_type {
        Some(t) => format!("{t} : {name}"),
        None => name.to_string(),
    };
    let mut instruction = format!("Give me background content for {subject}.\n");
    match entity_type {
        Some(EntityType::Location) => instruction.push_str(
            "This is a single location that should not have multiple sections or rooms.\n\
             * What does it look like?\n\
             * Which NPCs are here?\n",
        ),
        Some(EntityType::Npc) => instruction.push_str(
            "* What do they look like and how do they behave?\n\
             * What do they want, and what are they hiding?\n",
        ),
        Some(EntityType::Group) => instruction.push_str(
            "* Who belongs to it and what does it want?\n\
             * How does it relate to the rest of the campaign?\n",
        ),
        Some(EntityType::Object) => instruction.push_str(
            "* What does it look like and what does it do?\n\
             * Where did it come from?\n",
        ),
        None => {}
    }
    if let Some(extra) = extra_context.filter(|e| !e.trim().is_empty()) {
        instruction.push_str(&format!("Additional context: {}\n", extra.trim()));
    }
    instruction.push_str("Come up with new content that is consistent with the existing campaign context.");
    instruction
}

fn known_information_instruction(name: &str, full_information: &str) -> String {
    format!(
        "<entity info>\n{full_information}\n</entity info>\n\
         Based only on the entity info above, what would the player characters know about \
         \"{name}\"? Include only things they could directly sense (see, hear, feel) or that \
         would be common knowledge in this world. Do not add anything that is not in the \
         entity info. If they would know nothing, reply with exactly {NOTHING_KNOWN}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_instruction() {
        let text = full_information_instruction(
            "Sky Dock",
            Some(EntityType::Location),
            Some("starting location"),
        );
        assert!(text.starts_with("Give me background content for LOCATION : Sky Dock."));
        assert!(text.contains("multiple sections or rooms"));
        assert!(text.contains("Additional context: starting location"));
    }

    #[test]
    fn test_untyped_instruction_has_no_type_prompts() {
        let text = full_information_instruction("the Veil", None, None);
        assert!(text.starts_with("Give me background content for the Veil."));
        assert!(!text.contains("Additional context"));
    }

    #[test]
    fn test_entity_context_labels() {
        let entity = Entity::new(CampaignId::new(), "Mira", EntityType::Npc)
            .with_information("A spy.", "A baker.");
        let context = entity_context(&[entity]);
        let body = context.get("npc Mira").unwrap();
        assert!(body.contains("A spy."));
        assert!(body.contains("A baker."));
    }
}
