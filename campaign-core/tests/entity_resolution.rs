//! Entity resolution and update tests.
//!
//! These verify:
//! - `get_or_create` is idempotent, including under concurrent callers
//! - Known information stays within full information
//! - Partial deltas leave untouched fields alone
//! - Ambiguous references fail closed
//! - Location refresh only registers locations

use campaign_core::model::{CampaignId, Entity, EntityDelta, EntityId, EntityType};
use campaign_core::testing::{
    assert_has_entity, assert_knowledge_subset, assert_no_entity, Rule, TestHarness,
    START_LOCATION, START_LOCATION_FULL, START_LOCATION_KNOWN,
};
use campaign_core::{CampaignScope, EngineError, Repository, Resolution};
use serde_json::json;

const VAULT_FULL: &str =
    "A round iron door under the mint. The lock resets during the eclipse. Two golems guard it.";
const VAULT_KNOWN: &str = "A round iron door under the mint.";

fn script_vault(harness: &TestHarness) {
    harness
        .expect(Rule::json(json!({ "found_match": false })).for_schema("match_entity"))
        .expect(Rule::text(VAULT_FULL).containing("Give me background content for LOCATION : Guild Vault"))
        .expect(Rule::text(VAULT_KNOWN).containing("know about \"Guild Vault\""));
}

// =============================================================================
// GET OR CREATE
// =============================================================================

#[tokio::test]
async fn test_get_or_create_is_idempotent() {
    let harness = TestHarness::new();
    script_vault(&harness);
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();
    let resolver = harness.engine.resolver();

    let first = resolver
        .get_or_create(&scope, "Guild Vault", Some(EntityType::Location), None)
        .await
        .unwrap();
    let second = resolver
        .get_or_create(&scope, "guild  vault", Some(EntityType::Location), None)
        .await
        .unwrap();

    let Resolution::Created(created) = first else {
        panic!("expected a new entity, got {first:?}");
    };
    let Resolution::Existing(existing) = second else {
        panic!("expected the stored entity, got {second:?}");
    };
    assert_eq!(created.id, existing.id);
    assert_eq!(harness.entities(id).await.len(), 2);
    assert_eq!(
        harness
            .generator
            .prompt_calls("Give me background content for LOCATION : Guild Vault"),
        1
    );
}

#[tokio::test]
async fn test_concurrent_get_or_create_stores_one_entity() {
    let harness = TestHarness::new();
    script_vault(&harness);
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();
    let resolver = harness.engine.resolver();

    let (a, b) = tokio::join!(
        resolver.get_or_create(&scope, "Guild Vault", Some(EntityType::Location), None),
        resolver.get_or_create(&scope, "Guild Vault", Some(EntityType::Location), None),
    );

    let a = a.unwrap().into_entity().unwrap();
    let b = b.unwrap().into_entity().unwrap();
    assert_eq!(a.id, b.id);
    let vaults: Vec<Entity> = harness
        .entities(id)
        .await
        .into_iter()
        .filter(|e| e.matches_name("Guild Vault"))
        .collect();
    assert_eq!(vaults.len(), 1);
}

#[tokio::test]
async fn test_generated_knowledge_is_subset_of_full() {
    let harness = TestHarness::new();
    script_vault(&harness);
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();

    let vault = harness
        .engine
        .resolver()
        .get_or_create(&scope, "Guild Vault", Some(EntityType::Location), None)
        .await
        .unwrap()
        .into_entity()
        .unwrap();

    assert_eq!(vault.full_information, VAULT_FULL);
    assert_eq!(vault.known_information, VAULT_KNOWN);
    assert!(vault.known_to_player);
    for entity in harness.entities(id).await {
        assert_knowledge_subset(&entity);
    }
}

#[tokio::test]
async fn test_empty_reference_is_unresolved() {
    let harness = TestHarness::new();
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();

    let err = harness
        .engine
        .resolver()
        .get_or_create(&scope, "  ", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnresolvedReference(_)));
    assert_eq!(harness.generator.call_count(), 0);
}

#[tokio::test]
async fn test_failed_generation_stores_nothing() {
    let harness = TestHarness::new();
    harness
        .expect(Rule::json(json!({ "found_match": false })).for_schema("match_entity"))
        .expect(Rule::text(VAULT_FULL).containing("Give me background content"));
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();

    // No rule answers the known-information prompt.
    let err = harness
        .engine
        .resolver()
        .get_or_create(&scope, "Guild Vault", Some(EntityType::Location), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::GenerationUnavailable {
            step: "entity known information",
            ..
        }
    ));
    assert_no_entity(&harness.entities(id).await, "Guild Vault");
}

// =============================================================================
// REFERENCE MATCHING
// =============================================================================

#[tokio::test]
async fn test_fuzzy_reference_matches_known_entity() {
    let harness = TestHarness::new();
    harness.expect(
        Rule::json(json!({ "found_match": true, "matched_entity": "the sky dock" }))
            .for_schema("match_entity"),
    );
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();

    let found = harness
        .engine
        .resolver()
        .resolve_reference(&scope, "the landing platform")
        .await
        .unwrap();

    assert_eq!(found, scope.campaign.current_location_id);
    let calls = harness.generator.calls();
    assert!(calls[0].prompt.contains("<master entity list>"));
    assert!(calls[0].prompt.contains("\"The Sky Dock\" (LOCATION)"));
}

#[tokio::test]
async fn test_ambiguous_match_fails_closed() {
    let harness = TestHarness::new();
    harness.expect(
        Rule::json(json!({ "found_match": true, "matched_entity": "The Sky Dock", "ambiguous": true }))
            .for_schema("match_entity"),
    );
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();

    let found = harness
        .engine
        .resolver()
        .resolve_reference(&scope, "the dock")
        .await
        .unwrap();
    assert_eq!(found, None);
}

#[tokio::test]
async fn test_match_to_unknown_name_fails_closed() {
    let harness = TestHarness::new();
    harness.expect(
        Rule::json(json!({ "found_match": true, "matched_entity": "The Moon Dock" }))
            .for_schema("match_entity"),
    );
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();

    let found = harness
        .engine
        .resolver()
        .resolve_reference(&scope, "the dock")
        .await
        .unwrap();
    assert_eq!(found, None);
}

/// A campaign whose saved state has two entities answering to "Quill".
async fn harness_with_two_quills() -> (TestHarness, CampaignId) {
    let seed = TestHarness::new();
    let (id, _) = seed.running_campaign(&["Mira"]).await;
    let mut snapshot = seed.repository.snapshot().await;
    snapshot
        .entities
        .push(Entity::new(id, "Quill", EntityType::Npc).with_information("A dockmaster.", ""));
    snapshot.entities.push(
        Entity::new(id, "Old Sailor", EntityType::Npc)
            .with_alias("Quill")
            .with_information("A drunk.", ""),
    );
    (TestHarness::from_snapshot(snapshot), id)
}

#[tokio::test]
async fn test_duplicate_exact_matches_fail_closed() {
    let (harness, id) = harness_with_two_quills().await;

    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();
    let found = harness
        .engine
        .resolver()
        .resolve_reference(&scope, "quill")
        .await
        .unwrap();
    assert_eq!(found, None);
    assert_eq!(harness.generator.call_count(), 0);
}

#[tokio::test]
async fn test_get_or_create_does_not_pick_between_duplicates() {
    let (harness, id) = harness_with_two_quills().await;
    let before = harness.entities(id).await.len();

    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();
    let err = harness
        .engine
        .resolver()
        .get_or_create(&scope, "quill", Some(EntityType::Npc), None)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::UnresolvedReference(ref name) if name == "quill"));
    assert_eq!(harness.generator.call_count(), 0);
    assert_eq!(harness.entities(id).await.len(), before);
}

#[tokio::test]
async fn test_untyped_reference_is_classified() {
    let harness = TestHarness::new();
    harness
        .expect(Rule::json(json!({ "found_match": false })).for_schema("match_entity"))
        .expect(Rule::text("A smuggling crew of six.").containing("Give me background content for the Gulls"))
        .expect(Rule::text("NONE").containing("know about \"the Gulls\""))
        .expect(Rule::json(json!({ "entity_type": "GROUP" })).for_schema("classify_entity"));
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let scope = CampaignScope::load(harness.repository.as_ref(), id).await.unwrap();

    let gulls = harness
        .engine
        .resolver()
        .get_or_create(&scope, "the Gulls", None, None)
        .await
        .unwrap()
        .into_entity()
        .unwrap();

    assert_eq!(gulls.entity_type, EntityType::Group);
    assert!(gulls.known_information.is_empty());
    assert!(!gulls.known_to_player);

    // Classification sees the full information when players know nothing.
    let classify = harness
        .generator
        .calls()
        .into_iter()
        .find(|c| c.output.as_ref().is_some_and(|o| o.name == "classify_entity"))
        .unwrap();
    assert!(classify.prompt.contains("A smuggling crew of six."));
}

// =============================================================================
// UPDATES
// =============================================================================

#[tokio::test]
async fn test_partial_delta_round_trip() {
    let harness = TestHarness::new();
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let dock = harness.entities(id).await.remove(0);

    let delta = EntityDelta::for_entity(dock.id)
        .with_known_information("A windswept landing platform. Lanterns hang everywhere.");
    let report = harness
        .engine
        .resolver()
        .apply_updates(id, vec![delta])
        .await
        .unwrap();
    assert_eq!(report.updated, 1);

    let stored = harness.repository.get_entity(dock.id).await.unwrap();
    assert_eq!(
        stored.known_information,
        "A windswept landing platform. Lanterns hang everywhere."
    );
    assert_eq!(stored.name, dock.name);
    assert_eq!(stored.aliases, dock.aliases);
    assert_eq!(stored.entity_type, dock.entity_type);
    assert_eq!(stored.full_information, dock.full_information);
    assert_eq!(stored.known_to_player, dock.known_to_player);
}

#[tokio::test]
async fn test_updates_insert_patch_and_skip() {
    let harness = TestHarness::new();
    let (id, _) = harness.running_campaign(&["Mira"]).await;

    let updates = vec![
        EntityDelta::new_entity("Lantern Market", EntityType::Location)
            .with_known_information("Stalls of paper lanterns."),
        EntityDelta::new_entity("the sky dock", EntityType::Location).with_aliases(vec!["the pier".into()]),
        EntityDelta::for_entity(EntityId::new()).with_known_to_player(true),
        EntityDelta::default(),
    ];
    let report = harness
        .engine
        .resolver()
        .apply_updates(id, updates)
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 2);

    let entities = harness.entities(id).await;
    assert_has_entity(&entities, "Lantern Market");
    assert_has_entity(&entities, "the pier");
    let market = entities.iter().find(|e| e.name == "Lantern Market").unwrap();
    // Known information alone backfills the ground truth.
    assert_eq!(market.full_information, "Stalls of paper lanterns.");
    assert_knowledge_subset(market);
}

#[tokio::test]
async fn test_new_entity_with_taken_name_keeps_its_kind() {
    let harness = TestHarness::new();
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let quill = Entity::new(id, "Quill", EntityType::Npc).with_information("A dockmaster.", "");
    harness.repository.insert_entity(quill.clone()).await.unwrap();

    let report = harness
        .engine
        .resolver()
        .apply_updates(
            id,
            vec![EntityDelta::new_entity("quill", EntityType::Location)
                .with_known_information("A dockmaster.")],
        )
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    let stored = harness.repository.get_entity(quill.id).await.unwrap();
    assert_eq!(stored.entity_type, EntityType::Npc);
    assert_eq!(stored.name, "Quill");
    assert_eq!(stored.known_information, "A dockmaster.");
}

#[tokio::test]
async fn test_rename_onto_taken_name_is_skipped() {
    let harness = TestHarness::new();
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let dock_id = harness.campaign(id).await.current_location_id.unwrap();
    let quill = Entity::new(id, "Quill", EntityType::Npc).with_information("A dockmaster.", "");
    harness.repository.insert_entity(quill).await.unwrap();

    let mut rename = EntityDelta::for_entity(dock_id);
    rename.name = Some("Quill".into());
    let report = harness
        .engine
        .resolver()
        .apply_updates(id, vec![rename])
        .await
        .unwrap();

    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped, 1);
    let dock = harness.repository.get_entity(dock_id).await.unwrap();
    assert_eq!(dock.name, START_LOCATION);
}

// =============================================================================
// LOCATION REFRESH
// =============================================================================

#[tokio::test]
async fn test_refresh_locations_only_registers_locations() {
    let harness = TestHarness::new();
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let dock_id = harness.campaign(id).await.current_location_id.unwrap();

    harness.expect(
        Rule::json(json!({
            "entities": [
                {
                    "id": dock_id.to_string(),
                    "entity_type": "NPC",
                    "updated_known_information": format!("{START_LOCATION_KNOWN} Lanterns hang everywhere."),
                    "updated_full_information": format!("{START_LOCATION_FULL} Lanterns hang everywhere."),
                },
                {
                    "name": "Lantern Market",
                    "entity_type": "LOCATION",
                    "updated_full_information": "Stalls of paper lanterns. A fence works the back row.",
                    "updated_known_information": "Stalls of paper lanterns.",
                    "known_to_players": true
                },
                {
                    "name": "Quill",
                    "entity_type": "NPC",
                    "updated_full_information": "A dockmaster."
                },
                {
                    "id": EntityId::new().to_string(),
                    "updated_known_information": "Nothing."
                },
                {
                    "id": "not-an-id",
                    "name": "Broken"
                }
            ]
        }))
        .for_schema("update_entities"),
    );

    let report = harness.engine.refresh_locations(id).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped, 3);

    let entities = harness.entities(id).await;
    assert_has_entity(&entities, "Lantern Market");
    assert_no_entity(&entities, "Quill");
    let dock = entities.iter().find(|e| e.name == START_LOCATION).unwrap();
    assert_eq!(dock.entity_type, EntityType::Location);
    assert!(dock.known_information.ends_with("Lanterns hang everywhere."));
    for entity in &entities {
        assert_knowledge_subset(entity);
    }

    let call = harness.generator.calls().remove(0);
    assert!(call.prompt.contains("<known locations>"));
    assert!(call.prompt.contains(&dock_id.to_string()));
}

#[tokio::test]
async fn test_refresh_leaves_npcs_with_location_names_alone() {
    let harness = TestHarness::new();
    let (id, _) = harness.running_campaign(&["Mira"]).await;
    let quill = Entity::new(id, "Quill", EntityType::Npc)
        .with_information("A dockmaster who takes bribes.", "A dockmaster.");
    harness.repository.insert_entity(quill.clone()).await.unwrap();

    harness.expect(
        Rule::json(json!({
            "entities": [{
                "name": "Quill",
                "entity_type": "LOCATION",
                "updated_full_information": "A tavern called Quill."
            }]
        }))
        .for_schema("update_entities"),
    );

    let report = harness.engine.refresh_locations(id).await.unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.created, 0);
    assert_eq!(report.skipped, 1);

    let stored = harness.repository.get_entity(quill.id).await.unwrap();
    assert_eq!(stored, quill);
}

#[tokio::test]
async fn test_refresh_requires_running() {
    let harness = TestHarness::new();
    let (id, _) = harness.campaign_with_players(&["Mira"]).await;

    let err = harness.engine.refresh_locations(id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}
