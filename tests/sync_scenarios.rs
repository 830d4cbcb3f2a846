//! End-to-end scenarios over a real `ConfigStore` and an in-process fake of
//! ejabberd's HTTP admin API: a sync should converge a fresh document in one
//! pass, and a second sync over the converged result must be a no-op.

mod support;

use ejabberd_reconcile::config_store::ConfigStore;
use ejabberd_reconcile::document::{Document, GroupKey, Member, Room, UserId};
use ejabberd_reconcile::remote_api::RemoteApiClient;
use ejabberd_reconcile::sync_engine::{SyncAction, SyncEngine};
use support::FakeServer;

fn seeded_document() -> Document {
    let mut doc = Document::default_seed();
    doc.members.push(Member {
        name: "Alice".to_string(),
        user_id: UserId::parse("alice").unwrap(),
        groups: [GroupKey::owner()].into_iter().collect(),
    });
    doc.rooms.push(Room {
        name: "Officers".to_string(),
        room_id: None,
        members: [GroupKey::owner()].into_iter().collect(),
        admins: [GroupKey::owner()].into_iter().collect(),
        only_admins_can_speak: false,
    });
    doc
}

#[tokio::test]
async fn first_sync_converges_a_fresh_document() {
    let server = FakeServer::start().await;
    let api = RemoteApiClient::new(server.base_url.clone(), "example.org", "conference.example.org");
    let engine = SyncEngine::new(&api);

    let mut document = seeded_document();
    let outcome = engine.sync(&mut document).await.expect("sync succeeds");

    assert!(outcome.has_changes(), "a fresh document must produce changes");
    let created: Vec<_> = outcome
        .entries
        .iter()
        .filter(|e| e.action == SyncAction::Created)
        .collect();
    assert!(created.iter().any(|e| e.subject == "user/alice"));
    assert!(created.iter().any(|e| e.subject.starts_with("room/officers")));

    assert!(
        document.do_not_edit_state.managed_members.iter().any(|m| m.as_str() == "alice"),
        "tracking state must record the newly managed member"
    );
    assert!(
        document.do_not_edit_state.managed_rooms.iter().any(|r| r.as_str() == "officers"),
        "tracking state must record the newly managed room"
    );
    assert!(
        document.members.iter().all(|m| m.user_id.as_str() != Document::BOT_USER_ID),
        "the ghost bot member must not survive into the persisted document"
    );
}

#[tokio::test]
async fn second_sync_over_converged_state_is_idempotent() {
    let server = FakeServer::start().await;
    let api = RemoteApiClient::new(server.base_url.clone(), "example.org", "conference.example.org");
    let engine = SyncEngine::new(&api);

    let mut document = seeded_document();
    engine.sync(&mut document).await.expect("first sync succeeds");

    let outcome = engine.sync(&mut document).await.expect("second sync succeeds");

    assert!(
        !outcome.has_changes(),
        "a second sync over already-converged state must report only unchanged entries: {:?}",
        outcome.entries
    );
}

#[tokio::test]
async fn removing_a_managed_member_deletes_their_account_on_next_sync() {
    let server = FakeServer::start().await;
    let api = RemoteApiClient::new(server.base_url.clone(), "example.org", "conference.example.org");
    let engine = SyncEngine::new(&api);

    let mut document = seeded_document();
    engine.sync(&mut document).await.expect("first sync succeeds");

    document.members.retain(|m| m.user_id.as_str() != "alice");
    let outcome = engine.sync(&mut document).await.expect("second sync succeeds");

    assert!(
        outcome
            .entries
            .iter()
            .any(|e| e.subject == "user/alice" && e.action == SyncAction::Deleted),
        "a member removed from the document must be unregistered: {:?}",
        outcome.entries
    );
}

#[tokio::test]
async fn a_member_already_deregistered_out_of_band_still_gets_cleaned_up() {
    let server = FakeServer::start().await;
    let api = RemoteApiClient::new(server.base_url.clone(), "example.org", "conference.example.org");
    let engine = SyncEngine::new(&api);

    let mut document = seeded_document();
    engine.sync(&mut document).await.expect("first sync succeeds");

    // Simulate drift: alice is tracked as managed but the remote no longer
    // lists her as registered (e.g. an operator deregistered her by hand).
    // `delete_stale_users` must compute its candidate set from
    // `managed_members`, not from `registered_users`, or this cleanup never
    // runs and alice's roster/affiliation entries are orphaned forever.
    server.state.lock().unwrap().registered_users.retain(|u| u != "alice");

    document.members.retain(|m| m.user_id.as_str() != "alice");
    let outcome = engine.sync(&mut document).await.expect("second sync succeeds");

    assert!(
        outcome
            .entries
            .iter()
            .any(|e| e.subject == "user/alice" && e.action == SyncAction::Deleted),
        "a tracked member no longer registered on the remote must still be swept: {:?}",
        outcome.entries
    );
    assert!(
        !document.do_not_edit_state.managed_members.iter().any(|m| m.as_str() == "alice"),
        "tracking state must drop the deregistered member"
    );
}

#[tokio::test]
async fn config_store_round_trip_survives_a_full_sync() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());
    store.ensure_seeded().await.unwrap();

    let mut document = store.read().await.unwrap();
    document.members.push(Member {
        name: "Bob".to_string(),
        user_id: UserId::parse("bob").unwrap(),
        groups: [GroupKey::owner()].into_iter().collect(),
    });

    let server = FakeServer::start().await;
    let api = RemoteApiClient::new(server.base_url.clone(), "example.org", "conference.example.org");
    let engine = SyncEngine::new(&api);
    engine.sync(&mut document).await.expect("sync succeeds");

    let written = store.write(document).await.unwrap();
    let reloaded = store.read().await.unwrap();
    assert_eq!(reloaded.members.len(), written.members.len());
    assert_eq!(reloaded.members[0].user_id.as_str(), "bob");
}
