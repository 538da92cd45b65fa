mod support;

use std::sync::Arc;

use common_session::{
    CredentialPair, FilePersistence, Identity, InMemoryPersistence, Role, SessionError,
    SessionEvent, SessionPersistence, SessionSnapshot, SessionStore,
};
use httpmock::prelude::*;
use support::{client, identity_body};
use uuid::Uuid;

#[tokio::test]
async fn authenticate_rolls_back_when_identity_lookup_fails() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/users/me");
            then.status(500).body("directory offline");
        })
        .await;

    let persistence = InMemoryPersistence::new();
    let store = Arc::new(SessionStore::new(Arc::new(persistence.clone())));
    let client = client(&server, store.clone());

    let err = store
        .authenticate(CredentialPair::new("t1", "r1"), &client)
        .await
        .expect_err("identity failure");

    assert!(matches!(err, SessionError::IdentityFetch(_)));
    assert!(!store.is_authenticated());
    assert!(store.access_token().is_none());
    assert!(store.refresh_token().is_none());
    assert!(persistence.current().is_none());
}

#[tokio::test]
async fn authenticate_rejects_identity_without_roles() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/users/me");
            then.status(200).json_body(identity_body(&[]));
        })
        .await;

    let store = Arc::new(SessionStore::new(Arc::new(InMemoryPersistence::new())));
    let client = client(&server, store.clone());

    let err = store
        .authenticate(CredentialPair::access_only("t1"), &client)
        .await
        .expect_err("no roles");

    assert!(matches!(err, SessionError::IdentityFetch(_)));
    assert!(store.snapshot() == SessionSnapshot::default());
}

#[tokio::test]
async fn authenticate_sends_the_new_access_token() {
    let server = MockServer::start_async().await;
    let identity = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/users/me")
                .header("authorization", "Bearer fresh");
            then.status(200).json_body(identity_body(&["Librarian", "student"]));
        })
        .await;

    let store = Arc::new(SessionStore::new(Arc::new(InMemoryPersistence::new())));
    let client = client(&server, store.clone());
    store
        .authenticate(CredentialPair::new("fresh", "r1"), &client)
        .await
        .expect("authenticated");

    identity.assert_async().await;
    assert_eq!(store.current_role(), Some(Role::new("librarian")));
    assert_eq!(
        store.roles(),
        vec![Role::new("librarian"), Role::new("student")]
    );
}

#[tokio::test]
async fn logout_is_idempotent() {
    let (store, persistence) = support::seeded_store(Some("t1"), Some("r1"), &["admin"]);
    let mut events = store.subscribe();

    assert!(store.logout());
    assert!(!store.logout());

    assert_eq!(events.recv().await.expect("event"), SessionEvent::LoggedOut);
    assert!(events.try_recv().is_err());
    assert!(persistence.current().is_none());
}

#[test]
fn restore_drops_role_not_held_by_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let persistence = FilePersistence::new(dir.path().join("session.json"));
    persistence
        .save(&SessionSnapshot {
            identity: Some(Identity::new(Uuid::new_v4(), "Ravi", ["warden", "teacher"])),
            current_role: Some(Role::new("admin")),
            is_authenticated: true,
            access_token: Some("t1".into()),
            refresh_token: Some("r1".into()),
        })
        .expect("seed snapshot");

    let store = SessionStore::new(Arc::new(persistence));
    assert!(store.restore().expect("restore"));

    assert!(store.is_authenticated());
    assert_eq!(store.current_role(), None);
    assert_eq!(store.roles(), vec![Role::new("warden"), Role::new("teacher")]);
    assert_eq!(store.refresh_token().as_deref(), Some("r1"));
}

#[test]
fn restore_without_snapshot_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(Arc::new(FilePersistence::new(dir.path().join("none.json"))));
    assert!(!store.restore().expect("restore"));
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn role_changes_are_persisted_and_announced() {
    let (store, persistence) = support::seeded_store(Some("t1"), Some("r1"), &["admin", "teacher"]);
    let mut events = store.subscribe();

    assert!(store.set_current_role(&Role::new("teacher")));

    assert_eq!(
        events.recv().await.expect("event"),
        SessionEvent::RoleChanged {
            from: Some(Role::new("admin")),
            to: Role::new("teacher"),
        }
    );
    assert_eq!(
        persistence.current().and_then(|s| s.current_role),
        Some(Role::new("teacher"))
    );
}
