#![allow(dead_code)]

use std::sync::Arc;

use common_session::{
    AuthenticatedClient, Identity, InMemoryPersistence, SessionConfig, SessionSnapshot,
    SessionStore,
};
use httpmock::MockServer;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn identity_body(roles: &[&str]) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "name": "Asha Menon",
        "email": "asha@campus.test",
        "roles": roles,
        "is_active": true
    })
}

pub fn config(server: &MockServer) -> SessionConfig {
    SessionConfig::new(server.base_url())
}

/// Store seeded as if restored from an earlier run.
pub fn seeded_store(
    access: Option<&str>,
    refresh: Option<&str>,
    roles: &[&str],
) -> (Arc<SessionStore>, InMemoryPersistence) {
    let identity = (!roles.is_empty())
        .then(|| Identity::new(Uuid::new_v4(), "Asha Menon", roles.iter().copied()));
    let persistence = InMemoryPersistence::with_snapshot(SessionSnapshot {
        current_role: identity.as_ref().and_then(|id| id.roles.first().cloned()),
        is_authenticated: identity.is_some() && access.is_some(),
        identity,
        access_token: access.map(str::to_string),
        refresh_token: refresh.map(str::to_string),
    });
    let store = Arc::new(SessionStore::new(Arc::new(persistence.clone())));
    store.restore().expect("restore seeded session");
    (store, persistence)
}

pub fn client(server: &MockServer, store: Arc<SessionStore>) -> AuthenticatedClient {
    AuthenticatedClient::new(config(server), store).expect("client")
}
