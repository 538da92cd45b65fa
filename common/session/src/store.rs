use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::identity::{Identity, IdentityProvider};
use crate::persistence::{SessionPersistence, SessionSnapshot};
use crate::roles::Role;

const EVENT_CAPACITY: usize = 64;

/// Tokens handed over by the sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Pair without a refresh token; an expired access token ends the session.
    pub fn access_only(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }
}

/// Change notifications published by [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { identity_id: Uuid },
    IdentityRefreshed { identity_id: Uuid },
    RoleChanged { from: Option<Role>, to: Role },
    TokenRefreshed,
    LoggedOut,
}

#[derive(Debug, Default)]
struct SessionState {
    identity: Option<Identity>,
    roles: Vec<Role>,
    current_role: Option<Role>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl SessionState {
    fn is_empty(&self) -> bool {
        self.identity.is_none()
            && self.roles.is_empty()
            && self.current_role.is_none()
            && self.access_token.is_none()
            && self.refresh_token.is_none()
    }

    fn is_authenticated(&self) -> bool {
        self.identity.is_some() && self.access_token.is_some()
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            identity: self.identity.clone(),
            current_role: self.current_role.clone(),
            is_authenticated: self.is_authenticated(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Single source of truth for the signed-in session.
///
/// All mutations go through this type so `current_role` is always one of
/// `roles` (or unset). Every mutation is written through to the configured
/// [`SessionPersistence`] and announced on the event channel.
pub struct SessionStore {
    state: RwLock<SessionState>,
    persistence: Arc<dyn SessionPersistence>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(SessionState::default()),
            persistence,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Seed the store from the persisted snapshot. Returns whether anything was restored.
    pub fn restore(&self) -> SessionResult<bool> {
        let Some(snapshot) = self.persistence.load()? else {
            return Ok(false);
        };

        let roles = snapshot
            .identity
            .as_ref()
            .map(|identity| identity.roles.clone())
            .unwrap_or_default();
        let current_role = snapshot.current_role.filter(|role| roles.contains(role));

        let mut state = self.write();
        *state = SessionState {
            identity: snapshot.identity,
            roles,
            current_role,
            access_token: snapshot.access_token,
            refresh_token: snapshot.refresh_token,
        };
        debug!(
            authenticated = state.is_authenticated(),
            current_role = ?state.current_role,
            "session_restored"
        );
        Ok(!state.is_empty())
    }

    /// Store the credentials, then resolve and adopt the identity behind them.
    ///
    /// On any failure the store is left logged out.
    pub async fn authenticate(
        &self,
        credentials: CredentialPair,
        identity_service: &dyn IdentityProvider,
    ) -> SessionResult<Identity> {
        {
            let mut state = self.write();
            *state = SessionState {
                access_token: Some(credentials.access_token.clone()),
                refresh_token: credentials.refresh_token,
                ..SessionState::default()
            };
        }

        let identity = match identity_service.fetch_identity().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "authenticate_identity_fetch_failed");
                self.logout();
                return Err(match err {
                    SessionError::IdentityFetch(message) => SessionError::IdentityFetch(message),
                    other => SessionError::IdentityFetch(other.to_string()),
                });
            }
        };
        if identity.roles.is_empty() {
            warn!(user_id = %identity.id, "authenticate_identity_without_roles");
            self.logout();
            return Err(SessionError::IdentityFetch(
                "identity holds no roles".to_string(),
            ));
        }

        let snapshot = {
            let mut state = self.write();
            if state.access_token.is_none() {
                drop(state);
                return Err(SessionError::IdentityFetch(
                    "session ended while authenticating".to_string(),
                ));
            }
            state.roles = identity.roles.clone();
            state.current_role = identity.roles.first().cloned();
            state.identity = Some(identity.clone());
            state.snapshot()
        };
        self.persist(&snapshot);

        info!(
            user_id = %identity.id,
            roles = ?identity.roles,
            "session_authenticated"
        );
        self.emit(SessionEvent::Authenticated {
            identity_id: identity.id,
        });
        Ok(identity)
    }

    /// Re-fetch the identity with the stored credentials; a rejection logs the session out.
    pub async fn refresh_identity(
        &self,
        identity_service: &dyn IdentityProvider,
    ) -> SessionResult<Identity> {
        {
            let state = self.read();
            if state.access_token.is_none() && state.refresh_token.is_none() {
                drop(state);
                self.logout();
                return Err(SessionError::SessionExpired);
            }
        }

        let identity = match identity_service.fetch_identity().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "refresh_identity_failed");
                self.logout();
                return Err(if err.is_session_terminal() {
                    err
                } else {
                    SessionError::IdentityFetch(err.to_string())
                });
            }
        };
        if identity.roles.is_empty() {
            warn!(user_id = %identity.id, "refresh_identity_without_roles");
            self.logout();
            return Err(SessionError::IdentityFetch(
                "identity holds no roles".to_string(),
            ));
        }

        let (snapshot, role_change) = {
            let mut state = self.write();
            if state.access_token.is_none() {
                drop(state);
                return Err(SessionError::SessionExpired);
            }
            let previous = state.current_role.clone();
            // An unset role stays unset; the navigation guard assigns one.
            let next = match previous.as_ref() {
                Some(role) if identity.has_role(role) => Some(role.clone()),
                Some(_) => identity.roles.first().cloned(),
                None => None,
            };
            state.roles = identity.roles.clone();
            state.current_role = next.clone();
            state.identity = Some(identity.clone());
            let change = match next {
                Some(to) if previous.as_ref() != Some(&to) => Some(SessionEvent::RoleChanged {
                    from: previous,
                    to,
                }),
                _ => None,
            };
            (state.snapshot(), change)
        };
        self.persist(&snapshot);

        debug!(user_id = %identity.id, "identity_refreshed");
        self.emit(SessionEvent::IdentityRefreshed {
            identity_id: identity.id,
        });
        if let Some(event) = role_change {
            self.emit(event);
        }
        Ok(identity)
    }

    /// Make `role` the active role. Returns `true` when the active role changed.
    ///
    /// Roles the identity does not hold are ignored.
    pub fn set_current_role(&self, role: &Role) -> bool {
        let (snapshot, previous) = {
            let mut state = self.write();
            if !state.roles.contains(role) {
                debug!(role = %role, held = ?state.roles, "set_current_role_ignored");
                return false;
            }
            if state.current_role.as_ref() == Some(role) {
                return false;
            }
            let previous = state.current_role.replace(role.clone());
            (state.snapshot(), previous)
        };
        self.persist(&snapshot);

        info!(from = ?previous, to = %role, "current_role_changed");
        self.emit(SessionEvent::RoleChanged {
            from: previous,
            to: role.clone(),
        });
        true
    }

    /// Replace the access token after a successful refresh.
    ///
    /// Only written while the session still holds `refresh_token`, the token
    /// the refresh was issued with. Returns `false` when the session was
    /// logged out or replaced in the meantime.
    pub fn set_access_token_if(&self, refresh_token: &str, token: impl Into<String>) -> bool {
        let snapshot = {
            let mut state = self.write();
            if state.refresh_token.as_deref() != Some(refresh_token) {
                return false;
            }
            state.access_token = Some(token.into());
            state.snapshot()
        };
        self.persist(&snapshot);
        self.emit(SessionEvent::TokenRefreshed);
        true
    }

    /// Clear every session field. Returns `false` if there was nothing to clear.
    pub fn logout(&self) -> bool {
        {
            let mut state = self.write();
            if state.is_empty() {
                return false;
            }
            *state = SessionState::default();
        }
        if let Err(err) = self.persistence.clear() {
            warn!(error = %err, "session_snapshot_clear_failed");
        }
        info!("session_logged_out");
        self.emit(SessionEvent::LoggedOut);
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read().snapshot()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read().identity.clone()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.read().roles.clone()
    }

    pub fn current_role(&self) -> Option<Role> {
        self.read().current_role.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    fn persist(&self, snapshot: &SessionSnapshot) {
        if let Err(err) = self.persistence.save(snapshot) {
            warn!(error = %err, "session_snapshot_save_failed");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;
    use async_trait::async_trait;

    struct FixedIdentity(SessionResult<Identity>);

    #[async_trait]
    impl IdentityProvider for FixedIdentity {
        async fn fetch_identity(&self) -> SessionResult<Identity> {
            match &self.0 {
                Ok(identity) => Ok(identity.clone()),
                Err(err) => Err(SessionError::IdentityFetch(err.to_string())),
            }
        }
    }

    fn store() -> (SessionStore, InMemoryPersistence) {
        let persistence = InMemoryPersistence::new();
        (SessionStore::new(Arc::new(persistence.clone())), persistence)
    }

    fn identity(roles: &[&str]) -> Identity {
        Identity::new(Uuid::new_v4(), "Asha", roles.iter().copied())
    }

    #[tokio::test]
    async fn authenticate_adopts_first_role() {
        let (store, persistence) = store();
        let mut events = store.subscribe();
        let provider = FixedIdentity(Ok(identity(&["admin", "teacher"])));

        store
            .authenticate(CredentialPair::new("access", "refresh"), &provider)
            .await
            .expect("authenticated");

        assert!(store.is_authenticated());
        assert_eq!(store.current_role(), Some(Role::new("admin")));
        assert_eq!(store.roles().len(), 2);
        assert!(persistence.current().expect("saved").is_authenticated);
        assert!(matches!(
            events.recv().await.expect("event"),
            SessionEvent::Authenticated { .. }
        ));
    }

    #[tokio::test]
    async fn set_current_role_ignores_roles_not_held() {
        let (store, _) = store();
        let provider = FixedIdentity(Ok(identity(&["admin", "teacher"])));
        store
            .authenticate(CredentialPair::new("access", "refresh"), &provider)
            .await
            .expect("authenticated");

        assert!(!store.set_current_role(&Role::new("warden")));
        assert_eq!(store.current_role(), Some(Role::new("admin")));

        assert!(store.set_current_role(&Role::new("teacher")));
        assert!(!store.set_current_role(&Role::new("teacher")));
        assert_eq!(store.current_role(), Some(Role::new("teacher")));
    }

    #[tokio::test]
    async fn refreshed_token_is_dropped_once_the_session_is_gone() {
        let (store, persistence) = store();
        let provider = FixedIdentity(Ok(identity(&["admin"])));
        store
            .authenticate(CredentialPair::new("access", "refresh"), &provider)
            .await
            .expect("authenticated");

        assert!(!store.set_access_token_if("other", "rotated"));
        assert_eq!(store.access_token().as_deref(), Some("access"));

        assert!(store.set_access_token_if("refresh", "rotated"));
        assert_eq!(store.access_token().as_deref(), Some("rotated"));

        store.logout();
        assert!(!store.set_access_token_if("refresh", "late"));
        assert!(store.access_token().is_none());
        assert!(persistence.current().is_none());
    }

    #[test]
    fn logout_on_empty_session_is_silent() {
        let (store, _) = store();
        let mut events = store.subscribe();
        assert!(!store.logout());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_identity_keeps_held_role_and_replaces_dropped_one() {
        let (store, _) = store();
        let provider = FixedIdentity(Ok(identity(&["admin", "teacher"])));
        store
            .authenticate(CredentialPair::new("access", "refresh"), &provider)
            .await
            .expect("authenticated");
        store.set_current_role(&Role::new("teacher"));

        store.refresh_identity(&provider).await.expect("refreshed");
        assert_eq!(store.current_role(), Some(Role::new("teacher")));

        let demoted = FixedIdentity(Ok(identity(&["student"])));
        store.refresh_identity(&demoted).await.expect("refreshed");
        assert_eq!(store.current_role(), Some(Role::new("student")));
        assert_eq!(store.roles(), vec![Role::new("student")]);
    }

    #[tokio::test]
    async fn refresh_identity_without_credentials_expires() {
        let (store, _) = store();
        let provider = FixedIdentity(Ok(identity(&["admin"])));
        let err = store
            .refresh_identity(&provider)
            .await
            .expect_err("nothing to refresh");
        assert!(matches!(err, SessionError::SessionExpired));
    }
}
