use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common_observability::SessionMetrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::AuthenticatedClient;
use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::guard::{NavigationGuard, NavigationOutcome};
use crate::identity::{Identity, IdentityProvider};
use crate::permissions::{HttpPermissionAuthority, PermissionAuthority, RoutePermissionResolver};
use crate::persistence::SessionPersistence;
use crate::roles::Role;
use crate::routes::{AvailableRoutes, RouteNode};
use crate::store::{CredentialPair, SessionStore};

/// Result of an explicit role change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChange {
    pub role: Role,
    /// Re-check of the page that was open when the role changed, if any.
    pub location: Option<NavigationOutcome>,
}

/// Parts of the session the available-route set depends on.
type RouteKey = (Option<(Uuid, Vec<Role>)>, Option<Role>);

/// Wires the session components together and keeps the available-route set
/// in step with the signed-in identity and its active role.
pub struct SessionRuntime {
    config: SessionConfig,
    store: Arc<SessionStore>,
    client: Arc<AuthenticatedClient>,
    guard: NavigationGuard,
    routes: AvailableRoutes,
    /// Last path the guard authorized.
    location: Mutex<Option<String>>,
    metrics: Option<SessionMetrics>,
}

impl SessionRuntime {
    pub fn new(
        config: SessionConfig,
        persistence: Arc<dyn SessionPersistence>,
        route_tree: Vec<RouteNode>,
    ) -> SessionResult<Self> {
        Self::build(config, persistence, route_tree, None)
    }

    pub fn with_metrics(
        config: SessionConfig,
        persistence: Arc<dyn SessionPersistence>,
        route_tree: Vec<RouteNode>,
        metrics: SessionMetrics,
    ) -> SessionResult<Self> {
        Self::build(config, persistence, route_tree, Some(metrics))
    }

    fn build(
        config: SessionConfig,
        persistence: Arc<dyn SessionPersistence>,
        route_tree: Vec<RouteNode>,
        metrics: Option<SessionMetrics>,
    ) -> SessionResult<Self> {
        let store = Arc::new(SessionStore::new(persistence));
        let client = match &metrics {
            Some(metrics) => {
                AuthenticatedClient::with_metrics(config.clone(), store.clone(), metrics.clone())?
            }
            None => AuthenticatedClient::new(config.clone(), store.clone())?,
        };
        let client = Arc::new(client);
        let authority: Arc<dyn PermissionAuthority> =
            Arc::new(HttpPermissionAuthority::new(client.clone()));
        Ok(Self::from_parts(
            config, store, client, authority, route_tree, metrics,
        ))
    }

    /// Assemble a runtime around an existing store, client and permission authority.
    pub fn from_parts(
        config: SessionConfig,
        store: Arc<SessionStore>,
        client: Arc<AuthenticatedClient>,
        authority: Arc<dyn PermissionAuthority>,
        route_tree: Vec<RouteNode>,
        metrics: Option<SessionMetrics>,
    ) -> Self {
        let mut resolver = RoutePermissionResolver::new(authority);
        if let Some(metrics) = &metrics {
            resolver = resolver.with_metrics(metrics.clone());
        }
        let identity: Arc<dyn IdentityProvider> = client.clone();
        let mut guard = NavigationGuard::new(store.clone(), identity, resolver, config.clone());
        if let Some(metrics) = &metrics {
            guard = guard.with_metrics(metrics.clone());
        }
        Self {
            config,
            store,
            client,
            guard,
            routes: AvailableRoutes::new(route_tree),
            location: Mutex::new(None),
            metrics,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn client(&self) -> &Arc<AuthenticatedClient> {
        &self.client
    }

    pub fn guard(&self) -> &NavigationGuard {
        &self.guard
    }

    pub fn routes(&self) -> &AvailableRoutes {
        &self.routes
    }

    pub fn metrics(&self) -> Option<&SessionMetrics> {
        self.metrics.as_ref()
    }

    /// Path of the page currently open, as last authorized by [`Self::navigate`].
    pub fn location(&self) -> Option<String> {
        self.location_slot().clone()
    }

    /// Restore the persisted session and validate it against the identity service.
    ///
    /// Returns whether a usable session is active afterwards.
    pub async fn start(&self) -> bool {
        match self.store.restore() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                warn!(error = %err, "session_restore_failed");
                return false;
            }
        }

        if let Err(err) = self.store.refresh_identity(self.client.as_ref()).await {
            info!(error = %err, "restored_session_rejected");
            self.routes.clear();
            return false;
        }
        self.sync_routes().await;
        self.store.is_authenticated()
    }

    pub async fn login(&self, credentials: CredentialPair) -> SessionResult<Identity> {
        self.reset_authorization();
        self.location_slot().take();
        let identity = match self
            .store
            .authenticate(credentials, self.client.as_ref())
            .await
        {
            Ok(identity) => identity,
            Err(err) => {
                self.routes.clear();
                return Err(err);
            }
        };
        self.sync_routes().await;
        Ok(identity)
    }

    /// Switch the active role.
    ///
    /// Returns `None` if the role is not held or already active. Otherwise the
    /// routes are recomputed and the open page is checked again under the
    /// new role.
    pub async fn set_current_role(&self, role: &Role) -> Option<RoleChange> {
        if !self.store.set_current_role(role) {
            return None;
        }
        self.guard.clear_grant();
        self.sync_routes().await;

        let location = match self.location() {
            Some(path) => {
                let outcome = self.navigate(&path).await;
                debug!(path = %path, role = %role, outcome = ?outcome, "location_rechecked");
                Some(outcome)
            }
            None => None,
        };
        Some(RoleChange {
            role: role.clone(),
            location,
        })
    }

    pub async fn switch_to_allowed_role(&self, target: &str) -> Option<Role> {
        let before = self.store.current_role();
        let role = self.guard.switch_to_allowed_role(target).await?;
        if before.as_ref() != Some(&role) {
            self.sync_routes().await;
        }
        Some(role)
    }

    pub async fn navigate(&self, path: &str) -> NavigationOutcome {
        let before = self.route_key();
        let outcome = self.guard.check(path).await;
        let settled = match &outcome {
            NavigationOutcome::Superseded { .. } => false,
            NavigationOutcome::SignIn { .. } => {
                self.location_slot().take();
                self.routes.clear();
                false
            }
            NavigationOutcome::Authorized { path } => {
                *self.location_slot() = Some(path.clone());
                true
            }
            NavigationOutcome::Denied { .. } => {
                self.location_slot().take();
                true
            }
        };
        if settled && before != self.route_key() {
            self.sync_routes().await;
        }
        outcome
    }

    pub fn logout(&self) {
        self.store.logout();
        self.reset_authorization();
        self.guard.supersede_pending();
        self.location_slot().take();
        self.routes.clear();
    }

    fn route_key(&self) -> RouteKey {
        let identity = self
            .store
            .identity()
            .map(|identity| (identity.id, identity.roles));
        (identity, self.store.current_role())
    }

    fn location_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.location.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sync_routes(&self) {
        if !self.store.is_authenticated() {
            self.routes.clear();
            return;
        }
        if let Err(err) = self.routes.recompute(self.client.as_ref()).await {
            warn!(error = %err, "available_routes_refresh_failed");
            self.routes.clear();
        }
    }

    fn reset_authorization(&self) {
        self.guard.resolver().invalidate_all();
        self.guard.clear_grant();
    }
}
