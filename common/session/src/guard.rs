//! Role-scoped navigation guard.
//!
//! Every navigation runs a small state machine: the session is re-validated,
//! a role is assigned if none is active, and the active role's permission
//! table decides. A successful [`NavigationGuard::switch_to_allowed_role`]
//! leaves a one-shot grant that lets the very next navigation to the same
//! path, under the same role, through without another check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common_observability::SessionMetrics;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::identity::IdentityProvider;
use crate::permissions::RoutePermissionResolver;
use crate::roles::Role;
use crate::routes::normalize_path;
use crate::store::SessionStore;

/// Result of a navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Authorized { path: String },
    /// The active role may not open `attempted`.
    Denied { attempted: String, redirect_to: String },
    /// No usable session; the user has to sign in again.
    SignIn { attempted: String, redirect_to: String },
    /// A newer navigation started before this one finished; discard it.
    Superseded { id: u64 },
}

impl NavigationOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, NavigationOutcome::Authorized { .. })
    }

    pub fn redirect(&self) -> Option<&str> {
        match self {
            NavigationOutcome::Denied { redirect_to, .. }
            | NavigationOutcome::SignIn { redirect_to, .. } => Some(redirect_to),
            NavigationOutcome::Authorized { .. } | NavigationOutcome::Superseded { .. } => None,
        }
    }

    /// `Ok(Some(path))` when authorized, `Ok(None)` when superseded.
    pub fn into_result(self) -> SessionResult<Option<String>> {
        match self {
            NavigationOutcome::Authorized { path } => Ok(Some(path)),
            NavigationOutcome::Superseded { .. } => Ok(None),
            NavigationOutcome::Denied { attempted, .. } => {
                Err(SessionError::AccessDenied { path: attempted })
            }
            NavigationOutcome::SignIn { .. } => Err(SessionError::SessionExpired),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            NavigationOutcome::Authorized { .. } => "authorized",
            NavigationOutcome::Denied { .. } => "denied",
            NavigationOutcome::SignIn { .. } => "sign_in",
            NavigationOutcome::Superseded { .. } => "superseded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SwitchGrant {
    role: Role,
    path: String,
}

#[derive(Debug)]
enum GuardState {
    Checking,
    RoleAssigning(Role),
    RoleSwitching(SwitchGrant),
    Authorized,
    Unauthorized,
}

pub struct NavigationGuard {
    store: Arc<SessionStore>,
    identity: Arc<dyn IdentityProvider>,
    resolver: RoutePermissionResolver,
    config: SessionConfig,
    latest: AtomicU64,
    grant: Mutex<Option<SwitchGrant>>,
    metrics: Option<SessionMetrics>,
}

impl NavigationGuard {
    pub fn new(
        store: Arc<SessionStore>,
        identity: Arc<dyn IdentityProvider>,
        resolver: RoutePermissionResolver,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            identity,
            resolver,
            config,
            latest: AtomicU64::new(0),
            grant: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &RoutePermissionResolver {
        &self.resolver
    }

    /// Id of the most recent navigation.
    pub fn latest_navigation(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Invalidate any navigation still in flight.
    pub fn supersede_pending(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    pub fn has_pending_grant(&self) -> bool {
        self.grant_slot().is_some()
    }

    /// Decide whether `path` may be opened right now.
    pub async fn check(&self, path: &str) -> NavigationOutcome {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let path = normalize_path(path);
        let outcome = self.run(id, &path).await;
        debug!(id, path = %path, outcome = outcome.label(), "navigation_checked");
        if let Some(metrics) = &self.metrics {
            metrics.navigation(outcome.label());
        }
        outcome
    }

    async fn run(&self, id: u64, path: &str) -> NavigationOutcome {
        let mut state = match self.grant_slot().take() {
            Some(grant) => GuardState::RoleSwitching(grant),
            None => GuardState::Checking,
        };
        let mut validated = false;

        loop {
            state = match state {
                GuardState::RoleSwitching(grant) => {
                    let current = self.store.current_role();
                    if grant.path == path
                        && current.as_ref() == Some(&grant.role)
                        && self.store.is_authenticated()
                    {
                        debug!(role = %grant.role, path, "role_switch_grant_used");
                        GuardState::Authorized
                    } else {
                        debug!(
                            granted_path = %grant.path,
                            granted_role = %grant.role,
                            path,
                            "role_switch_grant_discarded"
                        );
                        GuardState::Checking
                    }
                }
                GuardState::Checking => {
                    if !validated {
                        validated = true;
                        if let Err(err) = self.store.refresh_identity(self.identity.as_ref()).await
                        {
                            debug!(error = %err, "navigation_session_invalid");
                        }
                        if self.is_stale(id) {
                            return NavigationOutcome::Superseded { id };
                        }
                    }
                    if !self.store.is_authenticated() {
                        return self.sign_in(path);
                    }
                    match self.store.current_role() {
                        Some(role) => {
                            let allowed = self.resolver.resolve_access(&role, path).await;
                            if self.is_stale(id) {
                                return NavigationOutcome::Superseded { id };
                            }
                            if allowed {
                                GuardState::Authorized
                            } else {
                                warn!(role = %role, path, "navigation_denied");
                                GuardState::Unauthorized
                            }
                        }
                        None => match self.store.roles().into_iter().next() {
                            Some(role) => GuardState::RoleAssigning(role),
                            None => return self.sign_in(path),
                        },
                    }
                }
                GuardState::RoleAssigning(role) => {
                    info!(role = %role, "navigation_assigning_role");
                    self.store.set_current_role(&role);
                    tokio::task::yield_now().await;
                    if self.is_stale(id) {
                        return NavigationOutcome::Superseded { id };
                    }
                    if self.store.current_role().is_none() {
                        // The role did not stick (the session changed underneath us).
                        return self.sign_in(path);
                    }
                    GuardState::Checking
                }
                GuardState::Authorized => {
                    return NavigationOutcome::Authorized {
                        path: path.to_string(),
                    }
                }
                GuardState::Unauthorized => {
                    return NavigationOutcome::Denied {
                        attempted: path.to_string(),
                        redirect_to: self.config.unauthorized_redirect(path),
                    }
                }
            };
        }
    }

    /// Activate the first held role whose permissions allow `target`.
    ///
    /// Roles whose permissions cannot be loaded are skipped. On success the
    /// next navigation to `target` under that role is let through directly.
    pub async fn switch_to_allowed_role(&self, target: &str) -> Option<Role> {
        let path = normalize_path(target);
        for role in self.store.roles() {
            let table = match self.resolver.permissions_for(&role).await {
                Ok(table) => table,
                Err(err) => {
                    warn!(role = %role, error = %err, "role_switch_candidate_skipped");
                    continue;
                }
            };
            if !table.allows(&role, &path) {
                continue;
            }
            self.store.set_current_role(&role);
            if self.store.current_role().as_ref() != Some(&role) {
                // Identity changed while permissions were loading.
                return None;
            }
            *self.grant_slot() = Some(SwitchGrant {
                role: role.clone(),
                path: path.clone(),
            });
            info!(role = %role, path = %path, "role_switch_granted");
            if let Some(metrics) = &self.metrics {
                metrics.navigation("role_switched");
            }
            return Some(role);
        }
        debug!(path = %path, "role_switch_no_candidate");
        None
    }

    /// Drop any unused role-switch grant.
    pub fn clear_grant(&self) {
        self.grant_slot().take();
    }

    fn sign_in(&self, path: &str) -> NavigationOutcome {
        NavigationOutcome::SignIn {
            attempted: path.to_string(),
            redirect_to: self.config.sign_in_path.clone(),
        }
    }

    fn is_stale(&self, id: u64) -> bool {
        self.latest.load(Ordering::SeqCst) != id
    }

    fn grant_slot(&self) -> MutexGuard<'_, Option<SwitchGrant>> {
        self.grant.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
