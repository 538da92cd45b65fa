use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common_observability::SessionMetrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{ApiRequest, AuthenticatedClient};
use crate::error::{SessionError, SessionResult};
use crate::roles::Role;
use crate::routes::normalize_path;

/// One row of a role's permission table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePermissionEntry {
    pub path: String,
    #[serde(default, alias = "allowedRoles")]
    pub allowed_roles: BTreeSet<Role>,
}

impl RoutePermissionEntry {
    pub fn new<I, R>(path: impl Into<String>, allowed_roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self {
            path: path.into(),
            allowed_roles: allowed_roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Route permissions keyed by normalized path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionTable {
    entries: HashMap<String, BTreeSet<Role>>,
}

impl PermissionTable {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = RoutePermissionEntry>,
    {
        let mut table = Self::default();
        for entry in entries {
            table
                .entries
                .entry(normalize_path(&entry.path))
                .or_default()
                .extend(entry.allowed_roles);
        }
        table
    }

    /// A path without an entry is denied.
    pub fn allows(&self, role: &Role, path: &str) -> bool {
        self.entries
            .get(&normalize_path(path))
            .map(|roles| roles.contains(role))
            .unwrap_or(false)
    }

    pub fn allowed_roles(&self, path: &str) -> Option<&BTreeSet<Role>> {
        self.entries.get(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Remote source of truth for route permissions.
#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    async fn fetch_permissions(&self, role: &Role) -> SessionResult<Vec<RoutePermissionEntry>>;
}

/// Reads `GET {permissions_path}?role=<role>` through the authenticated pipeline.
#[derive(Clone)]
pub struct HttpPermissionAuthority {
    client: Arc<AuthenticatedClient>,
}

impl HttpPermissionAuthority {
    pub fn new(client: Arc<AuthenticatedClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PermissionAuthority for HttpPermissionAuthority {
    async fn fetch_permissions(&self, role: &Role) -> SessionResult<Vec<RoutePermissionEntry>> {
        let request = ApiRequest::get(self.client.config().permissions_path.clone())
            .with_query("role", role.as_str());
        self.client.json(request).await
    }
}

#[derive(Default)]
struct PermissionCache {
    /// Bumped on every invalidation; fetches started under an older
    /// generation are not stored.
    generation: u64,
    tables: HashMap<Role, Arc<PermissionTable>>,
}

/// Per-role cache of permission tables in front of a [`PermissionAuthority`].
#[derive(Clone)]
pub struct RoutePermissionResolver {
    authority: Arc<dyn PermissionAuthority>,
    cache: Arc<RwLock<PermissionCache>>,
    metrics: Option<SessionMetrics>,
}

impl RoutePermissionResolver {
    pub fn new(authority: Arc<dyn PermissionAuthority>) -> Self {
        Self {
            authority,
            cache: Arc::new(RwLock::new(PermissionCache::default())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cached(&self, role: &Role) -> Option<Arc<PermissionTable>> {
        self.read().tables.get(role).cloned()
    }

    /// Table for `role`, fetched once and cached until invalidated.
    ///
    /// Failed fetches are not cached, and neither are fetches that an
    /// invalidation overtook.
    pub async fn permissions_for(&self, role: &Role) -> SessionResult<Arc<PermissionTable>> {
        let generation = {
            let cache = self.read();
            if let Some(table) = cache.tables.get(role) {
                self.record("cache_hit");
                return Ok(table.clone());
            }
            cache.generation
        };

        let entries = match self.authority.fetch_permissions(role).await {
            Ok(entries) => entries,
            Err(err) => {
                self.record("error");
                return Err(match err {
                    SessionError::PermissionFetch(message) => {
                        SessionError::PermissionFetch(message)
                    }
                    other => SessionError::PermissionFetch(other.to_string()),
                });
            }
        };
        let table = Arc::new(PermissionTable::new(entries));
        self.record("fetched");

        let mut cache = self.write();
        if cache.generation != generation {
            debug!(role = %role, "route_permissions_invalidated_in_flight");
            return Ok(table);
        }
        debug!(role = %role, entries = table.len(), "route_permissions_cached");
        let table = cache.tables.entry(role.clone()).or_insert(table).clone();
        Ok(table)
    }

    /// Whether `role` may open `path`. Any failure to load permissions denies.
    pub async fn resolve_access(&self, role: &Role, path: &str) -> bool {
        match self.permissions_for(role).await {
            Ok(table) => table.allows(role, path),
            Err(err) => {
                warn!(role = %role, path, error = %err, "route_permission_lookup_failed");
                false
            }
        }
    }

    pub fn invalidate(&self, role: &Role) {
        let mut cache = self.write();
        cache.generation += 1;
        cache.tables.remove(role);
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.write();
        cache.generation += 1;
        cache.tables.clear();
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.permission_fetch(outcome);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PermissionCache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PermissionCache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}
