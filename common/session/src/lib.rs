//! Client-side session and authorization core for the campus dashboard.

pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod permissions;
pub mod persistence;
pub mod refresh;
pub mod roles;
pub mod routes;
pub mod runtime;
pub mod store;

pub use client::{ApiRequest, AuthenticatedClient};
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use guard::{NavigationGuard, NavigationOutcome};
pub use identity::{Identity, IdentityProvider};
pub use permissions::{
    HttpPermissionAuthority, PermissionAuthority, PermissionTable, RoutePermissionEntry,
    RoutePermissionResolver,
};
pub use persistence::{FilePersistence, InMemoryPersistence, SessionPersistence, SessionSnapshot};
pub use refresh::{HttpTokenRefresher, RefreshCoordinator, TokenRefresher};
pub use roles::{normalize_roles, Role};
pub use routes::{
    fetch_accessible_paths, filter_routes, normalize_path, AccessibleRoute, AvailableRoutes,
    RouteNode,
};
pub use runtime::{RoleChange, SessionRuntime};
pub use store::{CredentialPair, SessionEvent, SessionStore};
