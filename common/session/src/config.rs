use std::env;
use std::time::Duration;

use crate::error::{SessionError, SessionResult};

/// Endpoints and redirect targets used by the session core.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Scheme, host and optional prefix shared by every backend call.
    pub base_url: String,
    /// `POST` endpoint exchanging a refresh token for a new access token.
    pub refresh_path: String,
    /// Bearer-authenticated identity lookup.
    pub identity_path: String,
    /// Bearer-authenticated list of routes reachable by the signed-in identity.
    pub accessible_routes_path: String,
    /// Per-role route permission table.
    pub permissions_path: String,
    /// Unauthenticated entry point of the UI.
    pub sign_in_path: String,
    /// Page shown when the guard denies a navigation.
    pub unauthorized_path: String,
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Construct config with the dashboard's default endpoint layout.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            refresh_path: "/refresh-token".to_string(),
            identity_path: "/api/v1/users/me".to_string(),
            accessible_routes_path: "/api/v1/routes/my-routes".to_string(),
            permissions_path: "/api/v1/routes/permissions".to_string(),
            sign_in_path: "/login".to_string(),
            unauthorized_path: "/unauthorized".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn with_identity_path(mut self, path: impl Into<String>) -> Self {
        self.identity_path = path.into();
        self
    }

    pub fn with_accessible_routes_path(mut self, path: impl Into<String>) -> Self {
        self.accessible_routes_path = path.into();
        self
    }

    pub fn with_permissions_path(mut self, path: impl Into<String>) -> Self {
        self.permissions_path = path.into();
        self
    }

    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    pub fn with_unauthorized_path(mut self, path: impl Into<String>) -> Self {
        self.unauthorized_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Absolute URL for a backend path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Fallback location for a denied navigation, carrying the attempted path.
    pub fn unauthorized_redirect(&self, attempted: &str) -> String {
        format!(
            "{}?from={}",
            self.unauthorized_path,
            urlencoding::encode(attempted)
        )
    }

    /// Load configuration from `SESSION_*` environment variables.
    pub fn from_env() -> SessionResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> SessionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("SESSION_API_BASE_URL")
            .and_then(|value| normalize_optional(&value))
            .ok_or_else(|| SessionError::Config("SESSION_API_BASE_URL must be set".into()))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SessionError::Config(format!(
                "SESSION_API_BASE_URL must be an http(s) URL, got '{base_url}'"
            )));
        }

        let mut config = Self::new(base_url);
        let optional = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

        if let Some(path) = optional("SESSION_REFRESH_PATH") {
            config = config.with_refresh_path(path);
        }
        if let Some(path) = optional("SESSION_IDENTITY_PATH") {
            config = config.with_identity_path(path);
        }
        if let Some(path) = optional("SESSION_ROUTES_PATH") {
            config = config.with_accessible_routes_path(path);
        }
        if let Some(path) = optional("SESSION_PERMISSIONS_PATH") {
            config = config.with_permissions_path(path);
        }
        if let Some(path) = optional("SESSION_SIGN_IN_PATH") {
            config = config.with_sign_in_path(path);
        }
        if let Some(path) = optional("SESSION_UNAUTHORIZED_PATH") {
            config = config.with_unauthorized_path(path);
        }
        if let Some(raw) = optional("SESSION_REQUEST_TIMEOUT_SECONDS") {
            let seconds = raw.parse::<u64>().map_err(|err| {
                SessionError::Config(format!(
                    "Invalid SESSION_REQUEST_TIMEOUT_SECONDS '{raw}': {err}"
                ))
            })?;
            config = config.with_request_timeout(Duration::from_secs(seconds.max(1)));
        }

        Ok(config)
    }
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
