use thiserror::Error;

use crate::config::SessionConfig;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session expired")]
    SessionExpired,
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
    #[error("failed to fetch identity: {0}")]
    IdentityFetch(String),
    #[error("failed to fetch route permissions: {0}")]
    PermissionFetch(String),
    #[error("access to '{path}' denied")]
    AccessDenied { path: String },
    #[error("request rejected as unauthorized after credential refresh")]
    Unauthorized,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("session persistence error: {0}")]
    Persistence(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SessionError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

impl SessionError {
    /// True for errors after which the session can no longer be used.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::SessionExpired
                | SessionError::RefreshFailed(_)
                | SessionError::IdentityFetch(_)
                | SessionError::Unauthorized
        )
    }

    /// Where the UI should navigate after this error, if anywhere.
    pub fn redirect(&self, config: &SessionConfig) -> Option<String> {
        match self {
            SessionError::SessionExpired
            | SessionError::RefreshFailed(_)
            | SessionError::IdentityFetch(_)
            | SessionError::Unauthorized => Some(config.sign_in_path.clone()),
            SessionError::AccessDenied { path } => Some(config.unauthorized_redirect(path)),
            SessionError::PermissionFetch(_) => Some(config.unauthorized_path.clone()),
            SessionError::Transport(_)
            | SessionError::Status { .. }
            | SessionError::Decode(_)
            | SessionError::Persistence(_)
            | SessionError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("http://localhost:8080")
    }

    #[test]
    fn auth_failures_redirect_to_sign_in() {
        let config = config();
        for err in [
            SessionError::SessionExpired,
            SessionError::RefreshFailed("boom".into()),
            SessionError::Unauthorized,
        ] {
            assert_eq!(err.redirect(&config).as_deref(), Some("/login"));
            assert!(err.is_session_terminal());
        }
    }

    #[test]
    fn access_denied_preserves_attempted_path() {
        let err = SessionError::AccessDenied {
            path: "/teacher/dashboard".into(),
        };
        assert_eq!(
            err.redirect(&config()).as_deref(),
            Some("/unauthorized?from=%2Fteacher%2Fdashboard")
        );
        assert!(!err.is_session_terminal());
    }

    #[test]
    fn transport_errors_do_not_redirect() {
        let err = SessionError::Status {
            status: 500,
            body: "oops".into(),
        };
        assert!(err.redirect(&config()).is_none());
    }
}
