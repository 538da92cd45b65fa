//! Single-flight credential refresh.
//!
//! When several requests are rejected with `401` at once, only the first one
//! calls the refresh endpoint. The others park on a oneshot channel and are
//! handed the new access token (or the failure) once that call settles.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common_observability::SessionMetrics;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::store::SessionStore;

/// Exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    async fn refresh(&self, refresh_token: &str) -> SessionResult<String>;
}

/// Any async closure with the matching signature can refresh tokens.
#[async_trait]
impl<AsyncFn, FnFuture> TokenRefresher for AsyncFn
where
    AsyncFn: Fn(String) -> FnFuture + Send + Sync + 'static,
    FnFuture: Future<Output = SessionResult<String>> + Send,
{
    async fn refresh(&self, refresh_token: &str) -> SessionResult<String> {
        (self)(refresh_token.to_string()).await
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
}

/// Calls `POST {refresh_path}` with `{ refresh_token }`.
///
/// Uses its own client so a rejected refresh is never fed back into the
/// 401 handling of the request pipeline.
#[derive(Clone)]
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(client: reqwest::Client, config: &SessionConfig) -> Self {
        Self {
            client,
            url: config.url(&config.refresh_path),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> SessionResult<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|err| SessionError::RefreshFailed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::RefreshFailed(format!(
                "refresh endpoint returned {status}: {body}"
            )));
        }

        let payload: RefreshResponse = response
            .json()
            .await
            .map_err(|err| SessionError::RefreshFailed(err.to_string()))?;
        if payload.access_token.trim().is_empty() {
            return Err(SessionError::RefreshFailed(
                "refresh endpoint returned an empty access token".to_string(),
            ));
        }
        Ok(payload.access_token)
    }
}

type Waiter = oneshot::Sender<SessionResult<String>>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    waiters: VecDeque<Waiter>,
}

enum Step {
    Wait(oneshot::Receiver<SessionResult<String>>),
    Replay(String),
    Expired,
    Lead(String),
}

/// Coordinates recovery of requests rejected with `401`.
pub struct RefreshCoordinator {
    store: Arc<SessionStore>,
    refresher: Arc<dyn TokenRefresher>,
    state: Mutex<RefreshState>,
    metrics: Option<SessionMetrics>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<SessionStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            state: Mutex::new(RefreshState::default()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    pub fn pending_waiters(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Resolve the access token a rejected request should be replayed with.
    ///
    /// `sent_with` is the token the rejected request carried. An error means
    /// the request must fail; the session has then been cleared.
    pub async fn recover(&self, sent_with: Option<&str>) -> SessionResult<String> {
        let step = {
            let mut state = self.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Step::Wait(rx)
            } else if let Some(current) = self
                .store
                .access_token()
                .filter(|current| Some(current.as_str()) != sent_with)
            {
                Step::Replay(current)
            } else if let Some(refresh_token) = self.store.refresh_token() {
                state.refreshing = true;
                Step::Lead(refresh_token)
            } else {
                Step::Expired
            }
        };

        match step {
            Step::Wait(rx) => {
                debug!("refresh_in_flight_request_queued");
                let outcome = rx.await.unwrap_or(Err(SessionError::SessionExpired));
                if outcome.is_ok() {
                    self.record_replay("waiter");
                }
                outcome
            }
            Step::Replay(token) => {
                debug!("access_token_already_rotated");
                self.record_replay("stale_token");
                Ok(token)
            }
            Step::Expired => {
                warn!("refresh_token_missing");
                self.record_refresh("no_refresh_token");
                self.store.logout();
                Err(SessionError::SessionExpired)
            }
            Step::Lead(refresh_token) => self.lead(&refresh_token).await,
        }
    }

    async fn lead(&self, refresh_token: &str) -> SessionResult<String> {
        let mut in_flight = InFlight {
            coordinator: Some(self),
        };
        let result = self.refresher.refresh(refresh_token).await;
        in_flight.disarm();

        match result {
            Ok(token) if !self.store.set_access_token_if(refresh_token, token.clone()) => {
                let waiters = self.finish();
                warn!(waiters = waiters.len(), "refreshed_token_discarded");
                for waiter in waiters {
                    let _ = waiter.send(Err(SessionError::SessionExpired));
                }
                self.record_refresh("discarded");
                Err(SessionError::SessionExpired)
            }
            Ok(token) => {
                let waiters = self.finish();
                info!(waiters = waiters.len(), "access_token_refreshed");
                for waiter in waiters {
                    let _ = waiter.send(Ok(token.clone()));
                }
                self.record_refresh("success");
                self.record_replay("refresh");
                Ok(token)
            }
            Err(err) => {
                let waiters = self.finish();
                warn!(error = %err, waiters = waiters.len(), "access_token_refresh_failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(SessionError::SessionExpired));
                }
                self.store.logout();
                self.record_refresh("failure");
                Err(match err {
                    SessionError::RefreshFailed(message) => SessionError::RefreshFailed(message),
                    other => SessionError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    fn finish(&self) -> VecDeque<Waiter> {
        let mut state = self.lock();
        state.refreshing = false;
        std::mem::take(&mut state.waiters)
    }

    fn record_refresh(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.refresh(outcome);
        }
    }

    fn record_replay(&self, source: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.replayed(source);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the refresh slot if the leading future is dropped mid-refresh.
/// Dropping the queued senders fails the waiters with `SessionExpired`.
struct InFlight<'a> {
    coordinator: Option<&'a RefreshCoordinator>,
}

impl InFlight<'_> {
    fn disarm(&mut self) {
        self.coordinator = None;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            let dropped = coordinator.finish();
            warn!(waiters = dropped.len(), "refresh_abandoned");
        }
    }
}
