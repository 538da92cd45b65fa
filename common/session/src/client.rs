use std::sync::Arc;

use async_trait::async_trait;
use common_observability::SessionMetrics;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::identity::{Identity, IdentityProvider};
use crate::refresh::{HttpTokenRefresher, RefreshCoordinator, TokenRefresher};
use crate::store::SessionStore;

/// Descriptor of an outgoing backend call, kept so it can be replayed.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Sent without credentials and never intercepted on `401`.
    pub public: bool,
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            public: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }
}

/// HTTP client that attaches the session's bearer token and transparently
/// recovers from an expired access token once per request.
pub struct AuthenticatedClient {
    http: Client,
    config: SessionConfig,
    store: Arc<SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthenticatedClient {
    /// Client refreshing through `POST {refresh_path}` on the same backend.
    pub fn new(config: SessionConfig, store: Arc<SessionStore>) -> SessionResult<Self> {
        let http = build_http_client(&config)?;
        let refresher = HttpTokenRefresher::new(http.clone(), &config);
        let coordinator = RefreshCoordinator::new(store.clone(), Arc::new(refresher));
        Ok(Self::from_parts(http, config, store, Arc::new(coordinator)))
    }

    pub fn with_refresher(
        config: SessionConfig,
        store: Arc<SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> SessionResult<Self> {
        let http = build_http_client(&config)?;
        let coordinator = RefreshCoordinator::new(store.clone(), refresher);
        Ok(Self::from_parts(http, config, store, Arc::new(coordinator)))
    }

    /// Like [`AuthenticatedClient::new`] with refresh and replay counters recorded.
    pub fn with_metrics(
        config: SessionConfig,
        store: Arc<SessionStore>,
        metrics: SessionMetrics,
    ) -> SessionResult<Self> {
        let http = build_http_client(&config)?;
        let refresher = HttpTokenRefresher::new(http.clone(), &config);
        let coordinator =
            RefreshCoordinator::new(store.clone(), Arc::new(refresher)).with_metrics(metrics);
        Ok(Self::from_parts(http, config, store, Arc::new(coordinator)))
    }

    pub fn from_parts(
        http: Client,
        config: SessionConfig,
        store: Arc<SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            config,
            store,
            coordinator,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Send `request`, replaying it once with a refreshed token on `401`.
    ///
    /// Statuses other than a recoverable `401` are returned untouched.
    pub async fn send(&self, request: ApiRequest) -> SessionResult<Response> {
        let token = if request.public {
            None
        } else {
            self.store.access_token()
        };
        let response = self.dispatch(&request, token.as_deref()).await?;

        if request.public || request.retried || response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path = %request.path, "request_unauthorized_recovering");
        let fresh = self.coordinator.recover(token.as_deref()).await?;
        let replay = ApiRequest {
            retried: true,
            ..request
        };
        let response = self.dispatch(&replay, Some(&fresh)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %replay.path, "request_unauthorized_after_refresh");
            return Err(SessionError::Unauthorized);
        }
        Ok(response)
    }

    /// Send and decode a JSON response; non-success statuses become errors.
    pub async fn json<T: DeserializeOwned>(&self, request: ApiRequest) -> SessionResult<T> {
        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|err| SessionError::Decode(err.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        self.json(ApiRequest::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> SessionResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|err| SessionError::Decode(err.to_string()))?;
        self.json(ApiRequest::post(path, body)).await
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> SessionResult<Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.config.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder.send().await.map_err(SessionError::from)
    }
}

#[async_trait]
impl IdentityProvider for AuthenticatedClient {
    async fn fetch_identity(&self) -> SessionResult<Identity> {
        self.get_json(&self.config.identity_path).await
    }
}

fn build_http_client(config: &SessionConfig) -> SessionResult<Client> {
    Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|err| SessionError::Config(format!("failed to build HTTP client: {err}")))
}
