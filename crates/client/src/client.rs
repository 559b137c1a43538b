//! The request pipeline: bearer auth, retry, single-flight token refresh
//! and error classification.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::ResponseCache;
use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::{RequestMetric, RequestMetrics};
use crate::request::ApiRequest;
use crate::response::{classify_error_response, decode_body};
use crate::retry::RetryPolicy;
use crate::token::{MemoryTokenStore, SessionTokens, TokenStore};

/// A refresh in progress. Every caller that hits a 401 while it runs awaits
/// the same future and observes the same outcome.
type RefreshFlight = Shared<BoxFuture<'static, Option<String>>>;

/// Why a refresh is being requested.
enum RefreshTrigger<'a> {
    /// The server rejected a request carrying this access token.
    Rejected(Option<&'a str>),
    /// The caller asked for a new token.
    Explicit,
}

/// Body returned by the refresh endpoint.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// HTTP client for the fleet backend.
///
/// Cloning is cheap; clones share the token store, cache, metrics and the
/// refresh single flight.
///
/// # Example
///
/// ```rust,ignore
/// use fleetlink_client::{ApiClient, ApiRequest, ClientConfig};
///
/// let client = ApiClient::with_memory_store(
///     ClientConfig::builder().with_base_url("https://fleet.example.com").build(),
/// )?;
///
/// let vehicles: serde_json::Value = client
///     .send(ApiRequest::get("/api/vehicles").cached(None))
///     .await?;
/// ```
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    config: RwLock<ClientConfig>,
    tokens: Arc<dyn TokenStore>,
    cache: ResponseCache,
    metrics: RequestMetrics,
    refresh_flight: tokio::sync::Mutex<Option<RefreshFlight>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config().base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client backed by the given token store.
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        url::Url::parse(&config.base_url)?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config: RwLock::new(config),
                tokens,
                cache: ResponseCache::new(),
                metrics: RequestMetrics::new(),
                refresh_flight: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Create a client with an in-memory token store.
    pub fn with_memory_store(config: ClientConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryTokenStore::new()))
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ClientConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_config(&self, update: impl FnOnce(&mut ClientConfig)) {
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut config);
    }

    /// Point the client at another base URL.
    pub fn set_base_url(&self, base_url: impl Into<String>) -> Result<()> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&base_url)?;
        self.update_config(|c| c.base_url = base_url);
        Ok(())
    }

    /// Change the per-request timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        self.update_config(|c| c.timeout = timeout);
    }

    /// Turn retries on or off.
    pub fn set_retry_enabled(&self, enabled: bool) {
        self.update_config(|c| c.retry_enabled = enabled);
    }

    /// Change the retry ceiling.
    pub fn set_max_retries(&self, max_retries: u32) {
        self.update_config(|c| c.retry.max_retries = max_retries);
    }

    /// Turn the response cache on or off. Disabling drops cached entries.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.update_config(|c| c.cache_enabled = enabled);
        if !enabled {
            self.inner.cache.clear();
        }
    }

    /// Turn verbose request logging on or off.
    pub fn set_verbose(&self, verbose: bool) {
        self.update_config(|c| c.verbose = verbose);
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// The token store shared by every clone of this client.
    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.inner.tokens)
    }

    /// Request counters.
    pub fn metrics(&self) -> &RequestMetrics {
        &self.inner.metrics
    }

    /// The response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// The stored token pair, if any.
    pub async fn session(&self) -> Result<Option<SessionTokens>> {
        self.inner.tokens.load().await
    }

    /// Returns true if an access token is stored.
    pub async fn is_authenticated(&self) -> bool {
        matches!(self.inner.tokens.load().await, Ok(Some(_)))
    }

    /// Persist a freshly issued token pair.
    pub async fn store_session(&self, tokens: &SessionTokens) -> Result<()> {
        self.inner.tokens.save(tokens).await
    }

    /// Forget the token pair and any cached responses.
    pub async fn clear_session(&self) -> Result<()> {
        self.inner.cache.clear();
        self.inner.tokens.clear().await
    }

    /// Mint a new access token now.
    ///
    /// Joins a refresh that is already running instead of starting another.
    /// On failure the session is cleared.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<String> {
        self.join_refresh_flight(RefreshTrigger::Explicit)
            .await
            .ok_or_else(|| {
                Error::new(ErrorKind::Unauthorized("Session refresh failed".to_string()))
                    .with_status(401)
            })
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send a request and return the decoded JSON body.
    ///
    /// Retries transient failures, refreshes the session once on a 401 and
    /// replays the request, and records one metric event either way.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<Value> {
        self.inner
            .metrics
            .request_started(request.method, &request.path);
        let started = Instant::now();

        let result = self.dispatch(&request).await;

        self.record_outcome(&request, started, &result);
        result
    }

    /// Send a request and deserialize the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let value = self.send(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET request with JSON response deserialization.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    /// POST request with JSON body and response.
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    /// PUT request with JSON body and response.
    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    /// PATCH request with JSON body and response.
    pub async fn patch_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::patch(path).json(body)?).await
    }

    /// DELETE request; the response body is ignored.
    pub async fn delete_request(&self, path: &str) -> Result<()> {
        self.send(ApiRequest::delete(path)).await.map(|_| ())
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<Value> {
        let config = self.config();

        let cache_ttl = match request.cache {
            Some(policy) if config.cache_enabled => {
                Some(policy.ttl.unwrap_or(config.default_cache_ttl))
            }
            _ => None,
        };
        let cache_key = cache_ttl.map(|_| request.cache_key());

        if let Some(key) = &cache_key {
            if let Some(hit) = self.inner.cache.get(key) {
                if config.verbose {
                    debug!(path = %request.path, "Cache hit");
                }
                return Ok(hit);
            }
        }

        let token = if request.authenticated {
            self.inner.tokens.load().await?.map(|t| t.access_token)
        } else {
            None
        };

        let value = match self.execute(request, token.as_deref(), &config).await {
            Ok(value) => value,
            Err(err) if err.is_unauthorized() && request.authenticated => {
                info!(path = %request.path, "Access token rejected, refreshing session");
                match self
                    .join_refresh_flight(RefreshTrigger::Rejected(token.as_deref()))
                    .await
                {
                    Some(fresh) => self.execute(request, Some(&fresh), &config).await?,
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        if let (Some(key), Some(ttl)) = (cache_key, cache_ttl) {
            self.inner.cache.insert(key, value.clone(), ttl);
        }

        Ok(value)
    }

    /// Execute a request with automatic retry handling.
    async fn execute(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        config: &ClientConfig,
    ) -> Result<Value> {
        let mut retry_policy = config
            .retry_enabled
            .then(|| RetryPolicy::new(config.retry.clone()));

        loop {
            match self.execute_once(request, token, config).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    if let Some(ref mut policy) = retry_policy {
                        if let Some(delay) = policy.next_delay() {
                            warn!(
                                attempt = policy.attempt(),
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Request failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }

                    if config.verbose {
                        error!(error = %err, "Request failed after retries");
                    }
                    return Err(err);
                }
                Err(err) => {
                    if config.verbose {
                        error!(error = %err, status = ?err.status, "Request failed");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Execute a single request without retry logic.
    async fn execute_once(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        config: &ClientConfig,
    ) -> Result<Value> {
        let in_context = |err: Error| err.with_request(request.method, request.path.clone());

        let mut url =
            url::Url::parse(&config.url(&request.path)).map_err(|e| in_context(e.into()))?;
        if !request.query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query_params);
        }

        let mut req = self
            .inner
            .http
            .request(request.method.to_reqwest(), url.as_str())
            .timeout(config.timeout)
            .header("Accept", "application/json");

        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            req = req.json(body);
        }

        if config.verbose {
            debug!(method = %request.method, url = %url, "Sending request");
        }

        let response = req.send().await.map_err(|e| in_context(e.into()))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| in_context(e.into()))?;

        if config.verbose {
            debug!(status, bytes = body.len(), "Response received");
        }

        if (200..300).contains(&status) {
            return decode_body(&body).map_err(|e| in_context(e.with_status(status)));
        }

        Err(in_context(classify_error_response(status, &body)))
    }

    fn record_outcome<T>(&self, request: &ApiRequest, started: Instant, result: &Result<T>) {
        let (success, status, error) = match result {
            Ok(_) => (true, None, None),
            Err(err) => (false, err.status, Some(err.to_string())),
        };

        self.inner.metrics.request_finished(RequestMetric {
            method: request.method,
            path: request.path.clone(),
            success,
            status,
            error,
            duration: started.elapsed(),
            finished_at: chrono::Utc::now(),
        });
    }

    // =========================================================================
    // Token refresh
    // =========================================================================

    /// Await the refresh in progress, or start one.
    async fn join_refresh_flight(&self, trigger: RefreshTrigger<'_>) -> Option<String> {
        let flight = {
            let mut slot = self.inner.refresh_flight.lock().await;

            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    if let RefreshTrigger::Rejected(stale) = trigger {
                        // The token may have been rotated after the rejected
                        // request went out; replay with it instead.
                        if let Ok(Some(current)) = self.inner.tokens.load().await {
                            if stale != Some(current.access_token.as_str()) {
                                return Some(current.access_token);
                            }
                        }
                    }

                    let flight = self.clone().run_refresh().boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Body of the single flight. Clears the session on failure and frees
    /// the slot once the outcome is known.
    async fn run_refresh(self) -> Option<String> {
        let access_token = match self.refresh_tokens().await {
            Ok(tokens) => {
                info!("Session refreshed");
                Some(tokens.access_token)
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed, clearing session");
                if let Err(clear_err) = self.clear_session().await {
                    error!(error = %clear_err, "Failed to clear session");
                }
                None
            }
        };

        self.inner.refresh_flight.lock().await.take();
        access_token
    }

    async fn refresh_tokens(&self) -> Result<SessionTokens> {
        let current = self.inner.tokens.load().await?.ok_or_else(|| {
            Error::new(ErrorKind::Unauthorized(
                "No refresh token available".to_string(),
            ))
        })?;

        let config = self.config();
        let request = ApiRequest::post(config.refresh_path.clone()).unauthenticated();

        self.inner
            .metrics
            .request_started(request.method, &request.path);
        let started = Instant::now();

        let result = self
            .execute(&request, Some(&current.refresh_token), &config)
            .await
            .and_then(|value| {
                serde_json::from_value::<RefreshResponse>(value).map_err(Error::from)
            });

        self.record_outcome(&request, started, &result);

        let response = result?;
        let rotated = current.rotated(response.access_token, response.refresh_token);
        self.inner.tokens.save(&rotated).await?;
        Ok(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ClientConfig {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("fleetlink_client=debug")
            .with_test_writer()
            .try_init();

        ClientConfig::builder()
            .with_base_url(server.uri())
            .with_retry(
                RetryConfig::default()
                    .with_max_retries(2)
                    .with_base_delay(Duration::from_millis(20)),
            )
            .build()
    }

    async fn client_with_tokens(server: &MockServer, access: &str, refresh: &str) -> ApiClient {
        let client = ApiClient::with_memory_store(config_for(server)).unwrap();
        client
            .store_session(&SessionTokens::new(access, refresh))
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn test_authenticated_request_attaches_bearer() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/vehicles"))
            .and(header("Authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "access-1", "refresh-1").await;
        let body = client.send(ApiRequest::get("/api/vehicles")).await.unwrap();

        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_unauthenticated_request_omits_bearer() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "access-1", "refresh-1").await;
        client
            .send(ApiRequest::post("/auth/login").unauthenticated())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/webhooks/4"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        let body = client.send(ApiRequest::delete("/api/webhooks/4")).await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_retry_on_503_with_linear_backoff() {
        let server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        Mock::given(method("GET"))
            .and(path("/retry"))
            .respond_with(move |_: &wiremock::Request| {
                let count = call_count_clone.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({"success": true}))
                }
            })
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        let started = Instant::now();
        let body = client.send(ApiRequest::get("/retry")).await.unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        // 20ms before the first retry, 40ms before the second.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        let err = client.send(ApiRequest::get("/down")).await.unwrap_err();

        assert!(matches!(err.kind, ErrorKind::Server { status: 502, .. }));
        assert_eq!(err.endpoint.as_deref(), Some("/down"));
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_retried_as_network_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(504))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        let err = client.send(ApiRequest::get("/slow")).await.unwrap_err();

        assert!(err.is_network());
        assert_eq!(err.status, Some(504));
    }

    #[tokio::test]
    async fn test_retry_disabled_sends_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        client.set_retry_enabled(false);
        let err = client.send(ApiRequest::get("/down")).await.unwrap_err();

        assert!(matches!(err.kind, ErrorKind::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/call_kw"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"message": "Missing model", "field": "model"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        let err = client
            .send(ApiRequest::post("/api/call_kw").json_value(json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err.kind, ErrorKind::Validation(_)));
        assert_eq!(err.message(), "Missing model");
        assert_eq!(err.method, Some(crate::RequestMethod::Post));
        assert_eq!(err.endpoint.as_deref(), Some("/api/call_kw"));
        assert_eq!(err.details.unwrap()["field"], "model");
    }

    #[tokio::test]
    async fn test_connection_error_is_network_error() {
        let config = ClientConfig::builder()
            .with_base_url("http://127.0.0.1:1")
            .without_retry()
            .build();
        let client = ApiClient::with_memory_store(config).unwrap();

        let err = client.send(ApiRequest::get("/anything")).await.unwrap_err();
        assert!(err.is_network(), "unexpected kind: {:?}", err.kind);
        assert_eq!(err.endpoint.as_deref(), Some("/anything"));
    }

    #[tokio::test]
    async fn test_connection_error_is_retried_with_linear_backoff() {
        let config = ClientConfig::builder()
            .with_base_url("http://127.0.0.1:1")
            .with_retry(
                RetryConfig::default()
                    .with_max_retries(2)
                    .with_base_delay(Duration::from_millis(30)),
            )
            .build();
        let client = ApiClient::with_memory_store(config).unwrap();

        let started = Instant::now();
        let err = client.send(ApiRequest::get("/anything")).await.unwrap_err();

        assert!(err.is_network(), "unexpected kind: {:?}", err.kind);
        // 30ms before the first retry, 60ms before the second.
        assert!(started.elapsed() >= Duration::from_millis(90));
        let summary = client.metrics().summary();
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_request_timeout_is_retried_then_network_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/stalled"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"late": true}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let config = ClientConfig::builder()
            .with_base_url(server.uri())
            .with_timeout(Duration::from_millis(100))
            .with_retry(
                RetryConfig::default()
                    .with_max_retries(2)
                    .with_base_delay(Duration::from_millis(10)),
            )
            .build();
        let client = ApiClient::with_memory_store(config).unwrap();
        client
            .store_session(&SessionTokens::new("a", "r"))
            .await
            .unwrap();

        let err = client.send(ApiRequest::get("/stalled")).await.unwrap_err();

        assert!(err.is_network(), "unexpected kind: {:?}", err.kind);
        assert_eq!(err.endpoint.as_deref(), Some("/stalled"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_401_refreshes_and_replays_with_new_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/trips"))
            .and(header("Authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/trips"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("Authorization", "Bearer refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "stale", "refresh-1").await;
        let body = client.send(ApiRequest::get("/api/trips")).await.unwrap();

        assert_eq!(body[0]["id"], 1);
        let tokens = client.session().await.unwrap().unwrap();
        assert_eq!(tokens, SessionTokens::new("fresh", "refresh-1"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "fresh", "refresh_token": "refresh-2"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "stale", "refresh-1").await;
        let (a, b) = tokio::join!(
            client.send(ApiRequest::get("/api/a")),
            client.send(ApiRequest::get("/api/b")),
        );

        assert_eq!(a.unwrap()["ok"], true);
        assert_eq!(b.unwrap()["ok"], true);
        let tokens = client.session().await.unwrap().unwrap();
        assert_eq!(tokens, SessionTokens::new("fresh", "refresh-2"));
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_tokens_and_surfaces_401() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/trips"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "revoked"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "stale", "refresh-1").await;
        let err = client.send(ApiRequest::get("/api/trips")).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(err.message(), "expired");
        assert_eq!(err.endpoint.as_deref(), Some("/api/trips"));
        assert!(client.session().await.unwrap().is_none());
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_unauthenticated_401_does_not_refresh() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad password"})))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "x"})))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        let err = client
            .send(ApiRequest::post("/auth/login").unauthenticated())
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert!(client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_explicit_refresh_session() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("Authorization", "Bearer refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "next"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "current", "refresh-1").await;
        assert_eq!(client.refresh_session().await.unwrap(), "next");
    }

    #[tokio::test]
    async fn test_refresh_without_session_fails() {
        let server = MockServer::start().await;
        let client = ApiClient::with_memory_store(config_for(&server)).unwrap();

        let err = client.refresh_session().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cached_request_hits_network_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["fleet.vehicle"])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        let request = ApiRequest::get("/api/models").cached(Some(Duration::from_secs(60)));

        let first = client.send(request.clone()).await.unwrap();
        let second = client.send(request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_hits_network() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        client.set_cache_enabled(false);
        let request = ApiRequest::get("/api/models").cached(None);

        client.send(request.clone()).await.unwrap();
        client.send(request).await.unwrap();
        assert!(client.cache().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_count_logical_requests() {
        let server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(move |_: &wiremock::Request| {
                if call_count_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({}))
                }
            })
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        client.send(ApiRequest::get("/flaky")).await.unwrap();
        client.send(ApiRequest::get("/missing")).await.unwrap_err();

        let summary = client.metrics().summary();
        assert_eq!(summary.started, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let recent = client.metrics().recent();
        assert_eq!(recent[1].path, "/missing");
        assert_eq!(recent[1].status, Some(404));
        assert!(recent[1].error.as_deref().unwrap().contains("Not found"));
    }

    #[tokio::test]
    async fn test_setters_apply_to_later_requests() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"server": 2})))
            .expect(1)
            .mount(&second)
            .await;

        let client = client_with_tokens(&first, "a", "r").await;
        client.set_base_url(second.uri()).unwrap();
        client.set_max_retries(0);
        client.set_verbose(true);
        client.set_timeout(Duration::from_secs(5));

        let body = client.send(ApiRequest::get("/ping")).await.unwrap();
        assert_eq!(body["server"], 2);
        assert_eq!(client.config().retry.max_retries, 0);
        assert!(client.config().verbose);
        assert!(client.set_base_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_query_params_are_encoded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/search"))
            .and(wiremock::matchers::query_param("q", "a b&c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, "a", "r").await;
        client
            .send(ApiRequest::get("/api/search").query("q", "a b&c"))
            .await
            .unwrap();
    }
}
