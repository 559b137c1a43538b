//! Model RPC client.
//!
//! Every operation is a `call_kw` on the backend: a POST carrying the model
//! name, the method name, positional arguments and keyword arguments.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use fleetlink_client::{ApiClient, ApiRequest, Error, ErrorKind, Result};

use crate::domain::{is_safe_field_path, is_safe_model_name, Domain};

/// Endpoints used by [`RecordsClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordsPaths {
    pub call_kw: String,
    pub webhooks: String,
}

impl Default for RecordsPaths {
    fn default() -> Self {
        Self {
            call_kw: "/api/call_kw".to_string(),
            webhooks: "/api/webhooks".to_string(),
        }
    }
}

/// Paging and ordering for searches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// e.g. `"name asc, id desc"`
    pub order: Option<String>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    fn apply(&self, kwargs: &mut Map<String, Value>) {
        if let Some(limit) = self.limit {
            kwargs.insert("limit".to_string(), json!(limit));
        }
        if let Some(offset) = self.offset {
            kwargs.insert("offset".to_string(), json!(offset));
        }
        if let Some(order) = &self.order {
            kwargs.insert("order".to_string(), json!(order));
        }
    }
}

#[derive(Serialize)]
struct CallKw<'a> {
    model: &'a str,
    method: &'a str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

/// The backend wraps results as `{"result": ...}` or `{"error": {...}}`.
#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Client for model records.
///
/// Shares the [`ApiClient`] (and therefore its session, retry policy and
/// cache) with the rest of the SDK.
///
/// # Example
///
/// ```rust,ignore
/// use fleetlink_records::{Domain, RecordsClient, SearchOptions};
///
/// let records = RecordsClient::new(client.clone());
///
/// let vehicles: Vec<Vehicle> = records
///     .search_read(
///         "fleet.vehicle",
///         &Domain::new().eq("active", true),
///         &["name", "license_plate"],
///         &SearchOptions::new().limit(50),
///     )
///     .await?;
///
/// let id = records.create("fleet.vehicle", &json!({"name": "VAN-7"})).await?;
/// records.write("fleet.vehicle", &[id], &json!({"active": false})).await?;
/// records.unlink("fleet.vehicle", &[id]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct RecordsClient {
    pub(crate) client: ApiClient,
    pub(crate) paths: RecordsPaths,
    read_cache: Option<Option<Duration>>,
}

impl RecordsClient {
    /// Create a client using the default endpoints.
    pub fn new(client: ApiClient) -> Self {
        Self::with_paths(client, RecordsPaths::default())
    }

    /// Create a client using custom endpoints.
    pub fn with_paths(client: ApiClient, paths: RecordsPaths) -> Self {
        Self {
            client,
            paths,
            read_cache: None,
        }
    }

    /// Let reads go through the response cache, using `ttl` or the
    /// client's default TTL.
    ///
    /// Mutations through this client clear the cache.
    pub fn with_read_cache(mut self, ttl: Option<Duration>) -> Self {
        self.read_cache = Some(ttl);
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Call `method` on `model` with positional and keyword arguments.
    #[instrument(skip(self, args, kwargs))]
    pub async fn call_kw(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        self.call(model, method, args, kwargs, false).await
    }

    /// Ids of the records matching `domain`.
    #[instrument(skip(self, domain, options))]
    pub async fn search(
        &self,
        model: &str,
        domain: &Domain,
        options: &SearchOptions,
    ) -> Result<Vec<i64>> {
        domain.validate()?;
        let mut kwargs = Map::new();
        options.apply(&mut kwargs);
        let value = self
            .call(model, "search", vec![domain.to_value()], kwargs, true)
            .await?;
        decode(value)
    }

    /// Records matching `domain`, restricted to `fields` (all fields when
    /// empty).
    #[instrument(skip(self, domain, options))]
    pub async fn search_read<T: DeserializeOwned>(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[&str],
        options: &SearchOptions,
    ) -> Result<Vec<T>> {
        domain.validate()?;
        let mut kwargs = Map::new();
        kwargs.insert("domain".to_string(), domain.to_value());
        if !fields.is_empty() {
            kwargs.insert("fields".to_string(), fields_value(fields)?);
        }
        options.apply(&mut kwargs);
        let value = self.call(model, "search_read", Vec::new(), kwargs, true).await?;
        decode(value)
    }

    /// Number of records matching `domain`.
    #[instrument(skip(self, domain))]
    pub async fn search_count(&self, model: &str, domain: &Domain) -> Result<u64> {
        domain.validate()?;
        let value = self
            .call(model, "search_count", vec![domain.to_value()], Map::new(), true)
            .await?;
        decode(value)
    }

    /// Read records by id.
    #[instrument(skip(self))]
    pub async fn read<T: DeserializeOwned>(
        &self,
        model: &str,
        ids: &[i64],
        fields: &[&str],
    ) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut kwargs = Map::new();
        if !fields.is_empty() {
            kwargs.insert("fields".to_string(), fields_value(fields)?);
        }
        let value = self.call(model, "read", vec![json!(ids)], kwargs, true).await?;
        decode(value)
    }

    /// Create a record and return its id.
    #[instrument(skip(self, values))]
    pub async fn create<T: Serialize>(&self, model: &str, values: &T) -> Result<i64> {
        let values = serde_json::to_value(values)?;
        let value = self.call(model, "create", vec![values], Map::new(), false).await?;
        self.client.cache().clear();
        decode(value)
    }

    /// Update records with the same values.
    #[instrument(skip(self, values))]
    pub async fn write<T: Serialize>(&self, model: &str, ids: &[i64], values: &T) -> Result<bool> {
        let values = serde_json::to_value(values)?;
        let value = self
            .call(model, "write", vec![json!(ids), values], Map::new(), false)
            .await?;
        self.client.cache().clear();
        decode(value)
    }

    /// Delete records.
    #[instrument(skip(self))]
    pub async fn unlink(&self, model: &str, ids: &[i64]) -> Result<bool> {
        let value = self
            .call(model, "unlink", vec![json!(ids)], Map::new(), false)
            .await?;
        self.client.cache().clear();
        decode(value)
    }

    async fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        read: bool,
    ) -> Result<Value> {
        if !is_safe_model_name(model) {
            return Err(Error::new(ErrorKind::Validation(format!(
                "Invalid model name: {model}"
            ))));
        }
        if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::new(ErrorKind::Validation(format!(
                "Invalid method name: {method}"
            ))));
        }

        let body = CallKw {
            model,
            method,
            args,
            kwargs,
        };
        let mut request = ApiRequest::post(self.paths.call_kw.as_str()).json(&body)?;
        if let (true, Some(ttl)) = (read, self.read_cache) {
            request = request.cached(ttl);
        }

        let value = self.client.send(request).await?;
        unwrap_envelope(value, model, method)
    }
}

fn unwrap_envelope(value: Value, model: &str, method: &str) -> Result<Value> {
    let is_envelope = value
        .as_object()
        .is_some_and(|obj| obj.contains_key("result") || obj.contains_key("error"));
    if !is_envelope {
        return Ok(value);
    }

    let envelope: RpcEnvelope = serde_json::from_value(value)?;
    if let Some(error) = envelope.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("remote call failed")
            .to_string();
        debug!(model, method, %message, "call_kw returned an error");
        return Err(
            Error::new(ErrorKind::Api(format!("{model}.{method}: {message}"))).with_details(error),
        );
    }
    Ok(envelope.result.unwrap_or(Value::Null))
}

fn fields_value(fields: &[&str]) -> Result<Value> {
    if let Some(bad) = fields.iter().find(|f| !is_safe_field_path(f)) {
        return Err(Error::new(ErrorKind::Validation(format!(
            "Invalid field name: {bad}"
        ))));
    }
    Ok(json!(fields))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(Into::into)
}
