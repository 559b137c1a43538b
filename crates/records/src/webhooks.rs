//! Webhook subscriptions.
//!
//! A webhook asks the backend to push `webhook_event` messages for a model
//! over the live channel and, when `target_url` is set, to POST them there.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use fleetlink_client::{ApiRequest, Error, ErrorKind, Result};

use crate::client::RecordsClient;
use crate::domain::is_safe_model_name;

/// A registered webhook.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Webhook {
    pub id: i64,
    pub model: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

/// Parameters for [`RecordsClient::create_webhook`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewWebhook {
    pub model: String,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl NewWebhook {
    /// Subscribe to `events` (e.g. `create`, `write`, `unlink`) on `model`.
    pub fn new<E: Into<String>>(
        model: impl Into<String>,
        events: impl IntoIterator<Item = E>,
    ) -> Self {
        Self {
            model: model.into(),
            events: events.into_iter().map(Into::into).collect(),
            target_url: None,
        }
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }
}

/// List responses come either bare or wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum WebhookList {
    Bare(Vec<Webhook>),
    Wrapped { webhooks: Vec<Webhook> },
}

impl RecordsClient {
    /// Webhooks registered for the current user.
    #[instrument(skip(self))]
    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let list: WebhookList = self
            .client
            .send_json(ApiRequest::get(self.paths.webhooks.as_str()))
            .await?;
        Ok(match list {
            WebhookList::Bare(webhooks) | WebhookList::Wrapped { webhooks } => webhooks,
        })
    }

    /// Register a webhook.
    #[instrument(skip(self, webhook), fields(model = %webhook.model))]
    pub async fn create_webhook(&self, webhook: &NewWebhook) -> Result<Webhook> {
        if !is_safe_model_name(&webhook.model) {
            return Err(Error::new(ErrorKind::Validation(format!(
                "Invalid model name: {}",
                webhook.model
            ))));
        }
        if webhook.events.is_empty() {
            return Err(Error::new(ErrorKind::Validation(
                "A webhook needs at least one event".to_string(),
            )));
        }

        let created: Webhook = self
            .client
            .post_json(&self.paths.webhooks, webhook)
            .await?;
        info!(id = created.id, "Webhook registered");
        Ok(created)
    }

    /// Remove a webhook.
    #[instrument(skip(self))]
    pub async fn delete_webhook(&self, id: i64) -> Result<()> {
        let path = format!("{}/{}", self.paths.webhooks.trim_end_matches('/'), id);
        self.client.delete_request(&path).await
    }
}
