//! Notification adapter: user notifications, document comments, webhooks.

use crate::{AdapterError, AdapterResult};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Interface to the notification services the engine's automatic actions use.
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    async fn notify_user(&self, user_id: &str, message: &str) -> AdapterResult<()>;

    async fn send_comment(&self, document_id: &str, message: &str) -> AdapterResult<()>;

    async fn post_webhook(&self, url: &str, payload: &serde_json::Value) -> AdapterResult<()>;
}

/// A delivery recorded by the in-memory notifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    User { user_id: String, message: String },
    Comment { document_id: String, message: String },
    Webhook { url: String, payload: serde_json::Value },
}

/// Records deliveries instead of sending them; backs the test suite.
#[derive(Default)]
pub struct InMemoryNotifier {
    deliveries: RwLock<Vec<Delivery>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.read().await.clone()
    }
}

#[async_trait]
impl NotificationAdapter for InMemoryNotifier {
    async fn notify_user(&self, user_id: &str, message: &str) -> AdapterResult<()> {
        self.deliveries.write().await.push(Delivery::User {
            user_id: user_id.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn send_comment(&self, document_id: &str, message: &str) -> AdapterResult<()> {
        self.deliveries.write().await.push(Delivery::Comment {
            document_id: document_id.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn post_webhook(&self, url: &str, payload: &serde_json::Value) -> AdapterResult<()> {
        self.deliveries.write().await.push(Delivery::Webhook {
            url: url.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

#[derive(Serialize)]
struct UserNotification<'a> {
    user_id: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct DocumentComment<'a> {
    document_id: &'a str,
    message: &'a str,
}

/// HTTP-backed notifier. User notifications and comments go to a
/// notification service at `base_url`; webhooks post directly to their
/// configured URL.
pub struct HttpNotificationAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> AdapterResult<()> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, status = %status, "Notification delivered");
            return Ok(());
        }

        let message = format!("{url} returned {status}");
        if status.is_server_error() {
            Err(AdapterError::ServiceUnavailable(message))
        } else {
            Err(AdapterError::InvalidRequest(message))
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout(e.to_string())
    } else if e.is_connect() {
        AdapterError::Connection(e.to_string())
    } else {
        AdapterError::Unknown(e.to_string())
    }
}

#[async_trait]
impl NotificationAdapter for HttpNotificationAdapter {
    async fn notify_user(&self, user_id: &str, message: &str) -> AdapterResult<()> {
        let url = format!("{}/notifications", self.base_url);
        self.post_json(&url, &UserNotification { user_id, message })
            .await
    }

    async fn send_comment(&self, document_id: &str, message: &str) -> AdapterResult<()> {
        let url = format!("{}/comments", self.base_url);
        self.post_json(&url, &DocumentComment { document_id, message })
            .await
    }

    async fn post_webhook(&self, url: &str, payload: &serde_json::Value) -> AdapterResult<()> {
        self.post_json(url, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_in_memory_records_deliveries() {
        let notifier = InMemoryNotifier::new();
        notifier.notify_user("u1", "please review").await.unwrap();
        notifier.send_comment("d1", "rejected: blurry scan").await.unwrap();

        let deliveries = notifier.deliveries().await;
        assert_eq!(deliveries.len(), 2);
        assert!(matches!(deliveries[0], Delivery::User { .. }));
    }

    #[tokio::test]
    async fn test_http_notify_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notifications"))
            .and(body_json(serde_json::json!({
                "user_id": "u1",
                "message": "document approved"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpNotificationAdapter::new(server.uri());
        adapter.notify_user("u1", "document approved").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_webhook_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/fail"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hooks/bad"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let adapter = HttpNotificationAdapter::new(server.uri());
        let payload = serde_json::json!({"event": "completed"});

        let transient = adapter
            .post_webhook(&format!("{}/hooks/fail", server.uri()), &payload)
            .await
            .unwrap_err();
        assert!(transient.is_retryable());

        let permanent = adapter
            .post_webhook(&format!("{}/hooks/bad", server.uri()), &payload)
            .await
            .unwrap_err();
        assert!(!permanent.is_retryable());
    }
}
