//! Outbound mail sending.
//!
//! The engine never talks to a mail provider itself. It hands the session
//! token and the transcript to a [`MailTransport`], which composes the message
//! and sends it through the user's connected account.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::services::DeliveredEmail;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("mail relay unreachable: {0}")]
    Request(#[from] reqwest::Error),

    #[error("mail relay rejected the send ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Sends one email. `Ok` means the provider accepted it.
    async fn send(&self, session_token: &str, transcript: &str) -> Result<DeliveredEmail, TransportError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    token: &'a str,
    speech_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default, alias = "receiverEmail")]
    receiver_email: String,
    #[serde(default, alias = "receiverName")]
    receiver_name: String,
    #[serde(default = "default_email_type", alias = "emailType")]
    email_type: String,
    #[serde(default)]
    message_id: Option<String>,
}

fn default_email_type() -> String {
    "general".to_string()
}

/// HTTP mail relay that turns a transcript into a sent email.
#[derive(Clone)]
pub struct HttpMailRelay {
    client: Client,
    url: String,
}

impl HttpMailRelay {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl MailTransport for HttpMailRelay {
    async fn send(&self, session_token: &str, transcript: &str) -> Result<DeliveredEmail, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RelayRequest { token: session_token, speech_text: transcript })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected { status: status.as_u16(), body });
        }

        let relay: RelayResponse = response.json().await?;
        tracing::debug!(message_id = ?relay.message_id, email_type = %relay.email_type, "relay accepted send");

        Ok(DeliveredEmail {
            receiver_email: relay.receiver_email,
            receiver_name: relay.receiver_name,
            email_type: relay.email_type,
        })
    }
}

/// In-process transport that records calls and fails on request.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct StubTransport {
    fail: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "testing"))]
impl StubTransport {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl MailTransport for StubTransport {
    async fn send(&self, _session_token: &str, _transcript: &str) -> Result<DeliveredEmail, TransportError> {
        use std::sync::atomic::Ordering;

        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected { status: 500, body: "provider down".into() });
        }
        Ok(DeliveredEmail {
            receiver_email: "bob@y.com".into(),
            receiver_name: "Bob".into(),
            email_type: "general".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    async fn spawn_relay(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/send-email")
    }

    #[tokio::test]
    async fn relay_receives_token_and_transcript() {
        let app = Router::new().route(
            "/send-email",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["token"], "tok");
                assert_eq!(body["speechText"], "tell bob I'm late");
                Json(serde_json::json!({
                    "status": "success",
                    "message_id": "18d4f2c8a1b3e9f0",
                    "receiverEmail": "bob@y.com",
                    "receiverName": "Bob",
                    "emailType": "urgent_work"
                }))
            }),
        );
        let relay = HttpMailRelay::new(&spawn_relay(app).await);

        let delivered = relay.send("tok", "tell bob I'm late").await.unwrap();
        assert_eq!(delivered.receiver_email, "bob@y.com");
        assert_eq!(delivered.email_type, "urgent_work");
    }

    #[tokio::test]
    async fn relay_error_status_is_a_rejection() {
        let app = Router::new().route(
            "/send-email",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "gmail quota") }),
        );
        let relay = HttpMailRelay::new(&spawn_relay(app).await);

        match relay.send("tok", "hi").await {
            Err(TransportError::Rejected { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "gmail quota");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_type_defaults_to_general() {
        let app = Router::new().route(
            "/send-email",
            post(|| async { Json(serde_json::json!({ "status": "success" })) }),
        );
        let relay = HttpMailRelay::new(&spawn_relay(app).await);

        assert_eq!(relay.send("tok", "hi").await.unwrap().email_type, "general");
    }
}
