//! HTTP channel transport.
//!
//! Inbound messages arrive on `POST /webhook/messages` and are queued for the
//! [`ChannelRunner`](pedido_channel::ChannelRunner); replies leave as a JSON
//! POST to `channel.outbound_url`.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pedido_channel::{
    ChannelEnvelope, ChannelEvent, ChannelReply, ChannelTransport, InboundMessage, TransportError,
};
use pedido_core::config::AppConfig;

pub const SIGNATURE_HEADER: &str = "x-pedido-signature";
const INBOX_CAPACITY: usize = 1_024;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookState {
    inbox: mpsc::Sender<ChannelEnvelope>,
    secret: Option<SecretString>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct WebhookResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookResponse {
    fn rejected(error: impl Into<String>) -> Json<Self> {
        Json(Self { accepted: false, envelope_id: None, error: Some(error.into()) })
    }
}

pub struct HttpChannelTransport {
    inbox: Mutex<mpsc::Receiver<ChannelEnvelope>>,
    client: reqwest::Client,
    outbound_url: Option<String>,
}

/// Builds the webhook state and the transport that drains it.
pub fn channel(config: &AppConfig) -> Result<(WebhookState, HttpChannelTransport), TransportError> {
    let (sender, receiver) = mpsc::channel(INBOX_CAPACITY);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.nlu.timeout_secs))
        .build()
        .map_err(|error| TransportError::Connect(error.to_string()))?;

    Ok((
        WebhookState { inbox: sender, secret: config.channel.webhook_secret.clone() },
        HttpChannelTransport {
            inbox: Mutex::new(receiver),
            client,
            outbound_url: config.channel.outbound_url.clone(),
        },
    ))
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook/messages", post(receive)).with_state(state)
}

pub async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    if let Some(secret) = &state.secret {
        let provided = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
        if !signature_matches(secret, provided, &body) {
            warn!(event_name = "ingress.webhook.signature_rejected", "webhook signature mismatch");
            return (StatusCode::UNAUTHORIZED, WebhookResponse::rejected("invalid signature"));
        }
    }

    let message: InboundMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(error) => {
            return (StatusCode::BAD_REQUEST, WebhookResponse::rejected(format!("invalid payload: {error}")));
        }
    };

    let envelope_id = Uuid::new_v4().to_string();
    let envelope =
        ChannelEnvelope { envelope_id: envelope_id.clone(), event: ChannelEvent::Message(message) };

    if state.inbox.send(envelope).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, WebhookResponse::rejected("channel runner stopped"));
    }

    debug!(event_name = "ingress.webhook.queued", envelope_id = %envelope_id, "webhook message queued");
    (
        StatusCode::ACCEPTED,
        Json(WebhookResponse { accepted: true, envelope_id: Some(envelope_id), error: None }),
    )
}

/// Expects `sha256=<hex hmac of the raw body>`; comparison is constant time.
pub fn signature_matches(secret: &SecretString, provided: Option<&str>, body: &[u8]) -> bool {
    let Some(expected) = provided
        .and_then(|value| value.trim().strip_prefix("sha256="))
        .and_then(decode_hex)
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(input.get(index..index + 2)?, 16).ok())
        .collect()
}

#[async_trait]
impl ChannelTransport for HttpChannelTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        // The webhook already answered 202.
        Ok(())
    }

    async fn send(&self, reply: &ChannelReply) -> Result<(), TransportError> {
        let Some(url) = &self.outbound_url else {
            info!(
                event_name = "egress.channel.log_only",
                recipient = %reply.recipient,
                text = %reply.text,
                "no outbound url configured; reply logged"
            );
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(reply)
            .send()
            .await
            .map_err(|error| TransportError::Send(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Send(format!(
                "outbound endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
