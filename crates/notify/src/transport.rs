use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use clearview_core::config::{EmailConfig, EmailProvider};

/// One outbound message. Exactly one of `text` or `html` is normally set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl EmailMessage {
    pub fn text(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: Some(body.into()),
            html: None,
            reply_to: None,
        }
    }

    pub fn html(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: None,
            html: Some(body.into()),
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("email request failed: {0}")]
    Request(String),
    #[error("email provider rejected message (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("email transport misconfigured: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Network failures and provider-side 5xx/429 responses are worth retrying;
    /// anything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Configuration(_) => false,
        }
    }
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError>;
}

/// Builds the transport selected by `[email].provider`.
pub fn transport_from_config(
    config: &EmailConfig,
) -> Result<Arc<dyn EmailTransport>, TransportError> {
    match config.provider {
        EmailProvider::Log => Ok(Arc::new(LogEmailTransport)),
        EmailProvider::Http => {
            let api_url = config.api_url.clone().ok_or_else(|| {
                TransportError::Configuration("email.api_url is required".to_string())
            })?;
            let api_key = config.api_key.clone().ok_or_else(|| {
                TransportError::Configuration("email.api_key is required".to_string())
            })?;
            Ok(Arc::new(HttpEmailTransport::new(
                api_url,
                api_key,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Posts `{to, subject, text|html, replyTo?}` as JSON to an email API with a
/// bearer key and expects `{success, messageId?, error?}` back.
pub struct HttpEmailTransport {
    client: reqwest::Client,
    api_url: String,
    api_key: SecretString,
}

impl HttpEmailTransport {
    pub fn new(
        api_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;
        Ok(Self { client, api_url: api_url.into(), api_key })
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(message)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        let body: Option<ProviderResponse> = response.json().await.ok();

        match body {
            Some(body) if status.is_success() && body.success => {
                Ok(SendReceipt { message_id: body.message_id })
            }
            Some(body) => Err(TransportError::Rejected {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| "provider reported failure".to_string()),
            }),
            None => Err(TransportError::Rejected {
                status: status.as_u16(),
                message: "unreadable provider response".to_string(),
            }),
        }
    }
}

/// Writes messages to the log instead of sending them. The default provider
/// for local runs.
#[derive(Default)]
pub struct LogEmailTransport;

#[async_trait]
impl EmailTransport for LogEmailTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        info!(
            event_name = "notify.email.logged",
            to = %message.to,
            subject = %message.subject,
            reply_to = message.reply_to.as_deref().unwrap_or(""),
            body_len = message.text.as_ref().or(message.html.as_ref()).map_or(0, String::len),
            "email logged instead of sent"
        );
        Ok(SendReceipt { message_id: None })
    }
}

/// Test double that keeps every message and can be scripted to fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<EmailMessage>>,
    failures: Mutex<VecDeque<TransportError>>,
    always_fail: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors returned by the next sends, in order.
    pub async fn fail_next(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.failures.lock().await.extend(errors);
    }

    pub async fn fail_always(&self, error: TransportError) {
        *self.always_fail.lock().await = Some(error);
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, recipient: &str) -> Vec<EmailMessage> {
        self.sent.lock().await.iter().filter(|message| message.to == recipient).cloned().collect()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, TransportError> {
        if let Some(error) = self.always_fail.lock().await.clone() {
            return Err(error);
        }
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        let mut sent = self.sent.lock().await;
        sent.push(message.clone());
        Ok(SendReceipt { message_id: Some(format!("rec-{}", sent.len())) })
    }
}
