use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use clearview_core::config::EmailConfig;
use clearview_core::domain::quote::QuoteFields;
use clearview_core::domain::settings::Settings;

use crate::templates::{EmailTemplates, QuoteEmailContext, RenderedEmail, TemplateError};
use crate::transport::{EmailMessage, EmailTransport, SendReceipt, TransportError};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("delivery to {recipient} failed after {attempts} attempt(s): {source}")]
    Transport {
        recipient: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("no recipient for {0}")]
    NoRecipient(&'static str),
    #[error("every business recipient failed for {0}")]
    BusinessUndelivered(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl DeliveryPolicy {
    pub fn from_config(config: &EmailConfig) -> Self {
        Self { max_retries: config.max_retries, ..Self::default() }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Outcome of the two submission emails. Either may fail independently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub business_sent: bool,
    pub customer_sent: bool,
}

/// Renders and sends every email the funnel produces.
pub struct Mailer {
    transport: Arc<dyn EmailTransport>,
    templates: EmailTemplates,
    policy: DeliveryPolicy,
    business_inbox: Option<String>,
}

impl Mailer {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        templates: EmailTemplates,
        policy: DeliveryPolicy,
        business_inbox: Option<String>,
    ) -> Self {
        Self { transport, templates, policy, business_inbox }
    }

    pub fn from_config(
        transport: Arc<dyn EmailTransport>,
        config: &EmailConfig,
    ) -> Result<Self, TemplateError> {
        Ok(Self::new(
            transport,
            EmailTemplates::new()?,
            DeliveryPolicy::from_config(config),
            config.business_inbox.clone(),
        ))
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Where staff notifications go: the settings list, else the configured
    /// inbox, else the business email shown to customers.
    pub fn business_recipients(&self, settings: &Settings) -> Vec<String> {
        let configured: Vec<String> = settings
            .notification_emails
            .iter()
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .collect();
        if !configured.is_empty() {
            return configured;
        }
        if let Some(inbox) = self.business_inbox.as_deref().filter(|inbox| !inbox.trim().is_empty())
        {
            return vec![inbox.trim().to_string()];
        }
        vec![settings.display_business_email().to_string()]
    }

    /// Business notification plus customer confirmation. Failures are logged,
    /// never returned.
    pub async fn send_submission(
        &self,
        fields: &QuoteFields,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> SubmissionReport {
        let context = QuoteEmailContext::new(fields, settings, now);
        let mut report = SubmissionReport::default();

        match self.templates.business_notification(&context, settings) {
            Ok(rendered) => {
                report.business_sent = self
                    .send_to_business(settings, rendered, fields.customer_email.clone(), "submission")
                    .await;
            }
            Err(error) => log_failure("business_notification", "", "", &error.into()),
        }

        let Some(customer) = customer_email(fields) else {
            warn!(event_name = "notify.delivery.skipped", kind = "customer_confirmation", "no customer email");
            return report;
        };
        match self.templates.customer_confirmation(&context, settings) {
            Ok(rendered) => {
                let message = EmailMessage::text(customer, rendered.subject, rendered.body)
                    .with_reply_to(settings.display_business_email());
                report.customer_sent =
                    self.deliver_logged(&message, "customer_confirmation").await.is_ok();
            }
            Err(error) => log_failure("customer_confirmation", customer, "", &error.into()),
        }

        report
    }

    /// Internal heads-up that a customer has been sitting on the last step.
    pub async fn send_stalled_notice(
        &self,
        fields: &QuoteFields,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        let context = QuoteEmailContext::new(fields, settings, now);
        let rendered = self.templates.stalled_notice(&context)?;
        if self.send_to_business(settings, rendered, fields.customer_email.clone(), "stalled_notice").await
        {
            Ok(())
        } else {
            Err(DeliveryError::BusinessUndelivered("stalled_notice"))
        }
    }

    pub async fn send_outside_area(
        &self,
        fields: &QuoteFields,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        let context = QuoteEmailContext::new(fields, settings, now);
        let rendered = self.templates.outside_area(&context)?;
        if self.send_to_business(settings, rendered, fields.customer_email.clone(), "outside_area").await
        {
            Ok(())
        } else {
            Err(DeliveryError::BusinessUndelivered("outside_area"))
        }
    }

    /// Re-engagement email to the customer of an abandoned draft.
    pub async fn send_followup(
        &self,
        fields: &QuoteFields,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<SendReceipt, DeliveryError> {
        let recipient = customer_email(fields).ok_or(DeliveryError::NoRecipient("followup"))?;
        let context = QuoteEmailContext::new(fields, settings, now);
        let rendered = self.templates.followup(&context)?;
        let message = EmailMessage::html(recipient, rendered.subject, rendered.body)
            .with_reply_to(settings.display_business_email());
        self.deliver_logged(&message, "followup").await
    }

    async fn send_to_business(
        &self,
        settings: &Settings,
        rendered: RenderedEmail,
        reply_to: Option<String>,
        kind: &'static str,
    ) -> bool {
        let mut any_sent = false;
        for recipient in self.business_recipients(settings) {
            let mut message =
                EmailMessage::text(recipient, rendered.subject.clone(), rendered.body.clone());
            if let Some(reply_to) = reply_to.as_deref().filter(|value| !value.trim().is_empty()) {
                message = message.with_reply_to(reply_to);
            }
            any_sent |= self.deliver_logged(&message, kind).await.is_ok();
        }
        any_sent
    }

    async fn deliver_logged(
        &self,
        message: &EmailMessage,
        kind: &'static str,
    ) -> Result<SendReceipt, DeliveryError> {
        match self.deliver(message).await {
            Ok(receipt) => {
                info!(
                    event_name = "notify.delivery.sent",
                    kind,
                    transport = self.transport.name(),
                    recipient = %message.to,
                    subject = %message.subject,
                    message_id = receipt.message_id.as_deref().unwrap_or(""),
                    "email delivered"
                );
                Ok(receipt)
            }
            Err(error) => {
                log_failure(kind, &message.to, &message.subject, &error);
                Err(error)
            }
        }
    }

    /// Sends with retry. Only retryable transport errors are retried.
    pub async fn deliver(&self, message: &EmailMessage) -> Result<SendReceipt, DeliveryError> {
        let mut attempt = 0;
        loop {
            match self.transport.send(message).await {
                Ok(receipt) => return Ok(receipt),
                Err(source) => {
                    let exhausted = attempt >= self.policy.max_retries;
                    if exhausted || !source.is_retryable() {
                        return Err(DeliveryError::Transport {
                            recipient: message.to.clone(),
                            attempts: attempt + 1,
                            source,
                        });
                    }

                    warn!(
                        event_name = "notify.delivery.retry",
                        attempt,
                        max_retries = self.policy.max_retries,
                        recipient = %message.to,
                        error = %source,
                        "email send failed; retrying"
                    );
                    let delay = self.policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

fn customer_email(fields: &QuoteFields) -> Option<&str> {
    fields.customer_email.as_deref().map(str::trim).filter(|email| !email.is_empty())
}

fn log_failure(kind: &'static str, recipient: &str, subject: &str, reason: &DeliveryError) {
    error!(
        event_name = "notify.delivery.failed",
        kind,
        recipient,
        subject,
        reason = %reason,
        "email delivery failed"
    );
}
