//! Dispatch router: fans a notification out to the configured chats.
//!
//! Destinations are visited in configured order, one request at a time.
//! A failed text send aborts the whole dispatch; attachment failures abort
//! only when `respect_attachment_errors` is set.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::channels::delivery::DeliveryClient;
use crate::error::{ConfigError, NotifyError, escape_multiline, redact};
use crate::pipeline::types::FormattedNotification;

/// Optional restriction on which senders a destination hears about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderFilter(String);

impl SenderFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Exact or prefix match against the envelope sender.
    pub fn matches(&self, sender: &str) -> bool {
        sender.starts_with(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One outbound chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub chat_id: String,
    pub sender_filter: Option<SenderFilter>,
}

impl Destination {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            sender_filter: None,
        }
    }

    pub fn with_sender_filter(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.sender_filter = (!pattern.is_empty()).then(|| SenderFilter::new(pattern));
        self
    }

    /// Parse one `chat` or `sender:chat` entry.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let entry = entry.trim();
        let (sender, chat_id) = match entry.split_once(':') {
            Some((sender, chat_id)) => (sender.trim(), chat_id.trim()),
            None => ("", entry),
        };

        if chat_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "telegram-chat-ids".into(),
                message: format!("empty chat id in entry {entry:?}"),
            });
        }
        if chat_id.contains(':') {
            return Err(ConfigError::InvalidValue {
                key: "telegram-chat-ids".into(),
                message: format!("expected `chat` or `sender:chat`, got {entry:?}"),
            });
        }

        Ok(Self::new(chat_id).with_sender_filter(sender))
    }

    /// Whether mail from `sender` should be delivered here.
    pub fn accepts(&self, sender: &str) -> bool {
        self.sender_filter
            .as_ref()
            .is_none_or(|filter| filter.matches(sender))
    }
}

/// Parse a comma-separated destination list, keeping its order.
pub fn parse_destinations(list: &str) -> Result<Vec<Destination>, ConfigError> {
    let destinations = list
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(Destination::parse)
        .collect::<Result<Vec<_>, _>>()?;

    if destinations.is_empty() {
        return Err(ConfigError::MissingRequired {
            key: "telegram-chat-ids".into(),
            hint: "Set ST_TELEGRAM_CHAT_IDS to a comma-separated list of chat ids.".into(),
        });
    }
    Ok(destinations)
}

/// What happened during one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Chats that received the notification text.
    pub delivered: Vec<String>,
    /// Chats skipped by their sender filter.
    pub skipped: Vec<String>,
    /// Attachments that failed and were soft-logged.
    pub failed_attachments: usize,
}

pub struct Dispatcher {
    client: Arc<dyn DeliveryClient>,
    destinations: Vec<Destination>,
    respect_attachment_errors: bool,
    secret: SecretString,
    span: tracing::Span,
}

impl Dispatcher {
    /// `secret` is scrubbed from every error this dispatcher reports.
    pub fn new(
        client: Arc<dyn DeliveryClient>,
        destinations: Vec<Destination>,
        respect_attachment_errors: bool,
        secret: SecretString,
        span: tracing::Span,
    ) -> Self {
        Self {
            client,
            destinations,
            respect_attachment_errors,
            secret,
            span,
        }
    }

    /// Deliver one notification to every destination that accepts `sender`.
    pub async fn dispatch(
        &self,
        sender: &str,
        notification: &FormattedNotification,
    ) -> Result<DispatchReport, NotifyError> {
        let span = info_span!(parent: &self.span, "dispatch", sender, client = self.client.name());
        self.dispatch_inner(sender, notification)
            .instrument(span)
            .await
    }

    async fn dispatch_inner(
        &self,
        sender: &str,
        notification: &FormattedNotification,
    ) -> Result<DispatchReport, NotifyError> {
        let secret = self.secret.expose_secret();
        let mut report = DispatchReport::default();

        for dest in &self.destinations {
            if !dest.accepts(sender) {
                debug!(chat_id = %dest.chat_id, "Sender filter did not match, skipping");
                report.skipped.push(dest.chat_id.clone());
                continue;
            }

            let receipt = self
                .client
                .send_text(&dest.chat_id, &notification.text)
                .await
                .map_err(|e| NotifyError::Delivery {
                    chat_id: dest.chat_id.clone(),
                    source: e.redact(secret),
                })?;

            for attachment in &notification.attachments {
                let Err(e) = self
                    .client
                    .send_attachment(&dest.chat_id, &receipt, attachment)
                    .await
                else {
                    continue;
                };

                let err = NotifyError::Attachment {
                    chat_id: dest.chat_id.clone(),
                    filename: attachment.filename.clone(),
                    source: e.redact(secret),
                };
                if self.respect_attachment_errors {
                    return Err(err);
                }
                warn!(
                    error = %escape_multiline(&redact(&err.to_string(), secret)),
                    "Attachment not delivered, continuing"
                );
                report.failed_attachments += 1;
            }

            info!(
                chat_id = %dest.chat_id,
                message_id = %receipt,
                attachments = notification.attachments.len(),
                "Notification delivered"
            );
            report.delivered.push(dest.chat_id.clone());
        }

        Ok(report)
    }
}
