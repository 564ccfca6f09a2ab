//! Envelope processor: runs one envelope through format, truncate and
//! dispatch.
//!
//! Flow:
//! 1. Formatter renders the full text and picks forwardable parts
//! 2. Truncation engine fits the text into the message budget
//! 3. Dispatcher delivers it to every matching chat

use async_trait::async_trait;
use tracing::{Instrument, debug, info, info_span};

use crate::error::NotifyError;
use crate::mail::envelope::Envelope;
use crate::pipeline::classify::SizeLimits;
use crate::pipeline::dispatch::{DispatchReport, Dispatcher};
use crate::pipeline::format::{Template, format_envelope};
use crate::pipeline::truncate::truncate;
use crate::pipeline::types::FormattedNotification;

/// Receives parsed envelopes from the intake side.
///
/// An error rejects the envelope; the listener reports it to the sending
/// client so it can retry.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, envelope: &Envelope) -> Result<(), NotifyError>;
}

/// Formatting settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub template: Template,
    pub limits: SizeLimits,
    /// Texts longer than this many characters are truncated and the full
    /// text is attached as a document.
    pub send_as_file_threshold: usize,
}

pub struct Notifier {
    config: NotifierConfig,
    dispatcher: Dispatcher,
    span: tracing::Span,
}

impl Notifier {
    pub fn new(config: NotifierConfig, dispatcher: Dispatcher, span: tracing::Span) -> Self {
        Self {
            config,
            dispatcher,
            span,
        }
    }

    /// Format and truncate without sending anything.
    ///
    /// The full-text fallback document is held to the document size ceiling.
    pub fn render(&self, envelope: &Envelope) -> Result<FormattedNotification, NotifyError> {
        let draft = format_envelope(envelope, &self.config.template, self.config.limits);
        truncate(
            draft,
            &self.config.template,
            self.config.send_as_file_threshold,
            self.config.limits.document,
        )
    }

    /// Render and dispatch one envelope.
    pub async fn process(&self, envelope: &Envelope) -> Result<DispatchReport, NotifyError> {
        let span = info_span!(parent: &self.span, "envelope", envelope_id = %envelope.id);
        async {
            let notification = self.render(envelope)?;
            debug!(
                chars = notification.text.chars().count(),
                attachments = notification.attachments.len(),
                "Notification rendered"
            );

            let report = self.dispatcher.dispatch(&envelope.from, &notification).await?;
            info!(
                from = %envelope.from,
                delivered = report.delivered.len(),
                skipped = report.skipped.len(),
                failed_attachments = report.failed_attachments,
                "Envelope processed"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl NotificationSink for Notifier {
    async fn notify(&self, envelope: &Envelope) -> Result<(), NotifyError> {
        self.process(envelope).await.map(|_| ())
    }
}
