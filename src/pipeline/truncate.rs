//! Truncation engine: keeps the notification text inside the platform's
//! per-message limit, moving the full text into a document when needed.
//!
//! All lengths are counted in Unicode scalar values, never bytes.

use crate::error::NotifyError;
use crate::pipeline::format::{Draft, Template};
use crate::pipeline::types::{FormattedNotification, OutgoingAttachment};

/// Maximum message length accepted by Telegram's `sendMessage`.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Appended to a body that has been cut short.
pub const TRUNCATION_MARKER: &str = "\n\n[truncated]";

pub const FULL_MESSAGE_FILENAME: &str = "full_message.txt";
pub const FULL_MESSAGE_CAPTION: &str = "Full message";

/// Fit a formatted draft into `send_as_file_threshold` characters.
///
/// Short drafts pass through untouched. Longer ones are shortened and the
/// untouched full text is prepended to the attachments as a document, which
/// fails with [`NotifyError::MessageTooLarge`] if it exceeds
/// `max_document_size` bytes. A threshold above the platform limit is
/// clamped to it.
///
/// # Panics
///
/// Panics if the shortened text still exceeds the threshold. That can only
/// happen through a bug in the budget arithmetic.
pub fn truncate(
    draft: Draft,
    template: &Template,
    send_as_file_threshold: usize,
    max_document_size: usize,
) -> Result<FormattedNotification, NotifyError> {
    let threshold = send_as_file_threshold.min(TELEGRAM_MAX_MESSAGE_LENGTH);

    if char_len(&draft.text) <= threshold {
        return Ok(FormattedNotification {
            text: draft.text,
            attachments: draft.attachments,
        });
    }

    if draft.text.len() > max_document_size {
        return Err(NotifyError::MessageTooLarge {
            length: draft.text.len(),
            max: max_document_size,
        });
    }

    let text = shorten(&draft, template, threshold);

    let mut attachments = Vec::with_capacity(draft.attachments.len() + 1);
    attachments.push(OutgoingAttachment::document(
        FULL_MESSAGE_FILENAME,
        FULL_MESSAGE_CAPTION,
        draft.text.into_bytes(),
    ));
    attachments.extend(draft.attachments);

    Ok(FormattedNotification { text, attachments })
}

fn shorten(draft: &Draft, template: &Template, threshold: usize) -> String {
    let placeholder = format!(".{TRUNCATION_MARKER}");
    let empty = template.render(&draft.fields.with_body(placeholder.trim()));
    let empty_len = char_len(&empty);

    if empty_len >= threshold {
        // Headers and attachment details alone fill the budget.
        return draft.text.chars().take(threshold).collect();
    }

    let slots = template.body_slots().max(1);
    let budget = (threshold - empty_len) / slots;
    let kept: String = draft.fields.body.chars().take(budget).collect();
    let body = format!("{kept}{TRUNCATION_MARKER}");

    let text = template.render(&draft.fields.with_body(body.trim()));
    let len = char_len(&text);
    assert!(
        len <= threshold,
        "truncated message is {len} chars, over the {threshold} char budget (body budget {budget})"
    );
    text
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
