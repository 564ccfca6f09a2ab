//! Shared types for the notification pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an attachment is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Document,
    Photo,
}

impl AttachmentKind {
    /// Bot API method used to upload this kind.
    pub fn method(self) -> &'static str {
        match self {
            Self::Document => "sendDocument",
            Self::Photo => "sendPhoto",
        }
    }

    /// Name of the multipart file field for this kind.
    pub fn field(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Photo => "photo",
        }
    }
}

/// A file sent as a reply to the notification text.
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub caption: String,
    pub content: Vec<u8>,
    pub kind: AttachmentKind,
}

impl OutgoingAttachment {
    pub fn document(
        filename: impl Into<String>,
        caption: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            caption: caption.into(),
            content: content.into(),
            kind: AttachmentKind::Document,
        }
    }

    pub fn photo(
        filename: impl Into<String>,
        caption: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            caption: caption.into(),
            content: content.into(),
            kind: AttachmentKind::Photo,
        }
    }
}

// Content is elided: attachments can be megabytes.
impl fmt::Debug for OutgoingAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingAttachment")
            .field("filename", &self.filename)
            .field("caption", &self.caption)
            .field("size", &self.content.len())
            .field("kind", &self.kind)
            .finish()
    }
}

/// The final, size-checked notification for one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedNotification {
    /// Text sent as the primary message; always within the platform limit.
    pub text: String,
    /// Attachments sent as replies, in order.
    pub attachments: Vec<OutgoingAttachment>,
}

/// Identifier of a delivered text message, used to thread replies to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryReceipt(pub String);

impl DeliveryReceipt {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self(message_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
