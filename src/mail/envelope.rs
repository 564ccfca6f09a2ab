//! Envelope types: the parsed unit of inbound mail handed to the pipeline.

use uuid::Uuid;

/// Where a content part came from inside the MIME tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartRole {
    /// `Content-Disposition: inline` (embedded images and the like).
    Inline,
    /// `Content-Disposition: attachment`.
    Attachment,
    /// No disposition and not part of the body.
    Other,
}

impl PartRole {
    /// Icon shown in the attachment summary.
    pub fn icon(self) -> &'static str {
        match self {
            Self::Inline => "🔗",
            Self::Attachment => "📎",
            Self::Other => "❔",
        }
    }
}

/// A named chunk of content within an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPart {
    /// File name, empty when the part has none.
    pub filename: String,
    /// Declared MIME type, e.g. `image/jpeg`.
    pub content_type: String,
    /// Decoded bytes.
    pub content: Vec<u8>,
    pub role: PartRole,
}

impl ContentPart {
    pub fn new(
        role: PartRole,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content: content.into(),
            role,
        }
    }

    pub fn inline(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(PartRole::Inline, filename, content_type, content)
    }

    pub fn attachment(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(PartRole::Attachment, filename, content_type, content)
    }

    pub fn other(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(PartRole::Other, filename, content_type, content)
    }
}

/// A parsed inbound message.
///
/// Built once by the intake side and owned by a single processing pass.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Correlation id used in logs and in the SMTP reply.
    pub id: Uuid,
    /// Envelope sender (`MAIL FROM`).
    pub from: String,
    /// Envelope recipients (`RCPT TO`), in order.
    pub to: Vec<String>,
    /// Decoded subject, empty when absent.
    pub subject: String,
    /// Plain-text body, empty when the message has none.
    pub text: String,
    /// Every non-body part, in document order.
    pub parts: Vec<ContentPart>,
    /// The raw message as received, used when no body can be found.
    pub raw: String,
    /// Problems hit while decoding individual parts.
    pub parse_errors: Vec<String>,
}

impl Envelope {
    pub fn new(from: impl Into<String>, to: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to,
            subject: String::new(),
            text: String::new(),
            parts: Vec::new(),
            raw: String::new(),
            parse_errors: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    /// Recipients joined the way they appear in the `{to}` placeholder.
    pub fn joined_recipients(&self) -> String {
        self.to.join(", ")
    }

    /// Total decoded size of all parts, for logging.
    pub fn parts_size(&self) -> usize {
        self.parts.iter().map(|p| p.content.len()).sum()
    }
}
