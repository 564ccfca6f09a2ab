//! Error types for the relay.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failures talking to the chat platform.
///
/// Every variant carries plain strings so the bot token can be scrubbed
/// with [`DeliveryError::redact`] before the error leaves the relay.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{method} request failed: {reason}")]
    Transport { method: String, reason: String },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Non-200 response from Telegram: ({status}) {body}")]
    Status { status: u16, body: String },

    #[error("ok != true: {body}")]
    NotOk { body: String },

    #[error("Invalid {method} response: {reason}")]
    InvalidResponse { method: String, reason: String },
}

impl DeliveryError {
    /// Replace every occurrence of `secret` in the error text with `***`.
    pub fn redact(self, secret: &str) -> Self {
        match self {
            Self::Transport { method, reason } => Self::Transport {
                method,
                reason: redact(&reason, secret),
            },
            Self::Timeout { method, timeout } => Self::Timeout { method, timeout },
            Self::Status { status, body } => Self::Status {
                status,
                body: redact(&body, secret),
            },
            Self::NotOk { body } => Self::NotOk {
                body: redact(&body, secret),
            },
            Self::InvalidResponse { method, reason } => Self::InvalidResponse {
                method,
                reason: redact(&reason, secret),
            },
        }
    }
}

/// Errors that reject a single envelope.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("The message length ({length}) is larger than `forwarded-attachment-max-size` ({max})")]
    MessageTooLarge { length: usize, max: usize },

    #[error("Failed to send message to chat {chat_id}: {source}")]
    Delivery {
        chat_id: String,
        #[source]
        source: DeliveryError,
    },

    #[error("Failed to send attachment {filename:?} to chat {chat_id}: {source}")]
    Attachment {
        chat_id: String,
        filename: String,
        #[source]
        source: DeliveryError,
    },
}

/// SMTP listener errors.
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Graceful shutdown did not finish within {0:?}")]
    ShutdownTimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

/// Replace the credential with `***`. An empty secret leaves the text as is.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}

/// Escape line breaks so the text fits on a single protocol line.
pub fn escape_multiline(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}
