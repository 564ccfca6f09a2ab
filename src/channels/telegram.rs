//! Telegram delivery client: native Bot API calls over reqwest.
//!
//! Text goes out through a form-encoded `sendMessage`; attachments are
//! multipart `sendDocument` / `sendPhoto` uploads threaded as replies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::channels::delivery::DeliveryClient;
use crate::error::{ConfigError, DeliveryError, escape_multiline};
use crate::pipeline::types::{DeliveryReceipt, OutgoingAttachment};

/// Default Bot API endpoint.
pub const DEFAULT_API_PREFIX: &str = "https://api.telegram.org/";

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<ApiMessage>,
}

/// <https://core.telegram.org/bots/api#message>
#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: serde_json::Value,
}

/// Telegram Bot API client.
pub struct TelegramClient {
    api_prefix: String,
    bot_token: SecretString,
    timeout: Duration,
    client: reqwest::Client,
}

impl TelegramClient {
    /// Build a client whose requests all time out after `timeout`.
    pub fn new(
        api_prefix: impl Into<String>,
        bot_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut api_prefix = api_prefix.into();
        if !api_prefix.ends_with('/') {
            api_prefix.push('/');
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            api_prefix,
            bot_token,
            timeout,
            client,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}bot{}/{method}",
            self.api_prefix,
            self.bot_token.expose_secret()
        )
    }

    /// Map a reqwest failure, dropping the URL (it embeds the token).
    fn request_error(&self, method: &str, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            return DeliveryError::Timeout {
                method: method.to_string(),
                timeout: self.timeout,
            };
        }
        DeliveryError::Transport {
            method: method.to_string(),
            reason: err.without_url().to_string(),
        }
    }

    /// Turn a non-success status into an error carrying the one-line body.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DeliveryError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: escape_multiline(&body),
        })
    }
}

#[async_trait]
impl DeliveryClient for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, DeliveryError> {
        const METHOD: &str = "sendMessage";

        let resp = self
            .client
            .post(self.api_url(METHOD))
            .query(&[("disable_web_page_preview", "true")])
            .form(&[("chat_id", chat_id), ("text", text)])
            .send()
            .await
            .map_err(|e| self.request_error(METHOD, e))?;

        let resp = Self::check_status(resp).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| self.request_error(METHOD, e))?;

        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| DeliveryError::InvalidResponse {
                method: METHOD.to_string(),
                reason: format!("{e}: {}", escape_multiline(&body)),
            })?;
        if !parsed.ok {
            return Err(DeliveryError::NotOk {
                body: escape_multiline(&body),
            });
        }

        let receipt = match parsed.result.map(|m| m.message_id) {
            Some(serde_json::Value::Number(n)) => DeliveryReceipt::new(n.to_string()),
            Some(serde_json::Value::String(s)) if !s.is_empty() => DeliveryReceipt::new(s),
            _ => {
                return Err(DeliveryError::InvalidResponse {
                    method: METHOD.to_string(),
                    reason: format!("missing message_id: {}", escape_multiline(&body)),
                });
            }
        };

        debug!(chat_id, message_id = %receipt, "Telegram message sent");
        Ok(receipt)
    }

    async fn send_attachment(
        &self,
        chat_id: &str,
        reply_to: &DeliveryReceipt,
        attachment: &OutgoingAttachment,
    ) -> Result<(), DeliveryError> {
        let method = attachment.kind.method();

        let part = Part::bytes(attachment.content.clone()).file_name(attachment.filename.clone());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("reply_to_message_id", reply_to.to_string())
            .text("caption", attachment.caption.clone())
            .part(attachment.kind.field(), part);

        let resp = self
            .client
            .post(self.api_url(method))
            .query(&[("disable_notification", "true")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_error(method, e))?;

        Self::check_status(resp).await?;

        info!(
            "Telegram {} sent to {chat_id}: {}",
            attachment.kind.field(),
            attachment.filename
        );
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
