//! Configuration: command-line flags with `ST_*` environment fallbacks.

use std::sync::LazyLock;
use std::time::Duration;

use clap::{ArgAction, Parser};
use regex::Regex;
use secrecy::SecretString;
use tracing::warn;

use crate::channels::smtp::{DEFAULT_IDLE_TIMEOUT, SmtpConfig};
use crate::channels::telegram::DEFAULT_API_PREFIX;
use crate::error::ConfigError;
use crate::pipeline::classify::SizeLimits;
use crate::pipeline::dispatch::{Destination, parse_destinations};
use crate::pipeline::format::{DEFAULT_TEMPLATE, Template};
use crate::pipeline::processor::NotifierConfig;
use crate::pipeline::truncate::TELEGRAM_MAX_MESSAGE_LENGTH;

static HUMAN_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(\.\d+)*) ?([kKmMgGtTpP])?[iI]?[bB]?$").expect("size pattern is valid")
});

#[derive(Debug, Parser)]
#[command(
    name = "smtp-to-telegram",
    about = "Listens for SMTP and sends all incoming email messages to Telegram",
    version
)]
pub struct Cli {
    #[arg(long, env = "ST_SMTP_LISTEN", default_value = "127.0.0.1:2525", help = "SMTP: TCP address to listen on")]
    pub smtp_listen: String,

    #[arg(
        long,
        env = "ST_SMTP_PRIMARY_HOST",
        help = "SMTP: primary host name announced to clients [default: system hostname]"
    )]
    pub smtp_primary_host: Option<String>,

    #[arg(
        long,
        env = "ST_SMTP_MAX_ENVELOPE_SIZE",
        default_value = "50m",
        value_parser = parse_human_size,
        help = "Max size of an incoming email. Examples: 5k, 10m"
    )]
    pub smtp_max_envelope_size: usize,

    #[arg(
        long,
        env = "ST_TELEGRAM_CHAT_IDS",
        help = "Telegram: comma-separated list of chat ids, each optionally prefixed by a sender filter (`sender:chat`)"
    )]
    pub telegram_chat_ids: String,

    #[arg(long, env = "ST_TELEGRAM_BOT_TOKEN", hide_env_values = true, help = "Telegram: bot token")]
    pub telegram_bot_token: String,

    #[arg(
        long,
        env = "ST_TELEGRAM_API_PREFIX",
        default_value = DEFAULT_API_PREFIX,
        help = "Telegram: API url prefix"
    )]
    pub telegram_api_prefix: String,

    #[arg(
        long,
        env = "ST_TELEGRAM_API_TIMEOUT_SECONDS",
        default_value_t = 30.0,
        help = "Telegram: HTTP timeout used for requests to the Telegram API"
    )]
    pub telegram_api_timeout_seconds: f64,

    #[arg(
        long,
        env = "ST_TELEGRAM_MESSAGE_TEMPLATE",
        default_value = DEFAULT_TEMPLATE,
        help = "Telegram message template"
    )]
    pub message_template: String,

    #[arg(
        long,
        env = "ST_FORWARDED_ATTACHMENT_MAX_SIZE",
        default_value = "10m",
        value_parser = parse_human_size,
        help = "Max size of an attachment to be forwarded to telegram. 0 disables forwarding"
    )]
    pub forwarded_attachment_max_size: usize,

    #[arg(
        long,
        env = "ST_FORWARDED_ATTACHMENT_MAX_PHOTO_SIZE",
        default_value = "10m",
        value_parser = parse_human_size,
        help = "Max size of a photo attachment to be forwarded to telegram. 0 disables forwarding"
    )]
    pub forwarded_attachment_max_photo_size: usize,

    #[arg(
        long,
        env = "ST_FORWARDED_ATTACHMENT_RESPECT_ERRORS",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Reject the whole email if some attachments could not have been forwarded"
    )]
    pub forwarded_attachment_respect_errors: bool,

    #[arg(
        long,
        env = "ST_MESSAGE_LENGTH_TO_SEND_AS_FILE",
        default_value_t = 4095,
        help = "Telegram: messages longer than this are truncated and sent in full as a file"
    )]
    pub message_length_to_send_as_file: usize,

    #[arg(
        long,
        env = "ST_SHUTDOWN_TIMEOUT_SECONDS",
        default_value_t = 60,
        help = "Seconds to wait for in-flight emails on shutdown"
    )]
    pub shutdown_timeout_seconds: u64,
}

/// Validated relay configuration.
#[derive(Debug)]
pub struct RelayConfig {
    pub smtp: SmtpConfig,
    pub destinations: Vec<Destination>,
    pub bot_token: SecretString,
    pub api_prefix: String,
    pub api_timeout: Duration,
    pub notifier: NotifierConfig,
    pub respect_attachment_errors: bool,
}

impl Cli {
    /// Validate the parsed flags.
    pub fn into_config(self) -> Result<RelayConfig, ConfigError> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "telegram-bot-token".into(),
                hint: "Set ST_TELEGRAM_BOT_TOKEN to the token issued by @BotFather.".into(),
            });
        }
        let destinations = parse_destinations(&self.telegram_chat_ids)?;

        let timeout = self.telegram_api_timeout_seconds;
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "telegram-api-timeout-seconds".into(),
                message: format!("must be a positive number of seconds, got {timeout}"),
            });
        }

        let mut threshold = self.message_length_to_send_as_file;
        if threshold > TELEGRAM_MAX_MESSAGE_LENGTH {
            warn!(
                configured = threshold,
                max = TELEGRAM_MAX_MESSAGE_LENGTH,
                "message-length-to-send-as-file is above the Telegram limit, clamping"
            );
            threshold = TELEGRAM_MAX_MESSAGE_LENGTH;
        }

        let primary_host = self.smtp_primary_host.unwrap_or_else(system_hostname);

        Ok(RelayConfig {
            smtp: SmtpConfig {
                listen: self.smtp_listen,
                primary_host,
                max_envelope_size: self.smtp_max_envelope_size,
                shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
            },
            destinations,
            bot_token: SecretString::from(self.telegram_bot_token),
            api_prefix: self.telegram_api_prefix,
            api_timeout: Duration::from_secs_f64(timeout),
            notifier: NotifierConfig {
                template: Template::new(self.message_template),
                limits: SizeLimits {
                    photo: self.forwarded_attachment_max_photo_size,
                    document: self.forwarded_attachment_max_size,
                },
                send_as_file_threshold: threshold,
            },
            respect_attachment_errors: self.forwarded_attachment_respect_errors,
        })
    }
}

fn system_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "Unable to detect hostname, using localhost");
            "localhost".to_string()
        }
    }
}

/// Parse `2048`, `5k`, `10m`, `1.5MB`, `3 KiB` into bytes (decimal units).
pub fn parse_human_size(input: &str) -> Result<usize, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "size".into(),
        message,
    };

    let caps = HUMAN_SIZE
        .captures(input.trim())
        .ok_or_else(|| invalid(format!("{input:?} is not a size, expected e.g. 5k or 10m")))?;

    let number: f64 = caps[1]
        .parse()
        .map_err(|_| invalid(format!("{input:?} has a malformed number")))?;

    let exponent = match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 0,
        Some(unit) => match unit.as_str() {
            "k" => 1,
            "m" => 2,
            "g" => 3,
            "t" => 4,
            _ => 5,
        },
    };

    let bytes = number * 1000f64.powi(exponent);
    if bytes > usize::MAX as f64 {
        return Err(invalid(format!("{input:?} is too large")));
    }
    Ok(bytes as usize)
}
