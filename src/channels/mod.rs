//! Channels at the edges of the relay: SMTP in, Telegram out.

pub mod delivery;
pub mod smtp;
pub mod telegram;

pub use delivery::DeliveryClient;
pub use smtp::{SmtpConfig, SmtpServer};
pub use telegram::TelegramClient;
