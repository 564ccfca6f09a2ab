//! SMTP to Telegram relay: receives mail over SMTP and forwards each
//! message, with its attachments, to Telegram chats.

pub mod channels;
pub mod config;
pub mod error;
pub mod mail;
pub mod pipeline;
