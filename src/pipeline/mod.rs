//! Notification pipeline.
//!
//! Every accepted envelope flows through:
//! 1. `classify`: decides which parts can be forwarded
//! 2. `format_envelope()`: renders the template and attachment summary
//! 3. `truncate()`: fits the text into one Telegram message
//! 4. `Dispatcher::dispatch()`: delivers to each matching chat
//!
//! No state is kept between envelopes.

pub mod classify;
pub mod dispatch;
pub mod format;
pub mod processor;
pub mod truncate;
pub mod types;

pub use dispatch::{Destination, Dispatcher};
pub use processor::{NotificationSink, Notifier, NotifierConfig};
