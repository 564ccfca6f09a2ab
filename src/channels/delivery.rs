//! Delivery abstraction: the two outbound operations the relay needs from a
//! chat platform.

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::pipeline::types::{DeliveryReceipt, OutgoingAttachment};

/// Outbound side of a chat platform.
///
/// Implementations apply their own request timeout and never retry; a
/// timeout surfaces as a [`DeliveryError`] like any other failure.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Platform name, for logs.
    fn name(&self) -> &str;

    /// Send the notification text and return a handle to the new message.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, DeliveryError>;

    /// Upload an attachment as a reply to a previously sent message.
    async fn send_attachment(
        &self,
        chat_id: &str,
        reply_to: &DeliveryReceipt,
        attachment: &OutgoingAttachment,
    ) -> Result<(), DeliveryError>;
}
