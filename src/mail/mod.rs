//! Inbound mail: the envelope model and the MIME intake adapter.

pub mod envelope;
pub mod mime;

pub use envelope::{ContentPart, Envelope, PartRole};
pub use mime::parse_envelope;
