//! Domain models for mirrored mail entities

mod label;
mod message;

pub use label::{Label, LabelId};
pub use message::{DATE_SENTINEL, MessageId, MessageMetadata, MessageRecord};
