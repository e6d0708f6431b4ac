//! Storage trait definitions

use crate::models::{Label, LabelId, MessageId, MessageMetadata, MessageRecord};
use anyhow::Result;

/// Returned by [`MailStore::insert_message`] when the id is already stored.
///
/// Stub insertion treats this as "already known"; callers find it with
/// `err.downcast_ref::<DuplicateKeyError>()`.
#[derive(Debug, thiserror::Error)]
#[error("duplicate key: message {0} already exists")]
pub struct DuplicateKeyError(pub MessageId);

/// Sum and count over a set of enriched messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeAggregate {
    /// Sum of size estimates in bytes
    pub size: i64,
    /// Number of matching messages
    pub count: u64,
}

/// Trait for message/label storage operations
///
/// All mutations are keyed by a single message id, and each call is atomic
/// on its own. Backends must be safe to share between the enrichment workers.
pub trait MailStore: Send + Sync {
    // === Messages ===

    /// Insert a new record; fails with [`DuplicateKeyError`] if the id exists
    fn insert_message(&self, record: MessageRecord) -> Result<()>;

    /// Store enrichment results and mark the record processed.
    ///
    /// Does nothing if the record has been removed in the meantime.
    fn update_message(&self, id: &MessageId, metadata: &MessageMetadata) -> Result<()>;

    /// Remove a record; removing an absent id is not an error
    fn remove_message(&self, id: &MessageId) -> Result<()>;

    /// Get a record by id
    fn get_message(&self, id: &MessageId) -> Result<Option<MessageRecord>>;

    /// The record with the greatest internal date, if any
    fn latest_message(&self) -> Result<Option<MessageRecord>>;

    /// Up to `limit` ids of records with `processed = false`
    fn find_unprocessed(&self, limit: usize) -> Result<Vec<MessageId>>;

    /// Count all records
    fn count_messages(&self) -> Result<usize>;

    /// Count records awaiting enrichment
    fn count_unprocessed(&self) -> Result<usize>;

    // === Labels ===

    /// Discard the stored label snapshot and store `labels` in its place.
    ///
    /// Fails without touching the previous snapshot if `labels` repeats an id.
    fn replace_labels(&self, labels: &[Label]) -> Result<()>;

    /// All stored labels, sorted by name
    fn list_labels(&self) -> Result<Vec<Label>>;

    // === Aggregation ===

    /// Sum and count enriched records carrying every label in `labels`.
    ///
    /// An empty slice matches every enriched record.
    fn aggregate_sizes(&self, labels: &[LabelId]) -> Result<SizeAggregate>;
}
