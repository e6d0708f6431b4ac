//! Message record mirrored from the remote mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LabelId;

/// Placeholder date carried by records that have not been enriched yet.
///
/// Any real message date sorts after it, so the newest record in the store
/// is enriched whenever at least one enriched record exists.
pub const DATE_SENTINEL: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Detail fields fetched for a single message during enrichment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Gmail's internal timestamp
    pub internal_date: DateTime<Utc>,
    /// Label IDs currently applied, in the order Gmail returns them
    pub label_ids: Vec<LabelId>,
    /// Estimated size in bytes
    pub size_estimate: i64,
}

/// A message as stored locally.
///
/// Created as a stub holding only its id, then filled in once by a worker
/// of the enrichment pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub label_ids: Vec<LabelId>,
    /// False until enrichment succeeds; never goes back to false
    pub processed: bool,
    pub size_estimate: i64,
    pub internal_date: DateTime<Utc>,
}

impl MessageRecord {
    /// Create a stub awaiting enrichment
    pub fn stub(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            label_ids: Vec::new(),
            processed: false,
            size_estimate: 0,
            internal_date: DATE_SENTINEL,
        }
    }

    /// Create a fully enriched record
    pub fn enriched(id: impl Into<MessageId>, metadata: MessageMetadata) -> Self {
        let mut record = Self::stub(id);
        record.apply(metadata);
        record
    }

    /// Overwrite the detail fields and mark the record settled
    pub fn apply(&mut self, metadata: MessageMetadata) {
        self.label_ids = metadata.label_ids;
        self.size_estimate = metadata.size_estimate;
        self.internal_date = metadata.internal_date;
        self.processed = true;
    }

    /// Whether the record carries every one of the given labels
    pub fn has_all_labels<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        labels
            .iter()
            .all(|label| self.label_ids.iter().any(|l| l.as_str() == label.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata() -> MessageMetadata {
        MessageMetadata {
            internal_date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            label_ids: vec![LabelId::new("A"), LabelId::new("B")],
            size_estimate: 1000,
        }
    }

    #[test]
    fn test_stub_defaults() {
        let stub = MessageRecord::stub("m1");
        assert_eq!(stub.id.as_str(), "m1");
        assert!(!stub.processed);
        assert!(stub.label_ids.is_empty());
        assert_eq!(stub.size_estimate, 0);
        assert_eq!(stub.internal_date, DATE_SENTINEL);
    }

    #[test]
    fn test_apply_marks_processed() {
        let mut record = MessageRecord::stub("m1");
        record.apply(metadata());

        assert!(record.processed);
        assert_eq!(record.size_estimate, 1000);
        assert_eq!(record.label_ids, vec![LabelId::new("A"), LabelId::new("B")]);
        assert_eq!(record, MessageRecord::enriched("m1", metadata()));
    }

    #[test]
    fn test_has_all_labels() {
        let record = MessageRecord::enriched("m1", metadata());
        assert!(record.has_all_labels(&["A"]));
        assert!(record.has_all_labels(&["B", "A"]));
        assert!(!record.has_all_labels(&["A", "C"]));
        assert!(record.has_all_labels::<&str>(&[]));
    }
}
