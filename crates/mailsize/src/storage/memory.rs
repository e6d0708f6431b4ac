//! In-memory storage implementation
//!
//! Used by tests and dry runs. Mirrors the constraints of the SQLite store:
//! unique message ids, unique label ids, all-or-nothing label replacement.

use anyhow::{Result, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{DuplicateKeyError, MailStore, SizeAggregate};
use crate::models::{Label, LabelId, MessageId, MessageMetadata, MessageRecord};

/// In-memory implementation of MailStore
pub struct InMemoryMailStore {
    messages: RwLock<HashMap<MessageId, MessageRecord>>,
    labels: RwLock<Vec<Label>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("store lock poisoned"))
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            labels: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for InMemoryMailStore {
    fn insert_message(&self, record: MessageRecord) -> Result<()> {
        let mut messages = write(&self.messages)?;
        if messages.contains_key(&record.id) {
            return Err(DuplicateKeyError(record.id).into());
        }
        messages.insert(record.id.clone(), record);
        Ok(())
    }

    fn update_message(&self, id: &MessageId, metadata: &MessageMetadata) -> Result<()> {
        if let Some(record) = write(&self.messages)?.get_mut(id) {
            record.apply(metadata.clone());
        }
        Ok(())
    }

    fn remove_message(&self, id: &MessageId) -> Result<()> {
        write(&self.messages)?.remove(id);
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<MessageRecord>> {
        Ok(read(&self.messages)?.get(id).cloned())
    }

    fn latest_message(&self) -> Result<Option<MessageRecord>> {
        Ok(read(&self.messages)?
            .values()
            .max_by(|a, b| a.internal_date.cmp(&b.internal_date).then(b.id.cmp(&a.id)))
            .cloned())
    }

    fn find_unprocessed(&self, limit: usize) -> Result<Vec<MessageId>> {
        let messages = read(&self.messages)?;
        let mut ids: Vec<MessageId> = messages
            .values()
            .filter(|m| !m.processed)
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(read(&self.messages)?.len())
    }

    fn count_unprocessed(&self) -> Result<usize> {
        Ok(read(&self.messages)?.values().filter(|m| !m.processed).count())
    }

    fn replace_labels(&self, labels: &[Label]) -> Result<()> {
        let mut seen = HashSet::new();
        for label in labels {
            if !seen.insert(&label.id) {
                bail!("duplicate key: label {} listed twice", label.id.as_str());
            }
        }

        *write(&self.labels)? = labels.to_vec();
        Ok(())
    }

    fn list_labels(&self) -> Result<Vec<Label>> {
        let mut labels = read(&self.labels)?.clone();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labels)
    }

    fn aggregate_sizes(&self, labels: &[LabelId]) -> Result<SizeAggregate> {
        Ok(read(&self.messages)?
            .values()
            .filter(|m| m.processed && m.has_all_labels(labels))
            .fold(SizeAggregate::default(), |acc, m| SizeAggregate {
                size: acc.size + m.size_estimate,
                count: acc.count + 1,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn metadata(day: u32, labels: &[&str], size: i64) -> MessageMetadata {
        MessageMetadata {
            internal_date: Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap(),
            label_ids: labels.iter().map(|l| LabelId::new(*l)).collect(),
            size_estimate: size,
        }
    }

    #[test]
    fn test_insert_duplicate() {
        let store = InMemoryMailStore::new();
        store.insert_message(MessageRecord::stub("m1")).unwrap();

        let err = store.insert_message(MessageRecord::stub("m1")).unwrap_err();
        assert!(err.downcast_ref::<DuplicateKeyError>().is_some());
        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[test]
    fn test_update_absent_is_noop() {
        let store = InMemoryMailStore::new();
        store
            .update_message(&MessageId::new("gone"), &metadata(1, &["A"], 10))
            .unwrap();
        assert_eq!(store.count_messages().unwrap(), 0);
    }

    #[test]
    fn test_latest_and_unprocessed() {
        let store = InMemoryMailStore::new();
        for id in ["m1", "m2", "m3"] {
            store.insert_message(MessageRecord::stub(id)).unwrap();
        }
        store
            .update_message(&MessageId::new("m2"), &metadata(9, &["A"], 10))
            .unwrap();
        store
            .update_message(&MessageId::new("m3"), &metadata(4, &["A"], 10))
            .unwrap();

        let latest = store.latest_message().unwrap().unwrap();
        assert_eq!(latest.id.as_str(), "m2");
        assert_eq!(store.find_unprocessed(10).unwrap(), vec![MessageId::new("m1")]);
        assert_eq!(store.count_unprocessed().unwrap(), 1);
    }

    #[test]
    fn test_replace_labels_rejects_duplicates() {
        let store = InMemoryMailStore::new();
        store.replace_labels(&[Label::new("A", "Alpha")]).unwrap();

        let result = store.replace_labels(&[Label::new("B", "Beta"), Label::new("B", "Bis")]);
        assert!(result.is_err());
        assert_eq!(store.list_labels().unwrap(), vec![Label::new("A", "Alpha")]);
    }
}
