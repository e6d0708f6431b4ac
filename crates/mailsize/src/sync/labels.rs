//! Label catalog refresh

use anyhow::{Context, Result};
use log::info;

use crate::source::MailSource;
use crate::storage::MailStore;

/// Replace the stored label snapshot with the source's current labels.
///
/// Returns the number of labels imported. Any failure leaves the previous
/// snapshot in place and is returned to the caller.
pub fn refresh_labels(source: &dyn MailSource, store: &dyn MailStore) -> Result<usize> {
    let labels = source.list_labels().context("Unable to retrieve labels")?;

    store
        .replace_labels(&labels)
        .context("Can't store label snapshot")?;

    info!("Imported labels: {}", labels.len());
    Ok(labels.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use crate::storage::InMemoryMailStore;
    use crate::sync::fake::FakeSource;

    #[test]
    fn test_refresh_replaces_snapshot() {
        let store = InMemoryMailStore::new();
        store.replace_labels(&[Label::new("OLD", "Old")]).unwrap();
        let source = FakeSource::new().with_labels(vec![
            Label::new("INBOX", "INBOX"),
            Label::new("Label_9", "Bills"),
        ]);

        assert_eq!(refresh_labels(&source, &store).unwrap(), 2);
        assert_eq!(
            store.list_labels().unwrap(),
            vec![Label::new("Label_9", "Bills"), Label::new("INBOX", "INBOX")]
        );
    }

    #[test]
    fn test_duplicate_ids_keep_previous_snapshot() {
        let store = InMemoryMailStore::new();
        store.replace_labels(&[Label::new("OLD", "Old")]).unwrap();
        let source = FakeSource::new()
            .with_labels(vec![Label::new("A", "Alpha"), Label::new("A", "Again")]);

        assert!(refresh_labels(&source, &store).is_err());
        assert_eq!(store.list_labels().unwrap(), vec![Label::new("OLD", "Old")]);
    }
}
