//! Incremental stub import

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};

use super::resume::compute_resume_point;
use crate::models::MessageRecord;
use crate::source::{ListQuery, MailSource};
use crate::storage::{DuplicateKeyError, MailStore};

/// Statistics from a stub import
#[derive(Debug, Clone)]
pub struct ImportStats {
    /// Lower bound used for the listing query
    pub resume_point: DateTime<Utc>,
    /// Number of message IDs returned by the source
    pub listed: usize,
    /// Number of new stubs written
    pub inserted: usize,
    /// Number of IDs that were already stored
    pub already_known: usize,
    /// Number of pages fetched
    pub pages: usize,
    /// Duration of the import
    pub duration_ms: u64,
}

/// List messages newer than the resume point and store a stub for each.
///
/// This operation is idempotent: ids already in the store are skipped, so
/// running it twice with no new upstream mail leaves the store unchanged.
/// The next run recomputes its resume point from whatever the store holds.
pub fn import_stubs(source: &dyn MailSource, store: &dyn MailStore) -> Result<ImportStats> {
    let start = std::time::Instant::now();

    let resume_point = compute_resume_point(store)?;
    let query = ListQuery::since(resume_point);
    info!(
        "Listing messages since {} ({})",
        resume_point.to_rfc3339(),
        query.search_expression().as_deref().unwrap_or("no date filter")
    );

    let mut stats = ImportStats {
        resume_point,
        listed: 0,
        inserted: 0,
        already_known: 0,
        pages: 0,
        duration_ms: 0,
    };
    let mut page_token: Option<String> = None;

    loop {
        let page = source
            .list_message_ids(&query, page_token.as_deref())
            .context("Can't list messages")?;
        stats.pages += 1;

        for id in page.ids {
            match store.insert_message(MessageRecord::stub(id)) {
                Ok(()) => stats.inserted += 1,
                Err(e) if e.downcast_ref::<DuplicateKeyError>().is_some() => {
                    stats.already_known += 1;
                }
                Err(e) => return Err(e.context("Can't insert message")),
            }
            stats.listed += 1;
        }
        info!("Processed {} messages", stats.listed);

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        "Import finished: {} new, {} known, {} pages in {}ms",
        stats.inserted, stats.already_known, stats.pages, stats.duration_ms
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DATE_SENTINEL, LabelId, MessageId, MessageMetadata};
    use crate::storage::InMemoryMailStore;
    use crate::sync::fake::FakeSource;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_import_follows_pages() {
        let source = FakeSource::new().with_pages(vec![vec!["m1", "m2"], vec!["m3"], vec![]]);
        let store = InMemoryMailStore::new();

        let stats = import_stubs(&source, &store).unwrap();

        assert_eq!(stats.pages, 3);
        assert_eq!(stats.listed, 3);
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.resume_point, DATE_SENTINEL);
        assert_eq!(store.count_unprocessed().unwrap(), 3);
        assert_eq!(source.queries()[0].newer_than, None);
        assert!(source.queries()[0].include_spam_trash);
    }

    #[test]
    fn test_import_twice_is_idempotent() {
        let source = FakeSource::new().with_pages(vec![vec!["m1", "m2"]]);
        let store = InMemoryMailStore::new();

        import_stubs(&source, &store).unwrap();
        let stats = import_stubs(&source, &store).unwrap();

        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.already_known, 2);
        assert_eq!(store.count_messages().unwrap(), 2);
    }

    #[test]
    fn test_import_does_not_reset_enriched_records() {
        let source = FakeSource::new().with_pages(vec![vec!["m1"]]);
        let store = InMemoryMailStore::new();
        let date = Utc.with_ymd_and_hms(2024, 2, 20, 9, 0, 0).unwrap();
        let metadata = MessageMetadata {
            internal_date: date,
            label_ids: vec![LabelId::new("INBOX")],
            size_estimate: 512,
        };
        store
            .insert_message(MessageRecord::enriched("m1", metadata.clone()))
            .unwrap();

        let stats = import_stubs(&source, &store).unwrap();

        assert_eq!(stats.resume_point, date - Duration::hours(48));
        assert_eq!(source.queries()[0].newer_than, Some(date - Duration::hours(48)));
        let record = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(record, MessageRecord::enriched("m1", metadata));
    }

    #[test]
    fn test_listing_failure_is_fatal() {
        let source = FakeSource::new().with_list_failure();
        let store = InMemoryMailStore::new();

        assert!(import_stubs(&source, &store).is_err());
        assert_eq!(store.count_messages().unwrap(), 0);
    }
}
