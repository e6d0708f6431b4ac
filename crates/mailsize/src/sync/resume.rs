//! Resume point computation for incremental stub import
//!
//! Pure functions that can be tested without a store.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::models::{DATE_SENTINEL, MessageRecord};
use crate::storage::MailStore;

/// Overlap kept behind the newest known message.
///
/// Messages can arrive out of order or with lagging timestamps; listing two
/// days back trades redundant work for never leaving a gap.
pub const RESUME_MARGIN: Duration = Duration::hours(48);

/// Lower bound for the next listing query, given the newest stored record.
///
/// # Returns
/// The sentinel when nothing has been enriched yet, otherwise the newest
/// date minus [`RESUME_MARGIN`].
pub fn resume_point(latest: Option<&MessageRecord>) -> DateTime<Utc> {
    match latest {
        Some(record) if record.processed && record.internal_date > DATE_SENTINEL => {
            (record.internal_date - RESUME_MARGIN).max(DATE_SENTINEL)
        }
        _ => DATE_SENTINEL,
    }
}

/// Compute the resume point from the current store contents
pub fn compute_resume_point(store: &dyn MailStore) -> Result<DateTime<Utc>> {
    let latest = store.latest_message()?;
    Ok(resume_point(latest.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LabelId, MessageMetadata};
    use chrono::TimeZone;

    fn enriched_at(date: DateTime<Utc>) -> MessageRecord {
        MessageRecord::enriched(
            "m1",
            MessageMetadata {
                internal_date: date,
                label_ids: vec![LabelId::new("INBOX")],
                size_estimate: 10,
            },
        )
    }

    #[test]
    fn test_empty_store_uses_sentinel() {
        assert_eq!(resume_point(None), DATE_SENTINEL);
    }

    #[test]
    fn test_stub_only_uses_sentinel() {
        let stub = MessageRecord::stub("m1");
        assert_eq!(resume_point(Some(&stub)), DATE_SENTINEL);
    }

    #[test]
    fn test_subtracts_margin() {
        let date = Utc.with_ymd_and_hms(2024, 6, 10, 15, 30, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 6, 8, 15, 30, 0).unwrap();
        assert_eq!(resume_point(Some(&enriched_at(date))), expected);
    }

    #[test]
    fn test_never_goes_below_sentinel() {
        let date = DATE_SENTINEL + Duration::hours(3);
        assert_eq!(resume_point(Some(&enriched_at(date))), DATE_SENTINEL);
    }
}
