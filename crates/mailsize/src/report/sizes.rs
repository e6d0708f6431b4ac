use std::collections::HashMap;
use std::io::Write;

use anyhow::{Context, Result};

use crate::models::LabelId;
use crate::storage::MailStore;

/// First line of the rendered table
pub const TABLE_HEADER: &str = "LabelId;Label name;Messages size;Messages count";

/// Labels a report is restricted to.
///
/// Empty means "every label, one row each". Otherwise the labels form one
/// group and only messages carrying all of them are counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    labels: Vec<LabelId>,
}

impl LabelFilter {
    /// Filter matching every label separately
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<LabelId>,
    {
        Self {
            labels: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn labels(&self) -> &[LabelId] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One table row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeReport {
    pub label_ids: Vec<LabelId>,
    /// Same order as `label_ids`; empty for ids missing from the catalog
    pub label_names: Vec<String>,
    /// Sum of size estimates in bytes
    pub size: i64,
    pub count: u64,
}

/// Aggregate enriched message sizes.
///
/// With an empty filter, returns one report per stored label in name order.
/// Otherwise returns a single report for messages carrying every filter
/// label.
pub fn report_sizes(store: &dyn MailStore, filter: &LabelFilter) -> Result<Vec<SizeReport>> {
    let labels = store.list_labels().context("Can't read labels")?;

    if filter.is_empty() {
        return labels
            .into_iter()
            .map(|label| {
                let aggregate = store
                    .aggregate_sizes(std::slice::from_ref(&label.id))
                    .with_context(|| format!("Can't aggregate label {}", label.id))?;
                Ok(SizeReport {
                    label_ids: vec![label.id],
                    label_names: vec![label.name],
                    size: aggregate.size,
                    count: aggregate.count,
                })
            })
            .collect();
    }

    let names: HashMap<&LabelId, &str> = labels.iter().map(|l| (&l.id, l.name.as_str())).collect();
    let aggregate = store
        .aggregate_sizes(filter.labels())
        .context("Can't aggregate label combination")?;

    Ok(vec![SizeReport {
        label_ids: filter.labels().to_vec(),
        label_names: filter
            .labels()
            .iter()
            .map(|id| names.get(id).copied().unwrap_or_default().to_string())
            .collect(),
        size: aggregate.size,
        count: aggregate.count,
    }])
}

/// Render reports as the semicolon table, header first
pub fn write_table<W: Write>(mut writer: W, reports: &[SizeReport]) -> Result<()> {
    writeln!(writer, "{}", TABLE_HEADER)?;
    for report in reports {
        let ids: Vec<&str> = report.label_ids.iter().map(LabelId::as_str).collect();
        writeln!(
            writer,
            "{};{};{};{}",
            ids.join(","),
            report.label_names.join(","),
            report.size,
            report.count
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Label, MessageMetadata, MessageRecord};
    use crate::storage::InMemoryMailStore;
    use chrono::{TimeZone, Utc};

    fn enriched(id: &str, labels: &[&str], size: i64) -> MessageRecord {
        MessageRecord::enriched(
            id,
            MessageMetadata {
                internal_date: Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
                label_ids: labels.iter().map(|l| LabelId::new(*l)).collect(),
                size_estimate: size,
            },
        )
    }

    fn sample_store() -> InMemoryMailStore {
        let store = InMemoryMailStore::new();
        store
            .replace_labels(&[Label::new("A", "Alpha"), Label::new("B", "Beta"), Label::new("C", "Gamma")])
            .unwrap();
        store.insert_message(enriched("m1", &["A"], 100)).unwrap();
        store.insert_message(enriched("m2", &["A", "B"], 250)).unwrap();
        store.insert_message(MessageRecord::stub("m3")).unwrap();
        store
    }

    #[test]
    fn test_single_label_is_membership() {
        let reports = report_sizes(&sample_store(), &LabelFilter::from_ids(["A"])).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].label_names, vec!["Alpha"]);
        assert_eq!(reports[0].count, 2);
        assert_eq!(reports[0].size, 350);
    }

    #[test]
    fn test_several_labels_is_intersection() {
        let reports = report_sizes(&sample_store(), &LabelFilter::from_ids(["A", "B"])).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].count, 1);
        assert_eq!(reports[0].size, 250);
    }

    #[test]
    fn test_no_match_is_zero() {
        let reports = report_sizes(&sample_store(), &LabelFilter::from_ids(["C"])).unwrap();
        assert_eq!(reports[0].count, 0);
        assert_eq!(reports[0].size, 0);
    }

    #[test]
    fn test_empty_filter_reports_every_label() {
        let reports = report_sizes(&sample_store(), &LabelFilter::all()).unwrap();
        let rows: Vec<(&str, i64, u64)> = reports
            .iter()
            .map(|r| (r.label_ids[0].as_str(), r.size, r.count))
            .collect();
        assert_eq!(rows, vec![("A", 350, 2), ("B", 250, 1), ("C", 0, 0)]);
    }

    #[test]
    fn test_unknown_label_has_empty_name() {
        let reports = report_sizes(&sample_store(), &LabelFilter::from_ids(["A", "Z"])).unwrap();
        assert_eq!(reports[0].label_names, vec!["Alpha", ""]);
        assert_eq!(reports[0].count, 0);
    }

    #[test]
    fn test_write_table() {
        let reports = vec![
            SizeReport {
                label_ids: vec![LabelId::new("INBOX")],
                label_names: vec!["Inbox".to_string()],
                size: 1024,
                count: 3,
            },
            SizeReport {
                label_ids: vec![LabelId::new("A"), LabelId::new("B")],
                label_names: vec!["Alpha".to_string(), "Beta".to_string()],
                size: 0,
                count: 0,
            },
        ];

        let mut out = Vec::new();
        write_table(&mut out, &reports).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "LabelId;Label name;Messages size;Messages count\n\
             INBOX;Inbox;1024;3\n\
             A,B;Alpha,Beta;0;0\n"
        );
    }
}
