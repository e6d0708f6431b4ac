//! Size reports over enriched messages
//!
//! Aggregates stored sizes per label or per label combination and renders
//! them as a semicolon separated table.

mod sizes;

pub use sizes::{LabelFilter, SizeReport, TABLE_HEADER, report_sizes, write_table};
