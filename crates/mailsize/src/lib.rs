//! Mailsize - mirror Gmail message metadata and report storage per label
//!
//! This crate provides:
//! - Domain models (MessageRecord, Label)
//! - A mail source abstraction and its Gmail API implementation
//! - Storage trait abstractions with SQLite and in-memory backends
//! - Idempotent sync steps: label refresh, stub import, enrichment pool
//! - Size aggregation and table rendering

pub mod config;
pub mod gmail;
pub mod models;
pub mod report;
pub mod source;
pub mod storage;
pub mod sync;

pub use self::config::GmailCredentials;
pub use gmail::{GmailAuth, GmailClient};
pub use models::{DATE_SENTINEL, Label, LabelId, MessageId, MessageMetadata, MessageRecord};
pub use report::{LabelFilter, SizeReport, report_sizes, write_table};
pub use source::{FetchError, ListQuery, MailSource, MessagePage};
pub use storage::{DuplicateKeyError, InMemoryMailStore, MailStore, SizeAggregate, SqliteMailStore};
pub use sync::{
    // Sync steps
    EnrichError, EnrichOptions, EnrichStats, ImportStats, WorkerError, enrich_all, import_stubs,
    refresh_labels,
    // Resume point (for inspection and tests)
    RESUME_MARGIN, compute_resume_point,
};
