//! Sync engine for mirroring mail metadata
//!
//! Three idempotent steps that can be safely re-run: refresh the label
//! catalog, import stubs for newly listed messages, and enrich stubs with
//! their metadata.

mod enrich;
mod import;
mod labels;
mod resume;

#[cfg(test)]
mod fake;

pub use enrich::{
    DEFAULT_BATCH_SIZE, EnrichError, EnrichOptions, EnrichStats, MAX_CONCURRENCY,
    MIN_CONCURRENCY, Outcome, RATE_LIMIT_BACKOFF, WorkerError, enrich_all, enrich_one,
};
pub use import::{ImportStats, import_stubs};
pub use labels::refresh_labels;
pub use resume::{RESUME_MARGIN, compute_resume_point, resume_point};
