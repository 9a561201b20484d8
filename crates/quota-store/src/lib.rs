//! Persisted quota and circuit state for the Groq governor
//!
//! Holds the single `QuotaState` record per provider integration and the
//! three operations the governor relies on: read (creating defaults when no
//! record exists), record a dispatch outcome, and move the circuit.
//!
//! Each operation is atomic over the record. The governor's full
//! read-modify-write cycle is not: two concurrent invocations may both act on
//! the same snapshot. Stores are instances, never process-wide globals, so
//! independent integrations and tests don't share state.
//!
//! Implementations:
//! - `MemoryQuotaStore`: in-process, for tests and single-instance use
//! - `FileQuotaStore`: JSON file with atomic temp-file + rename writes

pub mod error;
pub mod file;
pub mod memory;
pub mod state;

pub use error::{Error, Result};
pub use file::FileQuotaStore;
pub use memory::MemoryQuotaStore;
pub use state::{
    CircuitState, DEFAULT_REQUESTS_PER_DAY, DEFAULT_TOKENS_PER_MINUTE, QuotaDefaults, QuotaInfo,
    QuotaState, now_millis,
};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations, kept dyn-compatible so the
/// governor can hold an `Arc<dyn QuotaStore>`.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The quota record collaborator.
///
/// Every method returns the record as it stands after the operation, so the
/// caller can make follow-up decisions without a second read.
pub trait QuotaStore: Send + Sync {
    /// Current record, created from defaults if none exists yet.
    fn get_quota_state(&self) -> StoreFuture<'_, QuotaState>;

    /// Record the quota snapshot and latency of one completed dispatch.
    /// `success` resets the failure streak; a failure extends it.
    fn update_quota_state<'a>(
        &'a self,
        info: &'a QuotaInfo,
        latency_ms: u64,
        success: bool,
    ) -> StoreFuture<'a, QuotaState>;

    /// Move the circuit to `state`, maintaining `circuit_opened_at`.
    fn update_circuit_state(&self, state: CircuitState) -> StoreFuture<'_, QuotaState>;
}
