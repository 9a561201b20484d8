//! In-process quota store

use tokio::sync::Mutex;
use tracing::debug;

use crate::state::{CircuitState, QuotaDefaults, QuotaInfo, QuotaState, now_millis};
use crate::{QuotaStore, StoreFuture};

/// Quota record held in memory.
///
/// The Mutex makes each operation atomic over the record. Nothing survives a
/// restart; use `FileQuotaStore` when the record must outlive the process.
pub struct MemoryQuotaStore {
    defaults: QuotaDefaults,
    state: Mutex<Option<QuotaState>>,
}

impl MemoryQuotaStore {
    /// Empty store; the first read creates a record from `defaults`.
    pub fn new(defaults: QuotaDefaults) -> Self {
        Self {
            defaults,
            state: Mutex::new(None),
        }
    }

    /// Store seeded with an existing record.
    pub fn with_state(defaults: QuotaDefaults, state: QuotaState) -> Self {
        Self {
            defaults,
            state: Mutex::new(Some(state)),
        }
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn get_quota_state(&self) -> StoreFuture<'_, QuotaState> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let state = guard.get_or_insert_with(|| {
                debug!("no quota record, creating defaults");
                QuotaState::with_defaults(self.defaults)
            });
            Ok(state.clone())
        })
    }

    fn update_quota_state<'a>(
        &'a self,
        info: &'a QuotaInfo,
        latency_ms: u64,
        success: bool,
    ) -> StoreFuture<'a, QuotaState> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let state = guard.get_or_insert_with(|| QuotaState::with_defaults(self.defaults));
            state.apply_quota_info(info, latency_ms, success);
            Ok(state.clone())
        })
    }

    fn update_circuit_state(&self, circuit: CircuitState) -> StoreFuture<'_, QuotaState> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let state = guard.get_or_insert_with(|| QuotaState::with_defaults(self.defaults));
            state.apply_circuit_state(circuit, now_millis());
            Ok(state.clone())
        })
    }
}
