//! JSON-file-backed quota store
//!
//! Keeps the record in memory and persists it on every mutation. The
//! in-memory copy only changes once the write has succeeded. Writes use a
//! temp file + rename so a crash mid-write never leaves a truncated record
//! behind. A tokio Mutex serializes operations from concurrent
//! governor invocations within this process.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::state::{CircuitState, QuotaDefaults, QuotaInfo, QuotaState, now_millis};
use crate::{QuotaStore, StoreFuture};

/// Quota record persisted as a single JSON document.
pub struct FileQuotaStore {
    path: PathBuf,
    state: Mutex<QuotaState>,
}

impl FileQuotaStore {
    /// Load the record from `path`.
    ///
    /// If the file doesn't exist, a default record is written so later loads
    /// skip the cold-start path.
    pub async fn load(path: PathBuf, defaults: QuotaDefaults) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading quota file: {e}")))?;
            let state: QuotaState = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing quota file: {e}")))?;
            info!(
                path = %path.display(),
                circuit = state.circuit_state.label(),
                requests_remaining = state.requests_remaining_rpd,
                tokens_remaining = state.tokens_remaining_tpm,
                "loaded quota record"
            );
            state
        } else {
            info!(path = %path.display(), "quota file not found, starting from defaults");
            let state = QuotaState::with_defaults(defaults);
            write_atomic(&path, &state).await?;
            state
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl QuotaStore for FileQuotaStore {
    fn get_quota_state(&self) -> StoreFuture<'_, QuotaState> {
        Box::pin(async move { Ok(self.state.lock().await.clone()) })
    }

    fn update_quota_state<'a>(
        &'a self,
        info: &'a QuotaInfo,
        latency_ms: u64,
        success: bool,
    ) -> StoreFuture<'a, QuotaState> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let mut next = guard.clone();
            next.apply_quota_info(info, latency_ms, success);
            write_atomic(&self.path, &next).await?;
            *guard = next.clone();
            Ok(next)
        })
    }

    fn update_circuit_state(&self, circuit: CircuitState) -> StoreFuture<'_, QuotaState> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let mut next = guard.clone();
            next.apply_circuit_state(circuit, now_millis());
            write_atomic(&self.path, &next).await?;
            debug!(circuit = circuit.label(), "persisted circuit state");
            *guard = next.clone();
            Ok(next)
        })
    }
}

/// Write the record to `path` atomically (temp file in the same directory,
/// then rename over the target). The temp name is derived from the target so
/// stores sharing a directory never collide.
async fn write_atomic(path: &Path, state: &QuotaState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| Error::Parse(format!("serializing quota record: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("quota path has no parent directory".into()))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Io("quota path has no file name".into()))?;
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp quota file: {e}")))?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp quota file: {e}")))?;

    debug!(path = %path.display(), "persisted quota record");
    Ok(())
}
