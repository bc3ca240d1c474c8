use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::evidence::record::EvidenceRecord;
use crate::evidence::store::{EvidenceResult, EvidenceStore};
use crate::progress::{ProgressEvent, ProgressSink};

const PROGRESS_KIND: &str = "progress";

/// Progress sink that records every event as run evidence.
///
/// Write failures are logged and otherwise ignored.
pub struct EvidenceWriter {
    run_id: String,
    backlog: String,
    store: EvidenceStore,
    // Serializes the append plus manifest update.
    write_lock: Mutex<()>,
}

impl EvidenceWriter {
    pub fn try_new(
        state_root: &Path,
        run_id: impl Into<String>,
        backlog: impl Into<String>,
    ) -> EvidenceResult<Self> {
        Ok(Self {
            run_id: run_id.into(),
            backlog: backlog.into(),
            store: EvidenceStore::new(state_root)?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn store(&self) -> &EvidenceStore {
        &self.store
    }
}

impl ProgressSink for EvidenceWriter {
    fn emit(&self, event: &ProgressEvent) {
        let payload = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize evidence event");
                return;
            }
        };

        let record = EvidenceRecord::new(self.run_id.clone(), PROGRESS_KIND, payload);
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = self.store.append_record(&self.backlog, &record) {
            tracing::warn!(
                run_id = %self.run_id,
                dir = %self.store.root_dir().display(),
                error = %err,
                "failed to write evidence event"
            );
        }
    }
}

pub fn generate_run_id() -> String {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run-{}-{}", timestamp_ms, std::process::id())
}
