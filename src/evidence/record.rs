use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current evidence schema version.
pub const EVIDENCE_SCHEMA_VERSION: u32 = 1;

/// One line of a run's `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub schema_version: u32,
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    /// Record family, e.g. "progress".
    pub kind: String,
    pub payload: Value,
}

impl EvidenceRecord {
    pub fn new(run_id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            schema_version: EVIDENCE_SCHEMA_VERSION,
            run_id: run_id.into(),
            recorded_at: Utc::now(),
            kind: kind.into(),
            payload,
        }
    }
}

/// Contents of a run's `run.json` manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRunMetadata {
    pub schema_version: u32,
    pub run_id: String,
    /// Backlog the run worked on.
    #[serde(default)]
    pub backlog: String,
    pub created_at: DateTime<Utc>,
    /// Time of the latest record.
    pub updated_at: DateTime<Utc>,
    pub record_count: u64,
}

impl EvidenceRunMetadata {
    pub fn new(
        run_id: impl Into<String>,
        backlog: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: EVIDENCE_SCHEMA_VERSION,
            run_id: run_id.into(),
            backlog: backlog.into(),
            created_at: timestamp,
            updated_at: timestamp,
            record_count: 0,
        }
    }

    pub fn record(&mut self, timestamp: DateTime<Utc>) {
        self.updated_at = timestamp;
        self.record_count = self.record_count.saturating_add(1);
    }
}
