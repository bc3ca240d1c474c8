//! Run evidence: an append-only JSONL log of progress events per run.

pub mod record;
pub mod store;
pub mod writer;

pub use record::{EvidenceRecord, EvidenceRunMetadata, EVIDENCE_SCHEMA_VERSION};
pub use store::{EvidenceError, EvidenceResult, EvidenceStore};
pub use writer::{generate_run_id, EvidenceWriter};
