use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::evidence::record::{EvidenceRecord, EvidenceRunMetadata};

const EVIDENCE_DIR_NAME: &str = "evidence";
const RUNS_DIR_NAME: &str = "runs";
const MANIFEST_FILE_NAME: &str = "run.json";
const EVENTS_FILE_NAME: &str = "events.jsonl";

/// Errors that can occur during evidence storage operations.
#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid run ID")]
    InvalidRunId,
}

pub type EvidenceResult<T> = Result<T, EvidenceError>;

/// Append-only run evidence under `<state root>/evidence/runs/<run-id>/`.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root_dir: PathBuf,
}

impl EvidenceStore {
    /// `state_root` is the repository's state directory (e.g. `<repo>/.ralph`).
    pub fn new(state_root: impl Into<PathBuf>) -> EvidenceResult<Self> {
        let root_dir = state_root.into().join(EVIDENCE_DIR_NAME);
        fs::create_dir_all(root_dir.join(RUNS_DIR_NAME))?;
        Ok(Self { root_dir })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root_dir.join(RUNS_DIR_NAME).join(run_id)
    }

    /// Append one record and bump the run manifest.
    ///
    /// `backlog` is only used when the manifest is first created.
    pub fn append_record(&self, backlog: &str, record: &EvidenceRecord) -> EvidenceResult<()> {
        if record.run_id.trim().is_empty() {
            return Err(EvidenceError::InvalidRunId);
        }

        let run_dir = self.run_dir(&record.run_id);
        fs::create_dir_all(&run_dir)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(EVENTS_FILE_NAME))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.sync_all()?;

        let mut metadata = match self.read_metadata(&record.run_id)? {
            Some(metadata) => metadata,
            None => EvidenceRunMetadata::new(&record.run_id, backlog, record.recorded_at),
        };
        metadata.record(record.recorded_at);
        self.write_metadata(&run_dir, &metadata)
    }

    /// All records of a run in append order. A run without evidence has none.
    pub fn read_records(&self, run_id: &str) -> EvidenceResult<Vec<EvidenceRecord>> {
        let path = self.run_dir(run_id).join(EVENTS_FILE_NAME);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    pub fn read_metadata(&self, run_id: &str) -> EvidenceResult<Option<EvidenceRunMetadata>> {
        match fs::read_to_string(self.run_dir(run_id).join(MANIFEST_FILE_NAME)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EvidenceError::Io(err)),
        }
    }

    fn write_metadata(&self, run_dir: &Path, metadata: &EvidenceRunMetadata) -> EvidenceResult<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        let temp_path = run_dir.join(format!("{}.tmp", MANIFEST_FILE_NAME));

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, run_dir.join(MANIFEST_FILE_NAME))?;

        Ok(())
    }
}
