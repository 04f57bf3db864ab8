//! Scratch journal for in-flight recording state.
//!
//! The journal exists only so a restarted daemon can tell which surface the
//! user asked to reopen and which track it was writing to. It is rewritten on
//! every start and removed on every clean stop. A missing or unreadable
//! journal means "nothing to recover".

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Result, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingScratch {
    pub target_component: String,
    pub track_uri: String,
}

pub struct ScratchJournal {
    path: PathBuf,
}

impl ScratchJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persist(&self, scratch: &RecordingScratch) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(TrackerError::io("create journal dir"))?;
        }

        let payload =
            serde_json::to_vec_pretty(scratch).map_err(TrackerError::json("serialize journal"))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload).map_err(TrackerError::io("write journal"))?;
        fs::rename(&tmp_path, &self.path).map_err(TrackerError::io("commit journal"))?;
        Ok(())
    }

    pub fn load(&self) -> Option<RecordingScratch> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(error = %err, "Failed to read recording journal; treating as empty");
                return None;
            }
        };

        match serde_json::from_slice::<RecordingScratch>(&data) {
            Ok(scratch) => Some(scratch),
            Err(err) => {
                warn!(error = %err, "Recording journal is corrupt; treating as empty");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TrackerError::Io {
                context: "remove journal".to_string(),
                source: err,
            }),
        }
    }
}
