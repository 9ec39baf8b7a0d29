use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use harvester_core::WorkflowDocument;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::filename::document_filename;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize workflow: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Written(PathBuf),
    /// A file already existed at the target; it was left untouched.
    Skipped(PathBuf),
}

impl PersistOutcome {
    pub fn path(&self) -> &Path {
        match self {
            PersistOutcome::Written(path) | PersistOutcome::Skipped(path) => path,
        }
    }
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    // Basic writability probe: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Write `{dir}/{filename}` through a temp file, never replacing an existing file.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_new(&self, filename: &str, content: &[u8]) -> Result<PersistOutcome, PersistError> {
        let target = self.dir.join(filename);
        if target.exists() {
            return Ok(PersistOutcome::Skipped(target));
        }
        ensure_output_dir(&self.dir)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        // A concurrent writer may have won the race since the check above.
        match tmp.persist_noclobber(&target) {
            Ok(_) => Ok(PersistOutcome::Written(target)),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(PersistOutcome::Skipped(target))
            }
            Err(e) => Err(PersistError::Io(e.error)),
        }
    }
}

/// Writes workflow documents into one flat directory, idempotently.
///
/// Filenames come from [`document_filename`], so the same candidate maps to the
/// same file in every run regardless of the order candidates complete in.
pub struct Persister {
    writer: AtomicFileWriter,
}

impl Persister {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
        }
    }

    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    pub fn persist(&self, doc: &WorkflowDocument) -> Result<PersistOutcome, PersistError> {
        let filename = document_filename(doc);
        let target = self.writer.dir().join(&filename);
        if target.exists() {
            return Ok(PersistOutcome::Skipped(target));
        }
        let content = serde_json::to_string_pretty(doc.content())?;
        self.writer.write_new(&filename, content.as_bytes())
    }
}
