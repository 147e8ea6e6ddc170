//! Per-epoch evaluation error logs (`error_valid.log`, `error_test.log`).

use crate::error::Result;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const VALID_LOG: &str = "error_valid.log";
pub const TEST_LOG: &str = "error_test.log";

/// One line per epoch, three decimals, `nan` when nothing was evaluated.
pub struct ErrorLog {
    path: PathBuf,
    file: File,
}

impl ErrorLog {
    /// Create or truncate the log at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, error: Option<f64>) -> Result<()> {
        writeln!(self.file, "{}", format_error(error))?;
        self.file.flush()?;
        Ok(())
    }
}

pub fn format_error(error: Option<f64>) -> String {
    match error {
        Some(v) if !v.is_nan() => format!("{v:.3}"),
        _ => "nan".to_string(),
    }
}
