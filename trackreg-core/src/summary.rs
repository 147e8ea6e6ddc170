//! Train-step summary events.
//!
//! Summaries returned by the backend are appended as JSON lines to
//! `{summaries_dir}/train/events.jsonl`.

use crate::error::Result;
use crate::model::Summary;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const EVENTS_FILE: &str = "events.jsonl";

/// Whether the summary of `global_step` should be written.
pub fn should_write(global_step: usize, summary_step: usize) -> bool {
    summary_step > 0 && global_step > 0 && global_step % summary_step == 0
}

#[derive(Serialize)]
struct Event<'a> {
    step: usize,
    wall_time: f64,
    scalars: &'a BTreeMap<String, f64>,
}

pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SummaryWriter {
    /// Open (or append to) the train event file under `summaries_dir`.
    pub fn create(summaries_dir: &Path) -> Result<Self> {
        let dir = summaries_dir.join("train");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(EVENTS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, step: usize, summary: &Summary) -> Result<()> {
        let event = Event {
            step,
            wall_time: Utc::now().timestamp_millis() as f64 / 1000.0,
            scalars: &summary.scalars,
        };
        serde_json::to_writer(&mut self.out, &event)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_write() {
        assert!(!should_write(0, 10));
        assert!(!should_write(5, 10));
        assert!(should_write(10, 10));
        assert!(should_write(20, 10));
        assert!(!should_write(3, 0));
    }

    #[test]
    fn test_events_are_appended() {
        let dir = tempfile::TempDir::new().unwrap();
        let summary = Summary::default().scalar("rmse", 0.5);

        let mut writer = SummaryWriter::create(dir.path()).unwrap();
        writer.write(10, &summary).unwrap();
        drop(writer);
        let mut writer = SummaryWriter::create(dir.path()).unwrap();
        writer.write(20, &summary).unwrap();

        let content = std::fs::read_to_string(dir.path().join("train").join(EVENTS_FILE)).unwrap();
        let steps: Vec<u64> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["step"].as_u64().unwrap())
            .collect();
        assert_eq!(steps, vec![10, 20]);
    }
}
