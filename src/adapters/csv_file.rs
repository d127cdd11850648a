use crate::adapters::grid;
use crate::domain::model::{RowWrite, SinkSnapshot};
use crate::domain::ports::RecordSink;
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// 本機 CSV 輸出；每次寫入都以暫存檔 + rename 整檔替換
pub struct CsvFileSink {
    path: PathBuf,
    name: String,
    lock: Mutex<()>,
}

impl CsvFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("csv:{}", path.display()),
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_grid(&self) -> Result<Vec<Vec<String>>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let mut grid = Vec::new();
        for record in reader.records() {
            let record = record?;
            grid.push(record.iter().map(|s| s.to_string()).collect());
        }
        Ok(grid)
    }

    fn write_grid(&self, grid: &[Vec<String>]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let width = grid.iter().map(Vec::len).max().unwrap_or(0);
        let tmp_path = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(&tmp_path)?;
            for row in grid {
                let mut padded = row.clone();
                padded.resize(width, String::new());
                writer.write_record(&padded)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for CsvFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn snapshot(&self) -> Result<SinkSnapshot> {
        let _guard = self.lock.lock().await;
        let grid = self
            .read_grid()
            .map_err(|e| MonitorError::sink(format!("cannot read {}: {}", self.path.display(), e)))?;
        Ok(grid::snapshot_of(&grid))
    }

    async fn write_row(&self, write: &RowWrite) -> Result<()> {
        let _guard = self.lock.lock().await;
        let result = self.read_grid().and_then(|mut grid| {
            grid::apply_write(&mut grid, write)?;
            self.write_grid(&grid)
        });
        result.map_err(|e| MonitorError::sink(format!("cannot write {}: {}", self.path.display(), e)))
    }
}
