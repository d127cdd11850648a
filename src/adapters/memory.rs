use crate::adapters::grid;
use crate::domain::model::{RowWrite, SinkSnapshot};
use crate::domain::ports::RecordSink;
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 程序內的表格，用於 `--once` 乾跑與測試
#[derive(Clone, Default)]
pub struct MemorySink {
    grid: Arc<Mutex<Vec<Vec<String>>>>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第一列為標題
    pub fn with_rows<S: Into<String>>(rows: Vec<Vec<S>>) -> Self {
        let grid = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        Self {
            grid: Arc::new(Mutex::new(grid)),
            ..Self::default()
        }
    }

    pub async fn grid(&self) -> Vec<Vec<String>> {
        self.grid.lock().await.clone()
    }

    /// 模擬試算表無法連線
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MonitorError::sink("memory sink is unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn snapshot(&self) -> Result<SinkSnapshot> {
        self.check_available()?;
        let grid = self.grid.lock().await;
        Ok(grid::snapshot_of(&grid))
    }

    async fn write_row(&self, write: &RowWrite) -> Result<()> {
        self.check_available()?;
        let mut grid = self.grid.lock().await;
        grid::apply_write(&mut grid, write)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
