use crate::domain::model::{CellWrite, Record, RowWrite, SeenSet, UpsertOutcome};
use crate::domain::ports::RecordSink;
use crate::utils::error::Result;
use std::sync::Arc;

/// 輸出表格的欄位配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkLayout {
    pub key_column: String,
    pub timestamp_column: Option<String>,
}

impl Default for SinkLayout {
    fn default() -> Self {
        Self {
            key_column: "profileUrl".to_string(),
            timestamp_column: None,
        }
    }
}

/// 以網址為鍵的 upsert；一輪只開一次，寫入依序進行
pub struct SinkWriter {
    sink: Arc<dyn RecordSink>,
    layout: SinkLayout,
    header: Vec<String>,
    seen: SeenSet,
}

impl SinkWriter {
    /// 讀取快照並建立 Seen-Set
    pub async fn open(sink: Arc<dyn RecordSink>, layout: SinkLayout) -> Result<Self> {
        let snapshot = sink.snapshot().await?;
        let seen = SeenSet::from_snapshot(&snapshot, &layout.key_column);
        let header = snapshot.header.iter().map(|h| h.trim().to_string()).collect();

        tracing::debug!(
            "📖 Opened sink {}: {} row(s), {} known key(s)",
            sink.name(),
            snapshot.rows.len(),
            seen.len()
        );

        Ok(Self {
            sink,
            layout,
            header,
            seen,
        })
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// 已存在就覆寫該列的欄位，否則附加新列
    pub async fn upsert(&mut self, record: &Record) -> Result<UpsertOutcome> {
        let mut columns = vec![self.layout.key_column.clone()];
        columns.extend(record.fields.keys().cloned());
        columns.extend(self.layout.timestamp_column.clone());
        self.ensure_columns(&columns).await?;

        let existing = self.seen.get(&record.key).map(|entry| entry.row);
        let row = existing.unwrap_or_else(|| self.seen.next_row());

        let mut cells = Vec::with_capacity(record.fields.len() + 2);
        if existing.is_none() {
            cells.push(CellWrite {
                column: self.column_index(&self.layout.key_column),
                value: record.key.clone(),
            });
        }
        for (name, value) in &record.fields {
            cells.push(CellWrite {
                column: self.column_index(name),
                value: value.clone(),
            });
        }
        if let Some(ts) = &self.layout.timestamp_column {
            cells.push(CellWrite {
                column: self.column_index(ts),
                value: record.scraped_at.to_rfc3339(),
            });
        }
        cells.sort_by_key(|c| c.column);

        self.sink.write_row(&RowWrite { row, cells }).await?;
        self.seen.record_write(record, row);

        Ok(match existing {
            Some(row) => UpsertOutcome::Updated { row },
            None => UpsertOutcome::Appended { row },
        })
    }

    /// 缺少的欄位補在標題列最後
    async fn ensure_columns(&mut self, columns: &[String]) -> Result<()> {
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !self.header.contains(c))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let start = self.header.len();
        let cells = missing
            .iter()
            .enumerate()
            .map(|(i, name)| CellWrite {
                column: start + i,
                value: name.clone(),
            })
            .collect();

        tracing::info!("🧱 Adding column(s) to {}: {:?}", self.sink.name(), missing);
        self.sink.write_row(&RowWrite { row: 1, cells }).await?;
        self.header.extend(missing);
        Ok(())
    }

    fn column_index(&self, name: &str) -> usize {
        // ensure_columns 之後必定存在
        self.header
            .iter()
            .position(|h| h == name)
            .unwrap_or(self.header.len())
    }
}
