use crate::domain::model::{RowWrite, SinkSnapshot};
use crate::utils::error::{MonitorError, Result};

/// 整張表（含標題列）拆成快照
pub fn snapshot_of(grid: &[Vec<String>]) -> SinkSnapshot {
    let mut rows = grid.iter();
    let header = rows.next().cloned().unwrap_or_default();
    SinkSnapshot {
        header,
        rows: rows.cloned().collect(),
    }
}

/// 將單列寫入套用到記憶體中的表格，必要時補空列空格
pub fn apply_write(grid: &mut Vec<Vec<String>>, write: &RowWrite) -> Result<()> {
    if write.row == 0 {
        return Err(MonitorError::sink("row numbers start at 1"));
    }

    let idx = write.row - 1;
    if grid.len() <= idx {
        grid.resize_with(idx + 1, Vec::new);
    }

    let row = &mut grid[idx];
    for cell in &write.cells {
        if row.len() <= cell.column {
            row.resize(cell.column + 1, String::new());
        }
        row[cell.column] = cell.value.clone();
    }
    Ok(())
}
