use crate::adapters::google_auth::TokenProvider;
use crate::adapters::{build_client, grid};
use crate::domain::model::{normalize_url, CellWrite, RowWrite, SinkSnapshot, Target};
use crate::domain::ports::{RecordSink, TargetSource};
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// 0 → A、25 → Z、26 → AA
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// 工作表名稱加上單引號，內含的單引號要重複
pub fn quote_sheet_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// 例如 `'Sheet1'!B2:D2`
pub fn a1_range(title: &str, row: usize, first_column: usize, last_column: usize) -> String {
    let start = format!("{}{}", column_letter(first_column), row);
    if first_column == last_column {
        format!("{}!{}", quote_sheet_title(title), start)
    } else {
        format!(
            "{}!{}:{}{}",
            quote_sheet_title(title),
            start,
            column_letter(last_column),
            row
        )
    }
}

/// 將已排序的儲存格依連續欄位分組
fn contiguous_runs(cells: &[CellWrite]) -> Vec<&[CellWrite]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=cells.len() {
        if i == cells.len() || cells[i].column != cells[i - 1].column + 1 {
            if start < i {
                runs.push(&cells[start..i]);
            }
            start = i;
        }
    }
    runs
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets v4 REST 的最小呼叫集合
pub struct SheetsClient {
    client: Client,
    base_url: String,
    sheet_id: String,
    tokens: Arc<dyn TokenProvider>,
    worksheet: Option<String>,
    resolved_title: OnceCell<String>,
}

impl SheetsClient {
    pub fn new(
        base_url: impl Into<String>,
        sheet_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let client = build_client(Client::builder().timeout(Duration::from_secs(30)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sheet_id: sheet_id.into(),
            tokens,
            worksheet: None,
            resolved_title: OnceCell::new(),
        })
    }

    /// 指定工作表；未指定時使用第一個
    pub fn with_worksheet(mut self, worksheet: Option<String>) -> Self {
        self.worksheet = worksheet;
        self
    }

    pub fn sheet_id(&self) -> &str {
        &self.sheet_id
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| MonitorError::config(format!("Invalid Sheets base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| MonitorError::config("Sheets base URL cannot be a base"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.sheet_id.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| MonitorError::sink(format!("Sheets request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(MonitorError::sink(format!(
            "Sheets API returned {} for sheet {}: {}",
            status, self.sheet_id, body
        )))
    }

    /// 設定的工作表名稱，或試算表中的第一個工作表
    pub async fn worksheet_title(&self) -> Result<String> {
        if let Some(title) = &self.worksheet {
            return Ok(title.clone());
        }

        let title = self
            .resolved_title
            .get_or_try_init(|| async {
                let mut url = self.endpoint(&[])?;
                url.query_pairs_mut()
                    .append_pair("fields", "sheets.properties.title");
                let meta: SpreadsheetMeta = self
                    .send(self.client.get(url))
                    .await?
                    .json()
                    .await
                    .map_err(|e| MonitorError::sink(format!("Invalid spreadsheet metadata: {}", e)))?;
                meta.sheets
                    .into_iter()
                    .next()
                    .map(|s| s.properties.title)
                    .ok_or_else(|| MonitorError::sink("Spreadsheet has no worksheets"))
            })
            .await?;
        Ok(title.clone())
    }

    /// 整張工作表（含標題列）
    pub async fn read_all(&self) -> Result<Vec<Vec<String>>> {
        let title = self.worksheet_title().await?;
        let range = quote_sheet_title(&title);
        let url = self.endpoint(&["values", range.as_str()])?;

        let values: ValueRange = self
            .send(self.client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| MonitorError::sink(format!("Invalid values response: {}", e)))?;

        Ok(values
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    /// 一列的所有儲存格在同一個 batchUpdate 請求中送出
    pub async fn update_row(&self, write: &RowWrite) -> Result<()> {
        if write.cells.is_empty() {
            return Ok(());
        }

        let title = self.worksheet_title().await?;
        let mut cells = write.cells.clone();
        cells.sort_by_key(|c| c.column);

        let data: Vec<Value> = contiguous_runs(&cells)
            .into_iter()
            .map(|run| {
                let first = run[0].column;
                let last = run[run.len() - 1].column;
                let values: Vec<&str> = run.iter().map(|c| c.value.as_str()).collect();
                json!({
                    "range": a1_range(&title, write.row, first, last),
                    "values": [values],
                })
            })
            .collect();

        let url = self.endpoint(&["values:batchUpdate"])?;
        let body = json!({
            "valueInputOption": "RAW",
            "data": data,
        });

        self.send(self.client.post(url).json(&body)).await?;
        tracing::debug!("📝 Wrote row {} of sheet {}", write.row, self.sheet_id);
        Ok(())
    }
}

/// 以試算表作為輸出
pub struct SheetSink {
    client: Arc<SheetsClient>,
}

impl SheetSink {
    pub fn new(client: Arc<SheetsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordSink for SheetSink {
    fn name(&self) -> &str {
        "google-sheet"
    }

    async fn snapshot(&self) -> Result<SinkSnapshot> {
        let grid = self.client.read_all().await?;
        Ok(grid::snapshot_of(&grid))
    }

    async fn write_row(&self, write: &RowWrite) -> Result<()> {
        self.client.update_row(write).await
    }
}

/// 以試算表的鍵欄作為目標清單
pub struct SheetTargetSource {
    client: Arc<SheetsClient>,
    key_column: String,
}

impl SheetTargetSource {
    pub fn new(client: Arc<SheetsClient>, key_column: impl Into<String>) -> Self {
        Self {
            client,
            key_column: key_column.into(),
        }
    }
}

#[async_trait]
impl TargetSource for SheetTargetSource {
    fn name(&self) -> &str {
        "google-sheet"
    }

    async fn load_targets(&self) -> Result<Vec<Target>> {
        let grid = self.client.read_all().await.map_err(|e| {
            MonitorError::config(format!("Cannot read targets from sheet: {}", e))
        })?;
        let snapshot = grid::snapshot_of(&grid);

        let idx = snapshot
            .header
            .iter()
            .position(|h| h.trim() == self.key_column)
            .ok_or_else(|| MonitorError::MissingConfigError {
                field: format!("sheet column '{}'", self.key_column),
            })?;

        let mut targets = Vec::new();
        for (i, row) in snapshot.rows.iter().enumerate() {
            let raw = row.get(idx).map(String::as_str).unwrap_or_default();
            match Target::parse(raw) {
                Some(target) => targets.push(target),
                None if normalize_url(raw).is_some() => {
                    tracing::debug!("Row {}: '{}' is not a LinkedIn profile or company", i + 2, raw);
                }
                None => {}
            }
        }
        Ok(targets)
    }
}
