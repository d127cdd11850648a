use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Profile,
    Company,
}

impl TargetKind {
    fn path_marker(self) -> &'static str {
        match self {
            TargetKind::Profile => "/in/",
            TargetKind::Company => "/company/",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Profile => write!(f, "profile"),
            TargetKind::Company => write!(f, "company"),
        }
    }
}

/// 一個要抓取的 LinkedIn 網址，以正規化後的網址作為識別
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    url: String,
    kind: TargetKind,
}

impl Target {
    /// 解析原始網址並由路徑推斷種類；不是 LinkedIn 個人或公司頁時回傳 None
    pub fn parse(raw: &str) -> Option<Self> {
        let url = normalize_url(raw)?;
        if !url.contains("linkedin.com/") {
            return None;
        }
        let kind = if url.contains(TargetKind::Profile.path_marker()) {
            TargetKind::Profile
        } else if url.contains(TargetKind::Company.path_marker()) {
            TargetKind::Company
        } else {
            return None;
        };

        let target = Self { url, kind };
        target.id()?;
        Some(target)
    }

    /// 公司頁只保留 `/company/{id}`
    pub fn company(raw: &str) -> Option<Self> {
        let target = Self::parse(raw)?;
        if target.kind != TargetKind::Company {
            return None;
        }
        let id = target.id()?.to_string();
        Some(Self {
            url: format!("https://www.linkedin.com/company/{}", id),
            kind: TargetKind::Company,
        })
    }

    pub fn key(&self) -> &str {
        &self.url
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// `/in/` 或 `/company/` 之後的第一段路徑
    pub fn id(&self) -> Option<&str> {
        let marker = self.kind.path_marker();
        let start = self.url.find(marker)? + marker.len();
        let id = self.url[start..].split('/').next()?;
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.kind)
    }
}

/// 去掉查詢字串與結尾斜線、補上 https://www.、主機轉小寫
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        return None;
    }

    let without_query = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');

    let with_scheme = if without_query.starts_with("http://") || without_query.starts_with("https://")
    {
        without_query.to_string()
    } else if without_query.starts_with("www.") {
        format!("https://{}", without_query)
    } else {
        format!("https://www.{}", without_query)
    };

    let mut parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = if host == "linkedin.com" {
        "www.linkedin.com".to_string()
    } else {
        host
    };
    parsed.set_host(Some(&host)).ok()?;
    if parsed.scheme() == "http" {
        parsed.set_scheme("https").ok()?;
    }

    Some(parsed.as_str().trim_end_matches('/').to_string())
}

/// 被登入牆攔下時，瀏覽器會停在這些路徑
pub fn is_login_wall(url: &str) -> bool {
    ["/login", "/authwall", "/checkpoint", "/uas/login"]
        .iter()
        .any(|marker| url.contains(marker))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub kind: TargetKind,
    pub fields: BTreeMap<String, String>,
    pub scraped_at: DateTime<Utc>,
}

impl Record {
    pub fn new(target: &Target, fields: BTreeMap<String, String>) -> Self {
        Self {
            key: target.key().to_string(),
            kind: target.kind(),
            fields,
            scraped_at: Utc::now(),
        }
    }
}

/// 試算表目前內容；`rows` 不含標題列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkSnapshot {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// 單列寫入；`row` 與試算表相同從 1 起算，標題列是第 1 列
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite {
    pub row: usize,
    pub cells: Vec<CellWrite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub column: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeenEntry {
    pub row: usize,
    pub values: BTreeMap<String, String>,
}

impl SeenEntry {
    /// 任一欄位空白就視為尚未完成
    pub fn is_complete<S: AsRef<str>>(&self, columns: &[S]) -> bool {
        columns.iter().all(|column| {
            self.values
                .get(column.as_ref())
                .is_some_and(|v| !v.trim().is_empty())
        })
    }
}

/// 已存在於試算表的網址集合
#[derive(Debug, Clone, PartialEq)]
pub struct SeenSet {
    entries: HashMap<String, SeenEntry>,
    next_row: usize,
}

impl Default for SeenSet {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_row: 2,
        }
    }
}

impl SeenSet {
    /// 依鍵欄建立；同一網址出現多次時以第一列為準
    pub fn from_snapshot(snapshot: &SinkSnapshot, key_column: &str) -> Self {
        let mut seen = Self {
            entries: HashMap::new(),
            next_row: snapshot.rows.len() + 2,
        };

        let Some(key_idx) = snapshot.header.iter().position(|h| h.trim() == key_column) else {
            return seen;
        };

        for (i, row) in snapshot.rows.iter().enumerate() {
            let Some(key) = row.get(key_idx).and_then(|raw| normalize_url(raw)) else {
                continue;
            };
            if seen.entries.contains_key(&key) {
                tracing::warn!("Duplicate key {} at row {}; keeping first occurrence", key, i + 2);
                continue;
            }
            let values = snapshot
                .header
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != key_idx)
                .map(|(idx, h)| (h.trim().to_string(), row.get(idx).cloned().unwrap_or_default()))
                .collect();
            seen.entries.insert(key, SeenEntry { row: i + 2, values });
        }

        seen
    }

    pub fn get(&self, key: &str) -> Option<&SeenEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_row(&self) -> usize {
        self.next_row
    }

    /// 只能在寫入成功之後呼叫
    pub(crate) fn record_write(&mut self, record: &Record, row: usize) {
        let entry = self.entries.entry(record.key.clone()).or_insert_with(|| SeenEntry {
            row,
            values: BTreeMap::new(),
        });
        entry.values.extend(record.fields.clone());
        if row >= self.next_row {
            self.next_row = row + 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Appended { row: usize },
    Updated { row: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub targets_loaded: usize,
    pub targets_planned: usize,
    pub appended: usize,
    pub updated: usize,
    pub fetch_failures: usize,
    pub extraction_failures: usize,
    pub flagged_for_review: Vec<String>,
    #[serde(default)]
    pub written_urls: Vec<String>,
    pub abandoned: bool,
    pub queue_error: Option<String>,
    pub sink_error: Option<String>,
}

impl CycleReport {
    pub fn written(&self) -> usize {
        self.appended + self.updated
    }

    /// 佇列或寫入失敗時整輪視為失敗，下一輪重來
    pub fn is_failed(&self) -> bool {
        self.queue_error.is_some() || self.sink_error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Running,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub started_at: DateTime<Utc>,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
    pub last_error: Option<String>,
    pub flagged_for_review: Vec<String>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: MonitorState::Idle,
            started_at: Utc::now(),
            cycles_completed: 0,
            last_cycle: None,
            last_error: None,
            flagged_for_review: Vec::new(),
        }
    }
}

impl MonitorStatus {
    pub fn is_active(&self) -> bool {
        self.state != MonitorState::Stopped
    }
}
