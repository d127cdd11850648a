use crate::config::file::MonitorFileConfig;
use crate::core::queue::{FailureLog, RescrapePolicy, TargetQueue};
use crate::core::sink_writer::{SinkLayout, SinkWriter};
use crate::core::worker::FetchExtractWorker;
use crate::domain::model::{CycleReport, MonitorState, MonitorStatus, UpsertOutcome};
use crate::domain::ports::RecordSink;
use crate::utils::error::{MonitorError, Result};
use crate::utils::monitor::SystemMonitor;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

/// 排程與寫入相關設定
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub policy: RescrapePolicy,
    pub max_targets_per_cycle: Option<usize>,
    pub target_delay: Duration,
    pub layout: SinkLayout,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorFileConfig::default())
    }
}

impl From<&MonitorFileConfig> for MonitorSettings {
    fn from(config: &MonitorFileConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.schedule.poll_interval_secs),
            error_backoff: Duration::from_secs(config.schedule.error_backoff_secs),
            policy: config.schedule.policy,
            max_targets_per_cycle: config.schedule.max_targets_per_cycle,
            target_delay: Duration::from_secs(config.schedule.target_delay_secs),
            layout: SinkLayout {
                key_column: config.sink.key_column.clone(),
                timestamp_column: config.sink.timestamp_column.clone(),
            },
        }
    }
}

/// 從外部控制迴圈；可任意複製
#[derive(Clone)]
pub struct MonitorControl {
    stop: Arc<watch::Sender<bool>>,
    trigger: Arc<Notify>,
    status: watch::Receiver<MonitorStatus>,
}

impl MonitorControl {
    /// 進行中的抓取會被放棄，但不會中斷寫入
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// 睡眠中立即開始下一輪
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// 等到迴圈進入 Stopped
    pub async fn stopped(&self) {
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|s| s.state == MonitorState::Stopped)
            .await;
    }
}

/// 等待停止訊號；發送端不在時永遠不會完成
async fn wait_stopped(mut stop: watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// IDLE → RUNNING → SLEEPING → RUNNING …，只有收到停止才結束
pub struct ContinuousMonitor {
    queue: TargetQueue,
    worker: FetchExtractWorker,
    sink: Arc<dyn RecordSink>,
    settings: MonitorSettings,
    system: SystemMonitor,
    failures: Mutex<FailureLog>,
    stop: Arc<watch::Sender<bool>>,
    trigger: Arc<Notify>,
    status: watch::Sender<MonitorStatus>,
}

impl ContinuousMonitor {
    pub fn new(
        queue: TargetQueue,
        worker: FetchExtractWorker,
        sink: Arc<dyn RecordSink>,
        settings: MonitorSettings,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let (status, _) = watch::channel(MonitorStatus::default());
        Self {
            queue,
            worker,
            sink,
            settings,
            system: SystemMonitor::default(),
            failures: Mutex::new(FailureLog::default()),
            stop: Arc::new(stop),
            trigger: Arc::new(Notify::new()),
            status,
        }
    }

    pub fn with_system_monitor(mut self, system: SystemMonitor) -> Self {
        self.system = system;
        self
    }

    pub fn control(&self) -> MonitorControl {
        MonitorControl {
            stop: self.stop.clone(),
            trigger: self.trigger.clone(),
            status: self.status.subscribe(),
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    fn set_state(&self, state: MonitorState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// 啟動前確認來源與輸出都能連上；失敗屬於設定錯誤
    pub async fn preflight(&self) -> Result<()> {
        let targets = self.queue.load().await.map_err(|e| match e {
            MonitorError::ConfigError { .. }
            | MonitorError::MissingConfigError { .. }
            | MonitorError::InvalidConfigValueError { .. } => e,
            other => MonitorError::config(format!(
                "Target source {} is not usable: {}",
                self.queue.source_name(),
                other
            )),
        })?;

        self.sink.snapshot().await.map_err(|e| {
            MonitorError::config(format!("Sink {} is not reachable: {}", self.sink.name(), e))
        })?;

        tracing::info!(
            "✅ Preflight passed: {} target(s) from {}, writing to {}",
            targets.len(),
            self.queue.source_name(),
            self.sink.name()
        );
        Ok(())
    }

    /// 跑一輪；單一目標失敗不影響其他目標
    pub async fn run_cycle(&self, cycle: u64) -> CycleReport {
        let mut report = CycleReport {
            cycle,
            started_at: Some(Utc::now()),
            ..CycleReport::default()
        };
        self.set_state(MonitorState::Running);
        tracing::info!("🔄 Cycle {} started", cycle);

        let targets = match self.queue.load().await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!("❌ Cycle {}: could not load targets: {}", cycle, e);
                report.queue_error = Some(e.to_string());
                report.finished_at = Some(Utc::now());
                return report;
            }
        };
        report.targets_loaded = targets.len();

        let mut writer = match SinkWriter::open(self.sink.clone(), self.settings.layout.clone()).await {
            Ok(writer) => writer,
            Err(e) => {
                tracing::error!("❌ Cycle {}: could not open sink: {}", cycle, e);
                report.sink_error = Some(e.to_string());
                report.finished_at = Some(Utc::now());
                return report;
            }
        };

        let columns = self.worker.extractor().field_names();
        let planned = TargetQueue::plan(
            &targets,
            writer.seen(),
            self.settings.policy,
            &columns,
            &*self.failures.lock().await,
            self.settings.max_targets_per_cycle,
        );
        report.targets_planned = planned.len();

        if planned.is_empty() {
            tracing::info!("😴 Cycle {}: nothing to scrape ({} known target(s))", cycle, targets.len());
        } else {
            tracing::info!(
                "📋 Cycle {}: {} of {} target(s) need scraping",
                cycle,
                planned.len(),
                targets.len()
            );
        }

        for (i, target) in planned.iter().enumerate() {
            if self.is_stopped() {
                report.abandoned = true;
                break;
            }

            if i > 0 && !self.settings.target_delay.is_zero() {
                let interrupted = tokio::select! {
                    _ = tokio::time::sleep(self.settings.target_delay) => false,
                    _ = wait_stopped(self.stop.subscribe()) => true,
                };
                if interrupted {
                    report.abandoned = true;
                    break;
                }
            }

            let outcome = tokio::select! {
                result = self.worker.process(target) => Some(result),
                _ = wait_stopped(self.stop.subscribe()) => None,
            };
            let Some(outcome) = outcome else {
                tracing::info!("🛑 Stop requested; abandoning fetch of {}", target);
                report.abandoned = true;
                break;
            };

            match outcome {
                // 寫入不受停止訊號影響
                Ok(record) => {
                    match writer.upsert(&record).await {
                        Ok(UpsertOutcome::Appended { row }) => {
                            tracing::info!("➕ {} appended at row {}", target, row);
                            report.appended += 1;
                        }
                        Ok(UpsertOutcome::Updated { row }) => {
                            tracing::info!("✏️ {} updated at row {}", target, row);
                            report.updated += 1;
                        }
                        Err(e) => {
                            tracing::error!("❌ Cycle {}: write failed for {}: {}", cycle, target, e);
                            report.sink_error = Some(e.to_string());
                            break;
                        }
                    }
                    self.failures.lock().await.clear(target.key());
                    report.written_urls.push(target.url().to_string());
                }
                Err(e @ MonitorError::ExtractionError { .. }) => {
                    tracing::warn!("🔍 {} flagged for review: {}", target, e);
                    report.extraction_failures += 1;
                    report.flagged_for_review.push(target.url().to_string());
                    self.failures.lock().await.record_failure(target.key(), cycle);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Skipping {}: {}", target, e);
                    report.fetch_failures += 1;
                    self.failures.lock().await.record_failure(target.key(), cycle);
                }
            }
        }

        report.finished_at = Some(Utc::now());
        tracing::info!(
            "🏁 Cycle {} finished: {} appended, {} updated, {} fetch failure(s), {} flagged",
            cycle,
            report.appended,
            report.updated,
            report.fetch_failures,
            report.extraction_failures
        );
        report
    }

    fn record_cycle(&self, report: &CycleReport) {
        self.status.send_modify(|status| {
            status.cycles_completed += 1;
            status.last_error = report.queue_error.clone().or_else(|| report.sink_error.clone());
            status
                .flagged_for_review
                .retain(|url| !report.written_urls.contains(url));
            for url in &report.flagged_for_review {
                if !status.flagged_for_review.contains(url) {
                    status.flagged_for_review.push(url.clone());
                }
            }
            status.last_cycle = Some(report.clone());
        });
    }

    /// 只跑一輪就結束（`--once`）
    pub async fn run_once(&self) -> CycleReport {
        let report = self.run_cycle(1).await;
        self.record_cycle(&report);
        self.worker.shutdown().await;
        self.set_state(MonitorState::Stopped);
        report
    }

    /// 持續執行直到收到停止訊號，回傳最後狀態
    pub async fn run(self) -> MonitorStatus {
        tracing::info!(
            "🚀 Monitor started (poll every {:?}, policy {:?})",
            self.settings.poll_interval,
            self.settings.policy
        );

        let mut cycle = 0;
        while !self.is_stopped() {
            cycle += 1;
            let report = self.run_cycle(cycle).await;
            self.record_cycle(&report);
            if self.system.is_enabled() {
                self.system.log_stats(&format!("cycle {}", cycle));
            }

            if self.is_stopped() {
                break;
            }

            let pause = if report.is_failed() {
                self.settings.error_backoff
            } else {
                self.settings.poll_interval
            };
            self.set_state(MonitorState::Sleeping);
            tracing::debug!("💤 Sleeping {:?} before cycle {}", pause, cycle + 1);

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.trigger.notified() => {
                    tracing::info!("⏰ Cycle triggered manually");
                }
                _ = wait_stopped(self.stop.subscribe()) => {}
            }
        }

        self.worker.shutdown().await;
        self.set_state(MonitorState::Stopped);
        tracing::info!("🛑 Monitor stopped after {} cycle(s)", cycle);
        self.status.borrow().clone()
    }

    /// 在背景任務中執行
    pub fn spawn(self) -> (MonitorControl, JoinHandle<MonitorStatus>) {
        let control = self.control();
        let handle = tokio::spawn(self.run());
        (control, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemorySink;
    use crate::adapters::static_source::StaticTargetSource;
    use crate::config::file::{ExtractConfig, FieldConfig};
    use crate::core::extract::{Aggregate, Extractor};
    use crate::core::worker::RetryPolicy;
    use crate::domain::model::TargetKind;
    use crate::domain::ports::{PageFetcher, RenderedPage};
    use crate::utils::error::FetchErrorKind;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 依網址回傳固定頁面；`slow` 模式下永不完成
    struct PageTable {
        pages: HashMap<String, std::result::Result<String, FetchErrorKind>>,
        slow: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for PageTable {
        async fn fetch(&self, url: &str) -> std::result::Result<RenderedPage, FetchErrorKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                std::future::pending::<()>().await;
            }
            match self.pages.get(url) {
                Some(Ok(html)) => Ok(RenderedPage {
                    url: url.to_string(),
                    html: html.clone(),
                }),
                Some(Err(kind)) => Err(kind.clone()),
                None => Err(FetchErrorKind::Status(404)),
            }
        }
    }

    fn title_extractor() -> Extractor {
        Extractor::from_config(&ExtractConfig {
            pages: Vec::new(),
            fields: vec![FieldConfig {
                name: "title".to_string(),
                page: None,
                patterns: vec![r"title:\s*([\w ]+)".to_string()],
                selector: None,
                attribute: None,
                aggregate: Aggregate::First,
                numeric: false,
                empty_pattern: None,
                empty_value: None,
                default: None,
                required: true,
            }],
            derived: Vec::new(),
        })
        .unwrap()
    }

    fn monitor_with(
        urls: Vec<&str>,
        pages: Vec<(&str, std::result::Result<&str, FetchErrorKind>)>,
        sink: Arc<MemorySink>,
        slow: bool,
    ) -> ContinuousMonitor {
        let source = StaticTargetSource::from_urls(urls);
        let queue = TargetQueue::new(Arc::new(source), vec![TargetKind::Profile, TargetKind::Company]);
        let fetcher = PageTable {
            pages: pages
                .into_iter()
                .map(|(u, r)| (u.to_string(), r.map(str::to_string)))
                .collect(),
            slow,
            calls: AtomicUsize::new(0),
        };
        let worker = FetchExtractWorker::new(Arc::new(fetcher), title_extractor(), RetryPolicy::immediate(3));
        let settings = MonitorSettings {
            poll_interval: Duration::from_secs(3600),
            error_backoff: Duration::from_secs(3600),
            policy: RescrapePolicy::Always,
            max_targets_per_cycle: None,
            target_delay: Duration::ZERO,
            layout: SinkLayout::default(),
        };
        ContinuousMonitor::new(queue, worker, sink, settings)
    }

    #[tokio::test]
    async fn test_cycle_isolates_failures() {
        let sink = Arc::new(MemorySink::new());
        let monitor = monitor_with(
            vec![
                "https://www.linkedin.com/in/alice",
                "https://www.linkedin.com/in/bob",
                "https://www.linkedin.com/in/carol",
            ],
            vec![
                ("https://www.linkedin.com/in/alice", Ok("title: Eng")),
                ("https://www.linkedin.com/in/bob", Err(FetchErrorKind::Timeout)),
                ("https://www.linkedin.com/in/carol", Ok("no title here")),
            ],
            sink.clone(),
            false,
        );

        let report = monitor.run_cycle(1).await;

        assert_eq!(report.targets_planned, 3);
        assert_eq!(report.appended, 1);
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.extraction_failures, 1);
        assert_eq!(
            report.flagged_for_review,
            vec!["https://www.linkedin.com/in/carol".to_string()]
        );
        assert!(!report.is_failed());
        assert_eq!(sink.grid().await.len(), 2);
    }

    #[tokio::test]
    async fn test_sink_failure_ends_cycle() {
        let sink = Arc::new(MemorySink::new());
        sink.set_available(false);
        let monitor = monitor_with(
            vec!["https://www.linkedin.com/in/alice"],
            vec![("https://www.linkedin.com/in/alice", Ok("title: Eng"))],
            sink.clone(),
            false,
        );

        let report = monitor.run_cycle(1).await;
        assert!(report.is_failed());
        assert!(report.sink_error.is_some());
        assert_eq!(report.targets_planned, 0);
    }

    #[tokio::test]
    async fn test_preflight_reports_unreachable_sink() {
        let sink = Arc::new(MemorySink::new());
        let monitor = monitor_with(vec!["https://www.linkedin.com/in/alice"], vec![], sink.clone(), false);
        assert!(monitor.preflight().await.is_ok());

        sink.set_available(false);
        let err = monitor.preflight().await.unwrap_err();
        assert!(matches!(err, MonitorError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_stop_abandons_in_flight_fetch() {
        let sink = Arc::new(MemorySink::new());
        let monitor = monitor_with(
            vec!["https://www.linkedin.com/in/alice"],
            vec![],
            sink.clone(),
            true,
        );
        let (control, handle) = monitor.spawn();

        tokio::time::timeout(Duration::from_secs(5), async {
            while control.status().state != MonitorState::Running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        control.stop();

        let status = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, MonitorState::Stopped);
        assert_eq!(status.cycles_completed, 1);
        assert!(status.last_cycle.unwrap().abandoned);
        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test]
    async fn test_trigger_wakes_sleeping_loop() {
        let sink = Arc::new(MemorySink::new());
        let monitor = monitor_with(
            vec!["https://www.linkedin.com/in/alice"],
            vec![("https://www.linkedin.com/in/alice", Ok("title: Eng"))],
            sink.clone(),
            false,
        );
        let (control, handle) = monitor.spawn();

        let wait_for_cycles = |n: u64| {
            let control = control.clone();
            async move {
                tokio::time::timeout(Duration::from_secs(5), async {
                    while control.status().cycles_completed < n
                        || control.status().state != MonitorState::Sleeping
                    {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                })
                .await
                .unwrap();
            }
        };

        wait_for_cycles(1).await;
        control.trigger();
        wait_for_cycles(2).await;

        // 同一網址重抓兩次仍只有一列
        assert_eq!(sink.grid().await.len(), 2);
        assert_eq!(control.status().last_cycle.unwrap().updated, 1);

        control.stop();
        control.stopped().await;
        assert!(!handle.await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_failing_targets_do_not_hold_the_cycle_cap() {
        let urls: Vec<String> = (0..11)
            .map(|i| format!("https://www.linkedin.com/in/p{}", i))
            .collect();
        let pages = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let html = if i < 10 { "profile unavailable" } else { "title: Eng" };
                (url.as_str(), Ok(html))
            })
            .collect();
        let sink = Arc::new(MemorySink::new());
        let mut monitor = monitor_with(
            urls.iter().map(String::as_str).collect(),
            pages,
            sink.clone(),
            false,
        );
        monitor.settings.policy = RescrapePolicy::Missing;
        monitor.settings.max_targets_per_cycle = Some(10);

        let first = monitor.run_cycle(1).await;
        assert_eq!(first.targets_planned, 10);
        assert_eq!(first.extraction_failures, 10);
        assert_eq!(first.appended, 0);

        let second = monitor.run_cycle(2).await;
        assert_eq!(second.targets_planned, 10);
        assert_eq!(second.appended, 1);
        assert_eq!(second.written_urls, vec![urls[10].clone()]);
        assert_eq!(sink.grid().await[1][0], urls[10]);

        // 第二輪跳過的那一個在第三輪排到最前面
        let third = monitor.run_cycle(3).await;
        assert_eq!(third.flagged_for_review[0], urls[9]);
    }

    #[tokio::test]
    async fn test_successful_write_clears_review_flag() {
        let sink = Arc::new(MemorySink::new());
        let monitor = monitor_with(vec!["https://www.linkedin.com/in/alice"], vec![], sink, false);
        let alice = "https://www.linkedin.com/in/alice".to_string();
        let bob = "https://www.linkedin.com/in/bob".to_string();

        monitor.record_cycle(&CycleReport {
            cycle: 1,
            flagged_for_review: vec![alice.clone(), bob.clone()],
            ..CycleReport::default()
        });
        assert_eq!(monitor.control().status().flagged_for_review.len(), 2);

        monitor.record_cycle(&CycleReport {
            cycle: 2,
            written_urls: vec![alice.clone()],
            ..CycleReport::default()
        });
        assert_eq!(monitor.control().status().flagged_for_review, vec![bob]);
    }
}
