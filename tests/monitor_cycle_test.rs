use httpmock::prelude::*;
use linkedin_sheet_monitor::adapters::csv_file::CsvFileSink;
use linkedin_sheet_monitor::adapters::http_fetcher::HttpFetcher;
use linkedin_sheet_monitor::adapters::memory::MemorySink;
use linkedin_sheet_monitor::adapters::static_source::StaticTargetSource;
use linkedin_sheet_monitor::config::file::{ExtractConfig, FieldConfig, PageConfig};
use linkedin_sheet_monitor::core::extract::{Aggregate, Extractor};
use linkedin_sheet_monitor::core::queue::{RescrapePolicy, TargetQueue};
use linkedin_sheet_monitor::core::sink_writer::SinkLayout;
use linkedin_sheet_monitor::core::worker::{FetchExtractWorker, RetryPolicy};
use linkedin_sheet_monitor::domain::model::TargetKind;
use linkedin_sheet_monitor::domain::ports::RecordSink;
use linkedin_sheet_monitor::{ContinuousMonitor, MonitorSettings};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 個人頁的標題欄位，頁面由 mock 伺服器依 `{id}` 提供
fn title_rules(server: &MockServer) -> ExtractConfig {
    ExtractConfig {
        pages: vec![PageConfig {
            name: "profile".to_string(),
            url: format!("{}/in/{{id}}", server.base_url()),
        }],
        fields: vec![FieldConfig {
            name: "title".to_string(),
            page: None,
            patterns: Vec::new(),
            selector: Some("h2.headline".to_string()),
            attribute: None,
            aggregate: Aggregate::First,
            numeric: false,
            empty_pattern: None,
            empty_value: None,
            default: None,
            required: true,
        }],
        derived: Vec::new(),
    }
}

fn profile_page(title: &str) -> String {
    format!(
        "<html><body><main><h2 class=\"headline\">{}</h2></main></body></html>",
        title
    )
}

fn monitor(
    server: &MockServer,
    urls: &[&str],
    sink: Arc<dyn RecordSink>,
    policy: RescrapePolicy,
) -> ContinuousMonitor {
    build_monitor(title_rules(server), vec![TargetKind::Profile], urls, sink, policy, None)
}

fn build_monitor(
    rules: ExtractConfig,
    kinds: Vec<TargetKind>,
    urls: &[&str],
    sink: Arc<dyn RecordSink>,
    policy: RescrapePolicy,
    cap: Option<usize>,
) -> ContinuousMonitor {
    let source = StaticTargetSource::from_urls(urls.to_vec());
    let queue = TargetQueue::new(Arc::new(source), kinds);
    let fetcher = HttpFetcher::new(Duration::from_millis(300), None).unwrap();
    let extractor = Extractor::from_config(&rules).unwrap();
    let worker = FetchExtractWorker::new(Arc::new(fetcher), extractor, RetryPolicy::immediate(3));
    let settings = MonitorSettings {
        poll_interval: Duration::from_secs(60),
        error_backoff: Duration::from_secs(60),
        policy,
        max_targets_per_cycle: cap,
        target_delay: Duration::ZERO,
        layout: SinkLayout::default(),
    };
    ContinuousMonitor::new(queue, worker, sink, settings)
}

#[tokio::test]
async fn test_title_change_updates_row_in_place() {
    let server = MockServer::start();
    let sink = Arc::new(MemorySink::with_rows(vec![
        vec!["profileUrl", "title"],
        vec!["https://www.linkedin.com/in/alice", "Eng"],
    ]));
    let mut page = server.mock(|when, then| {
        when.method(GET).path("/in/alice");
        then.status(200).body(profile_page("Sr Eng"));
    });

    let monitor = monitor(
        &server,
        &["https://www.linkedin.com/in/alice"],
        sink.clone(),
        RescrapePolicy::Always,
    );
    let report = monitor.run_cycle(1).await;

    page.assert();
    assert_eq!(report.updated, 1);
    assert_eq!(report.appended, 0);
    let grid = sink.grid().await;
    assert_eq!(grid.len(), 2);
    assert_eq!(grid[1], vec!["https://www.linkedin.com/in/alice", "Sr Eng"]);

    // 再跑一次仍是同一列
    page.delete();
    server.mock(|when, then| {
        when.method(GET).path("/in/alice");
        then.status(200).body(profile_page("Staff Eng"));
    });
    let report = monitor.run_cycle(2).await;
    assert_eq!(report.updated, 1);
    let grid = sink.grid().await;
    assert_eq!(grid.len(), 2);
    assert_eq!(grid[1][1], "Staff Eng");
}

#[tokio::test]
async fn test_repeated_timeouts_skip_target_without_row() {
    let server = MockServer::start();
    let bob = server.mock(|when, then| {
        when.method(GET).path("/in/bob");
        then.status(200)
            .delay(Duration::from_secs(2))
            .body(profile_page("never seen"));
    });
    let carol = server.mock(|when, then| {
        when.method(GET).path("/in/carol");
        then.status(200).body(profile_page("PM"));
    });

    let sink = Arc::new(MemorySink::new());
    let monitor = monitor(
        &server,
        &[
            "https://www.linkedin.com/in/bob",
            "https://www.linkedin.com/in/carol",
        ],
        sink.clone(),
        RescrapePolicy::Missing,
    );
    let report = monitor.run_cycle(1).await;

    bob.assert_hits(3);
    carol.assert_hits(1);
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.appended, 1);
    assert!(!report.is_failed());

    let grid = sink.grid().await;
    assert_eq!(grid.len(), 2);
    assert_eq!(grid[1][0], "https://www.linkedin.com/in/carol");
}

#[tokio::test]
async fn test_failures_do_not_stop_the_cycle() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/in/a");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/in/b");
        then.status(200).body("<html><body>profile moved</body></html>");
    });
    server.mock(|when, then| {
        when.method(GET).path("/in/c");
        then.status(200).body(profile_page("CTO"));
    });

    let sink = Arc::new(MemorySink::new());
    let monitor = monitor(
        &server,
        &[
            "https://www.linkedin.com/in/a",
            "https://www.linkedin.com/in/b",
            "https://www.linkedin.com/in/c",
        ],
        sink.clone(),
        RescrapePolicy::Missing,
    );
    let report = monitor.run_cycle(1).await;

    assert_eq!(report.targets_planned, 3);
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.extraction_failures, 1);
    assert_eq!(report.flagged_for_review, vec!["https://www.linkedin.com/in/b"]);
    assert_eq!(report.appended, 1);
}

#[tokio::test]
async fn test_row_count_grows_by_new_keys_only() {
    let server = MockServer::start();
    for (id, title) in [("alice", "Eng"), ("dave", "VP"), ("erin", "IC")] {
        server.mock(|when, then| {
            when.method(GET).path(format!("/in/{}", id));
            then.status(200).body(profile_page(title));
        });
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    std::fs::write(
        &path,
        "profileUrl,title\nhttps://www.linkedin.com/in/alice,Old\nhttps://www.linkedin.com/in/zoe,PM\n",
    )
    .unwrap();
    let sink = Arc::new(CsvFileSink::new(&path));

    let n = 2;
    let urls = [
        "https://www.linkedin.com/in/alice",
        "https://www.linkedin.com/in/dave",
        "https://www.linkedin.com/in/erin",
    ];
    let (m, k) = (urls.len(), 1);

    let monitor = monitor(&server, &urls, sink.clone(), RescrapePolicy::Always);
    let report = monitor.run_cycle(1).await;

    assert_eq!(report.written(), m);
    assert_eq!(report.updated, k);
    let snapshot = sink.snapshot().await.unwrap();
    assert_eq!(snapshot.rows.len(), n + (m - k));
    assert_eq!(snapshot.rows[0][1], "Eng");
}

#[tokio::test]
async fn test_missing_policy_skips_completed_rows() {
    let server = MockServer::start();
    let alice = server.mock(|when, then| {
        when.method(GET).path("/in/alice");
        then.status(200).body(profile_page("Eng"));
    });
    let bob = server.mock(|when, then| {
        when.method(GET).path("/in/bob");
        then.status(200).body(profile_page("Designer"));
    });

    let sink = Arc::new(MemorySink::with_rows(vec![
        vec!["profileUrl", "title"],
        vec!["https://www.linkedin.com/in/alice", "Eng"],
        vec!["https://www.linkedin.com/in/bob", ""],
    ]));
    let monitor = monitor(
        &server,
        &[
            "https://www.linkedin.com/in/alice",
            "https://www.linkedin.com/in/bob",
        ],
        sink.clone(),
        RescrapePolicy::Missing,
    );
    let report = monitor.run_cycle(1).await;

    assert_eq!(report.targets_loaded, 2);
    assert_eq!(report.targets_planned, 1);
    alice.assert_hits(0);
    bob.assert_hits(1);
    assert_eq!(sink.grid().await[2][1], "Designer");
}

#[tokio::test]
async fn test_capped_cycles_reach_targets_behind_failures() {
    let server = MockServer::start();
    for id in ["a", "b"] {
        server.mock(|when, then| {
            when.method(GET).path(format!("/in/{}", id));
            then.status(404);
        });
    }
    let c = server.mock(|when, then| {
        when.method(GET).path("/in/c");
        then.status(200).body(profile_page("Founder"));
    });

    let sink = Arc::new(MemorySink::new());
    let monitor = build_monitor(
        title_rules(&server),
        vec![TargetKind::Profile],
        &[
            "https://www.linkedin.com/in/a",
            "https://www.linkedin.com/in/b",
            "https://www.linkedin.com/in/c",
        ],
        sink.clone(),
        RescrapePolicy::Missing,
        Some(2),
    );

    let first = monitor.run_cycle(1).await;
    assert_eq!(first.targets_planned, 2);
    assert_eq!(first.fetch_failures, 2);
    c.assert_hits(0);

    // 失敗過的排到後面，第二輪就輪到 c
    let second = monitor.run_cycle(2).await;
    c.assert_hits(1);
    assert_eq!(second.appended, 1);
    assert_eq!(second.fetch_failures, 1);
    assert_eq!(sink.grid().await[1][0], "https://www.linkedin.com/in/c");
}

#[tokio::test]
async fn test_ad_count_uses_first_matching_phrase() {
    let server = MockServer::start();
    let ads = server.mock(|when, then| {
        when.method(GET).path("/ads").query_param("companyIds", "1035");
        then.status(200).body(
            "<html><body><p>3 ads match your search</p><p>Showing 25 ads</p></body></html>",
        );
    });

    let rules = ExtractConfig {
        pages: vec![PageConfig {
            name: "ads".to_string(),
            url: format!("{}/ads?companyIds={{company_id}}", server.base_url()),
        }],
        fields: vec![FieldConfig {
            name: "Overall".to_string(),
            page: None,
            patterns: vec![
                r"([\d,]+)\s+ads?\s+match".to_string(),
                r"showing\s+([\d,]+)\s+ads?".to_string(),
            ],
            selector: None,
            attribute: None,
            aggregate: Aggregate::Max,
            numeric: true,
            empty_pattern: None,
            empty_value: None,
            default: None,
            required: true,
        }],
        derived: Vec::new(),
    };
    let sink = Arc::new(MemorySink::new());
    let monitor = build_monitor(
        rules,
        vec![TargetKind::Company],
        &[
            "https://www.linkedin.com/company/1035",
            "https://www.linkedin.com/company/acme",
        ],
        sink.clone(),
        RescrapePolicy::Missing,
        None,
    );

    let report = monitor.run_cycle(1).await;

    ads.assert_hits(1);
    assert_eq!(report.appended, 1);
    // 沒有數字 ID 的公司不去查廣告庫
    assert_eq!(
        report.flagged_for_review,
        vec!["https://www.linkedin.com/company/acme"]
    );
    let grid = sink.grid().await;
    assert_eq!(grid[0], vec!["profileUrl", "Overall"]);
    assert_eq!(grid[1], vec!["https://www.linkedin.com/company/1035", "3"]);
}
