use clap::Parser;
use linkedin_sheet_monitor::api::{self, ApiState};
use linkedin_sheet_monitor::app::{assemble, Assembled};
use linkedin_sheet_monitor::utils::error::{ErrorSeverity, MonitorError};
use linkedin_sheet_monitor::utils::logger;
use linkedin_sheet_monitor::{AppConfig, CliConfig};

/// 記錄錯誤並依嚴重程度決定退出碼
fn exit_with(e: &MonitorError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::Medium => 2,
        ErrorSeverity::High | ErrorSeverity::Critical => 1,
    };
    std::process::exit(exit_code);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 本機開發時從 .env 讀取
    dotenvy::dotenv().ok();

    let cli = CliConfig::parse();
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting linkedin-sheet-monitor");

    let config = AppConfig::resolve(&cli).unwrap_or_else(|e| exit_with(&e));
    if config.system_stats {
        tracing::info!("🔍 System monitoring enabled");
    }

    let Assembled { monitor, info } = assemble(&config).unwrap_or_else(|e| exit_with(&e));

    if let Err(e) = monitor.preflight().await {
        exit_with(&e);
    }

    if config.run_once {
        let report = monitor.run_once().await;
        println!(
            "✅ Cycle finished: {} appended, {} updated, {} fetch failure(s), {} flagged for review",
            report.appended, report.updated, report.fetch_failures, report.extraction_failures
        );
        for url in &report.flagged_for_review {
            println!("🔍 Needs review: {}", url);
        }
        if report.is_failed() {
            let reason = report
                .queue_error
                .or(report.sink_error)
                .unwrap_or_default();
            eprintln!("❌ Cycle failed: {}", reason);
            std::process::exit(2);
        }
        return Ok(());
    }

    let (control, handle) = monitor.spawn();

    let shutdown_control = control.clone();
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 Ctrl-C received, stopping monitor");
            }
            _ = shutdown_control.stopped() => {}
        }
        shutdown_control.stop();
    };

    if config.serve {
        let app = api::router(ApiState::new(control.clone(), info));
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
        tracing::info!("🌍 Status server listening on {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
    } else {
        shutdown.await;
    }

    let status = handle.await?;
    tracing::info!(
        "✅ Monitor exited after {} cycle(s); {} URL(s) flagged for review",
        status.cycles_completed,
        status.flagged_for_review.len()
    );
    Ok(())
}
