//! 狀態伺服器：存活檢查、迴圈狀態，以及手動觸發/停止
use crate::core::monitor::MonitorControl;
use crate::domain::model::{CycleReport, MonitorState};
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// 啟動時決定、之後不變的服務資訊
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceInfo {
    pub sheet_id: Option<String>,
    pub credentials_configured: bool,
    pub source: String,
    pub sink: String,
}

#[derive(Clone)]
pub struct ApiState {
    control: MonitorControl,
    info: Arc<ServiceInfo>,
}

impl ApiState {
    pub fn new(control: MonitorControl, info: ServiceInfo) -> Self {
        Self {
            control,
            info: Arc::new(info),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/trigger", post(trigger))
        .route("/stop", post(stop))
        .with_state(state)
}

#[derive(Serialize)]
struct HomeResp {
    status: &'static str,
    service: &'static str,
    monitoring_active: bool,
}

async fn home(State(state): State<ApiState>) -> Json<HomeResp> {
    Json(HomeResp {
        status: "running",
        service: "LinkedIn Sheet Monitor",
        monitoring_active: state.control.status().is_active(),
    })
}

#[derive(Serialize)]
struct StatusResp {
    state: MonitorState,
    monitoring_active: bool,
    sheet_id: Option<String>,
    credentials_configured: bool,
    source: String,
    sink: String,
    started_at: DateTime<Utc>,
    cycles_completed: u64,
    last_cycle: Option<CycleReport>,
    last_error: Option<String>,
    flagged_for_review: Vec<String>,
}

async fn status(State(state): State<ApiState>) -> Json<StatusResp> {
    let status = state.control.status();
    Json(StatusResp {
        state: status.state,
        monitoring_active: status.is_active(),
        sheet_id: state.info.sheet_id.clone(),
        credentials_configured: state.info.credentials_configured,
        source: state.info.source.clone(),
        sink: state.info.sink.clone(),
        started_at: status.started_at,
        cycles_completed: status.cycles_completed,
        last_cycle: status.last_cycle,
        last_error: status.last_error,
        flagged_for_review: status.flagged_for_review,
    })
}

#[derive(Serialize)]
struct ControlResp {
    accepted: bool,
    state: MonitorState,
}

async fn trigger(State(state): State<ApiState>) -> (StatusCode, Json<ControlResp>) {
    let current = state.control.status().state;
    if current == MonitorState::Stopped || state.control.is_stop_requested() {
        return (
            StatusCode::CONFLICT,
            Json(ControlResp {
                accepted: false,
                state: current,
            }),
        );
    }

    tracing::info!("📨 Cycle trigger requested over HTTP");
    state.control.trigger();
    (
        StatusCode::ACCEPTED,
        Json(ControlResp {
            accepted: true,
            state: current,
        }),
    )
}

async fn stop(State(state): State<ApiState>) -> (StatusCode, Json<ControlResp>) {
    tracing::info!("📨 Stop requested over HTTP");
    state.control.stop();
    (
        StatusCode::ACCEPTED,
        Json(ControlResp {
            accepted: true,
            state: state.control.status().state,
        }),
    )
}
