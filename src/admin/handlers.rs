use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;
use crate::proxy::{PairSnapshot, ServiceSummary};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub active_pairs: usize,
    pub services: usize,
    pub tls_passthrough: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        active_connections: state.tracker.active_count(),
        active_pairs: state.ctx.registry.len(),
        services: state.ctx.services.len(),
        tls_passthrough: state.ctx.tls_passthrough.is_some(),
    })
}

pub async fn get_sessions(State(state): State<AdminState>) -> Json<Vec<PairSnapshot>> {
    Json(state.ctx.registry.snapshot())
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceSummary>> {
    Json(state.ctx.services.iter().map(|s| s.summary()).collect())
}
