use crate::server::ZanzibarServer;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::HashMap;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime: u64,
    pub checks: HashMap<String, String>,
}

/// Health check handler
pub async fn health_check(
    State(server): State<ZanzibarServer>,
) -> (StatusCode, Json<HealthResponse>) {
    let mut checks = HashMap::new();

    let storage_ok = match server.acl.list_namespaces().await {
        Ok(_) => true,
        Err(err) => {
            tracing::error!(error = %err, "Storage health check failed");
            false
        }
    };
    checks.insert(
        "storage".to_string(),
        if storage_ok { "healthy" } else { "unhealthy" }.to_string(),
    );
    checks.insert(
        "cache".to_string(),
        format!("{:?}", server.settings.cache.backend).to_lowercase(),
    );

    let (status, label) = if storage_ok {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: label.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: server.uptime(),
        checks,
    };

    (status, Json(response))
}
