//! Health check endpoints for Kubernetes probes.
//!
//! - `/health/live` - Liveness probe (restart if fails)
//! - `/health/ready` - Readiness probe (remove from LB if fails)
//! - `/health` - Same as readiness

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: &'static str,
    /// Server version
    pub version: &'static str,
    /// Individual component checks
    pub checks: HealthChecks,
}

/// Individual health checks.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Project store accessible
    pub project_store: bool,
    /// Data directory present (true when running in memory)
    pub data_dir: bool,
    /// Generations currently in flight
    pub active_generations: usize,
}

/// Liveness probe - is the server running?
#[tracing::instrument(name = "liveness_probe")]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe - is the server ready to accept traffic?
#[tracing::instrument(name = "readiness_probe", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let store_ok = state.store.is_healthy();
    let data_dir_ok = state.store.data_dir().map_or(true, std::path::Path::is_dir);

    let all_ok = store_ok && data_dir_ok;

    let status = HealthStatus {
        status: if all_ok { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks {
            project_store: store_ok,
            data_dir: data_dir_ok,
            active_generations: state.orchestrator.active_count(),
        },
    };

    let code = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kanvas_core::{AutosaveConfig, ProjectStore};

    use crate::{OrchestratorConfig, ProviderClient};

    fn state_with(store: ProjectStore) -> AppState {
        let provider = ProviderClient::new("http://127.0.0.1:9", None).expect("provider");
        AppState::new(
            store,
            Arc::new(provider),
            None,
            AutosaveConfig::default(),
            OrchestratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_readiness_healthy_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::with_data_dir(dir.path()).expect("store");
        let (code, Json(status)) = readiness(State(state_with(store))).await;
        assert_eq!(code, StatusCode::OK);
        assert!(status.checks.project_store);
        assert!(status.checks.data_dir);
    }

    #[tokio::test]
    async fn test_readiness_reports_lost_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().join("data");
        let store = ProjectStore::with_data_dir(&data_dir).expect("store");
        std::fs::remove_dir_all(&data_dir).expect("remove");

        let (code, Json(status)) = readiness(State(state_with(store))).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status.status, "unhealthy");
        assert!(!status.checks.project_store);
        assert!(!status.checks.data_dir);
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus {
            status: "healthy",
            version: "0.1.0",
            checks: HealthChecks {
                project_store: true,
                data_dir: true,
                active_generations: 2,
            },
        };

        let json = serde_json::to_string(&status).expect("should serialize");
        assert!(json.contains("healthy"));
        assert!(json.contains("0.1.0"));
        assert!(json.contains("project_store"));
        assert!(json.contains("\"active_generations\":2"));
    }

    #[test]
    fn test_health_status_unhealthy() {
        let status = HealthStatus {
            status: "unhealthy",
            version: "0.1.0",
            checks: HealthChecks {
                project_store: true,
                data_dir: false,
                active_generations: 0,
            },
        };

        let json = serde_json::to_string(&status).expect("should serialize");
        assert!(json.contains("unhealthy"));
        assert!(json.contains("false"));
    }
}
