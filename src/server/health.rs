use axum::{extract::State, http::StatusCode, Json};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::db::Database;

use super::AppState;

pub const HEALTH_PATH: &str = "/actuator/health";

/// Reports `OK` while the database answers a ping, `Unavailable` otherwise.
pub async fn health<D: Database>(State(state): State<AppState<D>>) -> (StatusCode, Json<Value>) {
    let mut body = json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "component": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(body)),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            body["status"] = "Unavailable".into();
            body["failures"] = json!({ "database": err.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body))
        }
    }
}
