//! Prediction HTTP server
//!
//! Holds the active scorer bundle behind an `Arc` that handlers clone before
//! scoring. `/reload` builds a complete new bundle from disk and swaps the
//! reference, so in-flight requests finish on the bundle they started with.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bundle::ScorerBundle;
use crate::error::FraudError;
use crate::features::{FeatureVector, FEATURE_COLUMNS};

/// Server state shared across handlers
pub struct AppState {
    bundle: RwLock<Arc<ScorerBundle>>,
    bundle_path: PathBuf,
}

impl AppState {
    pub fn new(bundle: ScorerBundle, bundle_path: PathBuf) -> Self {
        AppState {
            bundle: RwLock::new(Arc::new(bundle)),
            bundle_path,
        }
    }

    /// The bundle currently serving requests
    pub fn current(&self) -> Arc<ScorerBundle> {
        match self.bundle.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the active bundle; readers holding the old `Arc` keep it
    pub fn swap(&self, bundle: ScorerBundle) {
        let next = Arc::new(bundle);
        match self.bundle.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: u8,
}

/// Error body, mirrored on every non-2xx response
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<FraudError> for ApiError {
    fn from(err: FraudError) -> Self {
        match err {
            FraudError::InvalidRequest(_) | FraudError::ColumnMismatch { .. } => {
                ApiError::bad_request(err.to_string())
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

fn validate(features: &FeatureVector) -> Result<(), ApiError> {
    match FEATURE_COLUMNS
        .iter()
        .zip(features.to_array())
        .find(|(_, value)| !value.is_finite())
    {
        Some((name, value)) => Err(ApiError::bad_request(format!(
            "field {} must be a finite number, got {}",
            name, value
        ))),
        None => Ok(()),
    }
}

async fn handle_home() -> impl IntoResponse {
    Json(json!({ "message": "Fraud Detection API is running" }))
}

async fn handle_predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<FeatureVector>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(features) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected prediction request");
        ApiError::bad_request(rejection.body_text())
    })?;
    validate(&features)?;

    let bundle = state.current();
    let verdict = tokio::task::spawn_blocking(move || bundle.predict_one(&features))
        .await
        .map_err(|e| ApiError::internal(format!("prediction task failed: {}", e)))??;

    debug!(verdict = ?verdict, "Prediction served");
    Ok(Json(PredictionResponse {
        prediction: verdict.combined_flag(),
    }))
}

async fn handle_reload(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let path = state.bundle_path.clone();
    let bundle = tokio::task::spawn_blocking(move || ScorerBundle::load(&path))
        .await
        .map_err(|e| ApiError::internal(format!("reload task failed: {}", e)))?
        .map_err(|e| {
            warn!(error = %e, "Bundle reload failed, keeping the active bundle");
            ApiError::internal(e.to_string())
        })?;
    state.swap(bundle);
    info!(path = %state.bundle_path.display(), "Bundle swapped");
    Ok(Json(json!({ "reloaded": true })))
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_home))
        .route("/predict", post(handle_predict))
        .route("/reload", post(handle_reload))
        .with_state(state)
}

pub async fn serve(bundle_path: PathBuf, bind: &str) -> Result<()> {
    let bundle = ScorerBundle::load(&bundle_path)
        .with_context(|| format!("Failed to load scorer bundle from {}", bundle_path.display()))?;
    let state = Arc::new(AppState::new(bundle, bundle_path));

    let addr: SocketAddr = bind.parse().with_context(|| format!("Invalid bind address {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Fraud Detection API listening");

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    info!("Server shut down");
    Ok(())
}
