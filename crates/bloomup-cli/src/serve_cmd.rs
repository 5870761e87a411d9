use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use bloomup_core::entitlement::{EntitlementError, Tier};
use bloomup_core::locator::{LocateError, LocationError, LocatorState, ReportedLocation, SupplierLocator};
use bloomup_core::orchestrator::{
    Affordance, AttemptId, Orchestrator, OrchestratorError, RedesignRequest, WorkflowState,
};
use bloomup_core::presets::{default_preset, find_preset, load_presets};
use bloomup_core::synthesis::{Coordinates, EncodedImage, SupplierResult};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
    affordance: Option<Affordance>,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
            affordance: None,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
            affordance: None,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
            affordance: Some(Affordance::Retry),
        }
    }

    fn with_affordance(mut self, affordance: Affordance) -> Self {
        self.affordance = Some(affordance);
        self
    }
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::QuotaExceeded { .. } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: err.to_string(),
                affordance: Some(Affordance::Upgrade),
            },
            EntitlementError::Persistence(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidRequest(_) => Self::bad_request(err.to_string()),
            OrchestratorError::InvalidTransition { .. } => Self::conflict(err.to_string()),
        }
    }
}

impl From<LocateError> for AppError {
    fn from(err: LocateError) -> Self {
        let status = match err {
            LocateError::NoResult => StatusCode::CONFLICT,
            LocateError::LocationDenied | LocateError::LocationUnavailable => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            LocateError::LookupFailed(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
            affordance: Some(Affordance::Retry),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "affordance": self.affordance,
        });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TierRequest {
    pub tier: String,
}

#[derive(Debug, Deserialize)]
pub struct RedesignBody {
    /// Data URL or bare base64 of the uploaded photo.
    pub image: String,
    /// Preset id; the default preset when omitted.
    pub style: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    pub attempt: AttemptId,
    pub state: WorkflowState,
}

/// Client-reported location for a supplier lookup.
#[derive(Debug, Default, Deserialize)]
pub struct LocateBody {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// `"denied"` or `"unavailable"` when the client could not get a position.
    pub location_error: Option<String>,
}

impl LocateBody {
    /// No position or failure was reported; use the configured provider.
    fn is_empty(&self) -> bool {
        self.location_error.is_none() && self.latitude.is_none() && self.longitude.is_none()
    }

    fn reported(&self) -> Result<ReportedLocation, AppError> {
        let outcome = match (self.location_error.as_deref(), self.latitude, self.longitude) {
            (Some("denied"), _, _) => Err(LocationError::Denied),
            (Some("unavailable"), _, _) => Err(LocationError::Unavailable),
            (Some(other), _, _) => {
                return Err(AppError::bad_request(format!(
                    "unknown location_error {other:?}"
                )));
            }
            (None, Some(lat), Some(lon)) => Ok(Coordinates::new(lat, lon)),
            (None, _, _) => Err(LocationError::Unavailable),
        };
        Ok(ReportedLocation(outcome))
    }
}

#[derive(Debug, Serialize)]
pub struct SuppliersResponse {
    pub status: &'static str,
    pub suppliers: Vec<SupplierResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<LocatorState> for SuppliersResponse {
    fn from(state: LocatorState) -> Self {
        let (status, suppliers, error) = match state {
            LocatorState::Idle => ("idle", Vec::new(), None),
            LocatorState::Locating => ("locating", Vec::new(), None),
            LocatorState::Found(found) => ("found", found, None),
            LocatorState::Failed(err) => ("failed", Vec::new(), Some(err.to_string())),
        };
        Self {
            status,
            suppliers,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub locator: Arc<SupplierLocator>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/entitlement", get(get_entitlement))
        .route("/api/entitlement/tier", axum::routing::put(put_tier))
        .route("/api/styles", get(list_styles))
        .route(
            "/api/redesign",
            get(get_redesign).post(start_redesign).delete(reset_redesign),
        )
        .route("/api/suppliers", get(get_suppliers).post(locate_suppliers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("bloomup serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("bloomup serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_entitlement(
    State(state): State<AppState>,
) -> Result<axum::response::Response, AppError> {
    let snapshot = state.orchestrator.entitlements().snapshot().await?;
    Ok(Json(snapshot).into_response())
}

async fn put_tier(
    State(state): State<AppState>,
    Json(body): Json<TierRequest>,
) -> Result<axum::response::Response, AppError> {
    let tier: Tier = body
        .tier
        .parse()
        .map_err(|e: bloomup_db::models::TierParseError| AppError::bad_request(e.to_string()))?;
    let store = state.orchestrator.entitlements();
    store.set_tier(tier).await?;
    Ok(Json(store.snapshot().await?).into_response())
}

async fn list_styles() -> Json<Vec<bloomup_core::presets::StylePreset>> {
    Json(load_presets())
}

async fn get_redesign(State(state): State<AppState>) -> Json<WorkflowState> {
    Json(state.orchestrator.state())
}

async fn start_redesign(
    State(state): State<AppState>,
    Json(body): Json<RedesignBody>,
) -> Result<axum::response::Response, AppError> {
    let style = match body.style.as_deref() {
        Some(id) => find_preset(id)
            .ok_or_else(|| AppError::bad_request(format!("unknown style {id:?}")))?,
        None => default_preset(),
    };

    let attempt = state
        .orchestrator
        .start(RedesignRequest {
            source_image: EncodedImage::new(body.image),
            style,
        })
        .await?;

    // A new redesign invalidates suppliers found for the previous one.
    state.locator.clear();

    let response = StartedResponse {
        attempt,
        state: state.orchestrator.state(),
    };
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

async fn reset_redesign(State(state): State<AppState>) -> Json<WorkflowState> {
    state.orchestrator.reset().await;
    state.locator.clear();
    Json(state.orchestrator.state())
}

async fn get_suppliers(State(state): State<AppState>) -> Json<SuppliersResponse> {
    Json(state.locator.state().into())
}

async fn locate_suppliers(
    State(state): State<AppState>,
    body: Option<Json<LocateBody>>,
) -> Result<axum::response::Response, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let found = if body.is_empty() {
        state.locator.locate_for(&state.orchestrator).await?
    } else {
        let reported = body.reported()?;
        state
            .locator
            .locate_for_with(&state.orchestrator, &reported)
            .await?
    };
    Ok(Json(SuppliersResponse {
        status: "found",
        suppliers: found,
        error: None,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
