use crate::errors::{ApiError, Result};
use crate::models::{ApiResponse, HealthResponse};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;
use wallet_ledger::{
    LedgerEngine, LedgerStore, OperationRequest, OperationType, StoreBackend, Transaction, Wallet,
};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Shared handler state
pub struct AppState<S> {
    pub engine: Arc<LedgerEngine<S>>,
    pub backend: StoreBackend,
}

impl<S> AppState<S> {
    pub fn new(engine: LedgerEngine<S>, backend: StoreBackend) -> Self {
        Self {
            engine: Arc::new(engine),
            backend,
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            backend: self.backend,
        }
    }
}

/// Build the HTTP router
pub fn router<S: LedgerStore>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check::<S>))
        .route("/metrics", get(metrics_handler::<S>))
        .route("/api/v1/wallets", post(create_wallet::<S>))
        .route("/api/v1/wallets/deposit", put(deposit::<S>))
        .route("/api/v1/wallets/withdraw", put(withdraw::<S>))
        .route(
            "/api/v1/wallets/:id",
            get(get_wallet::<S>).delete(delete_wallet::<S>),
        )
        .route(
            "/api/v1/wallets/:id/transactions",
            get(list_transactions::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check<S: LedgerStore>(State(state): State<AppState<S>>) -> Json<HealthResponse> {
    let backend = match state.backend {
        StoreBackend::Postgres => "postgres",
        StoreBackend::Memory => "memory",
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "wallet-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: backend.to_string(),
    })
}

/// Prometheus metrics endpoint
async fn metrics_handler<S: LedgerStore>(
    State(state): State<AppState<S>>,
) -> Result<impl IntoResponse> {
    let body = state
        .engine
        .metrics()
        .encode()
        .map_err(|e| ApiError::Internal(format!("Failed to export metrics: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body))
}

/// Create wallet endpoint
async fn create_wallet<S: LedgerStore>(
    State(state): State<AppState<S>>,
) -> Result<(StatusCode, Json<ApiResponse<Wallet>>)> {
    let wallet = state.engine.create_wallet().await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(wallet))))
}

/// Get wallet endpoint
async fn get_wallet<S: LedgerStore>(
    State(state): State<AppState<S>>,
    path: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiResponse<Wallet>>> {
    let Path(wallet_id) = path?;
    let wallet = state.engine.get_wallet(wallet_id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}

/// Soft-delete wallet endpoint
async fn delete_wallet<S: LedgerStore>(
    State(state): State<AppState<S>>,
    path: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiResponse<Wallet>>> {
    let Path(wallet_id) = path?;
    let wallet = state.engine.delete_wallet(wallet_id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}

/// Transaction history endpoint
async fn list_transactions<S: LedgerStore>(
    State(state): State<AppState<S>>,
    path: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiResponse<Vec<Transaction>>>> {
    let Path(wallet_id) = path?;
    let history = state.engine.list_transactions(wallet_id).await?;
    Ok(Json(ApiResponse::success(history)))
}

/// Deposit endpoint
async fn deposit<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: std::result::Result<Json<OperationRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Transaction>>> {
    apply(&state, payload, OperationType::Deposit).await
}

/// Withdraw endpoint
async fn withdraw<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: std::result::Result<Json<OperationRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Transaction>>> {
    apply(&state, payload, OperationType::Withdraw).await
}

async fn apply<S: LedgerStore>(
    state: &AppState<S>,
    payload: std::result::Result<Json<OperationRequest>, JsonRejection>,
    operation_type: OperationType,
) -> Result<Json<ApiResponse<Transaction>>> {
    let Json(request) = payload?;
    let entry = state.engine.submit(&request, Some(operation_type)).await?;
    Ok(Json(ApiResponse::success(entry)))
}
