use crate::config::ApiConfig;
use crate::detection::{CameraCatalog, DetectionHandle};
use crate::error::Error;
use crate::messaging::BroadcastNotifier;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::info;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub mod camera_controller;
pub mod detection_controller;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Arc<PgPool>,
    pub catalog: Arc<dyn CameraCatalog>,
    pub detection: DetectionHandle,
    pub notifier: BroadcastNotifier,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Config(_) | Error::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Camera(_) | Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Protocol(_) | Error::Media(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Build the dashboard router
pub fn router(state: AppState, public_dir: PathBuf) -> Router {
    // Create a CORS layer that allows all origins and preflight requests
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/cctvs", camera_controller::create_router())
        .nest("/api/detection", detection_controller::create_router())
        .route("/ws/session", get(crate::api::websocket::handle_ws_upgrade))
        .with_state(state)
        // Sample videos and the dashboard bundle live in the public directory
        .fallback_service(ServeDir::new(public_dir))
        .layer(cors)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = sqlx::query("SELECT 1")
        .execute(&*state.db_pool)
        .await
        .is_ok();
    let session = state.detection.snapshot();

    Json(json!({
        "status": "ok",
        "database": database,
        "detection": {
            "mode": session.mode,
            "connectionStatus": session.connection_status,
        }
    }))
}

pub struct RestApi {
    config: ApiConfig,
    public_dir: PathBuf,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, public_dir: PathBuf, state: AppState) -> Self {
        Self {
            config: config.clone(),
            public_dir,
            state,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let app = router(self.state.clone(), self.public_dir.clone());

        // Build the server address
        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}
