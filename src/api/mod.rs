pub mod handlers;
pub mod routes;
pub mod websocket;

use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use std::sync::Arc;

use crate::capture::listener::Listener;
use crate::capture::session::CaptureSession;
use crate::decode::decoder::ProtocolDecoder;
use crate::models::config::AppConfig;
use crate::utils::error::AppError;

/// Shared state handed to every handler
pub struct AppState {
    pub session: Arc<CaptureSession>,
    pub listener: Arc<Listener>,
    pub decoder: ProtocolDecoder,
    pub config: AppConfig,
}

/// JSON error body with a status matching the error
pub fn error_response(err: &AppError) -> HttpResponse {
    let status = match err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::InvalidOperation(_) | AppError::BindError { .. } => StatusCode::CONFLICT,
        AppError::FilterError(_) | AppError::FormatError(_) | AppError::RuleError(_) => {
            StatusCode::BAD_REQUEST
        }
        AppError::ConnectError { .. } => StatusCode::BAD_GATEWAY,
        AppError::IoError(_) | AppError::JsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    HttpResponse::build(status).json(serde_json::json!({
        "status": "error",
        "message": err.to_string()
    }))
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "status": "error",
        "message": message.into()
    }))
}

pub fn success(message: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "message": message.into()
    }))
}

/// The blocking thread pool dropped a file operation
pub fn blocking_failed(err: BlockingError) -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "status": "error",
        "message": format!("file operation did not complete: {}", err)
    }))
}
