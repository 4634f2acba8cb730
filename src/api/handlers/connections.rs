use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::api::{bad_request, blocking_failed, error_response, success, AppState};
use crate::capture::connection::ConnectionInfo;
use crate::models::packet::Direction;
use crate::models::version::ProtocolVersion;
use crate::utils::hex::parse_hex;

/// Request for injecting a packet
#[derive(Deserialize)]
pub struct SendRequest {
    /// `ClientToServer` sends to the server, `ServerToClient` to the client
    pub direction: Direction,

    /// Payload as hex text, whitespace ignored
    pub data: String,
}

/// Request naming a capture file
#[derive(Deserialize)]
pub struct CaptureFileRequest {
    pub path: PathBuf,

    /// Version to decode a loaded capture with; defaults to the listener's
    pub protocol_version: Option<String>,
}

/// List all captured connections, oldest first
pub async fn list_connections(state: web::Data<AppState>) -> impl Responder {
    let connections: Vec<ConnectionInfo> = state.session.list().iter().map(|c| c.info()).collect();
    HttpResponse::Ok().json(connections)
}

/// Get one connection
pub async fn get_connection(state: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    match state.session.get(&path.into_inner()) {
        Ok(connection) => HttpResponse::Ok().json(connection.info()),
        Err(e) => error_response(&e),
    }
}

/// Close a live connection
pub async fn disconnect_connection(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let result = state
        .session
        .get(&path.into_inner())
        .and_then(|connection| connection.disconnect().map(|_| connection));

    match result {
        Ok(connection) => success(format!("Disconnected {}", connection.name())),
        Err(e) => error_response(&e),
    }
}

/// Inject a packet into a live connection
pub async fn send_packet(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<SendRequest>,
) -> HttpResponse {
    let connection = match state.session.get(&path.into_inner()) {
        Ok(connection) => connection,
        Err(e) => return error_response(&e),
    };

    let Some(payload) = parse_hex(&request.data) else {
        return bad_request(format!("Invalid hex data: {}", request.data));
    };
    let len = payload.len();

    match connection.send(request.direction, payload).await {
        Ok(()) => {
            info!("Injected {} bytes {} on {}", len, request.direction, connection.name());
            success(format!("Sent {} bytes", len))
        }
        Err(e) => {
            error!("Send on {} failed: {}", connection.name(), e);
            error_response(&e)
        }
    }
}

/// Save a connection's packets to a capture file.
///
/// Writing runs on the blocking pool so large captures do not stall the worker.
pub async fn save_connection(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<CaptureFileRequest>,
) -> HttpResponse {
    let id = path.into_inner();
    let session = state.session.clone();
    let target = request.path.clone();

    match web::block(move || session.save(&id, &target)).await {
        Ok(Ok(count)) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Saved {} packets to {}", count, request.path.display()),
            "packets": count,
        })),
        Ok(Err(e)) => {
            error!("Failed to save capture to {}: {}", request.path.display(), e);
            error_response(&e)
        }
        Err(e) => blocking_failed(e),
    }
}

/// Forget a connection, disconnecting it if live
pub async fn delete_connection(state: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    match state.session.remove(&path.into_inner()) {
        Ok(connection) => success(format!("Removed {}", connection.name())),
        Err(e) => error_response(&e),
    }
}

/// Load a capture file as a saved connection
pub async fn load_capture(
    state: web::Data<AppState>,
    request: web::Json<CaptureFileRequest>,
) -> HttpResponse {
    let version = match request.protocol_version.as_deref() {
        Some(text) => match text.parse::<ProtocolVersion>() {
            Ok(version) => version,
            Err(e) => return bad_request(e),
        },
        None => state.listener.config().protocol_version,
    };

    let session = state.session.clone();
    let source = request.path.clone();
    let (connection, loaded) = match web::block(move || session.load(&source, version)).await {
        Ok(result) => result,
        Err(e) => return blocking_failed(e),
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": if loaded { "success" } else { "error" },
        "loaded": loaded,
        "connection": connection.info(),
    }))
}
