use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::Deserialize;

use crate::api::{bad_request, error_response, success, AppState};
use crate::models::version::ProtocolVersion;

/// Request for starting the listener. Missing fields fall back to the current settings.
#[derive(Deserialize)]
pub struct StartListenerRequest {
    /// Port the game client connects to
    pub listen_port: Option<u16>,

    /// Host of the real game server
    pub target_host: Option<String>,

    /// Port of the real game server
    pub target_port: Option<u16>,

    /// Protocol version, e.g. `1.4-ENG`
    pub protocol_version: Option<String>,
}

/// Request for updating listener settings
#[derive(Deserialize)]
pub struct UpdateSettingsRequest {
    pub target_host: Option<String>,

    pub target_port: Option<u16>,

    pub protocol_version: Option<String>,

    /// Also switch open connections to the new protocol version
    #[serde(default)]
    pub propagate: bool,
}

fn parse_version(text: Option<&str>) -> Result<Option<ProtocolVersion>, HttpResponse> {
    text.map(|t| t.parse::<ProtocolVersion>())
        .transpose()
        .map_err(bad_request)
}

/// Get listener status
pub async fn get_listener_status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.listener.status())
}

/// Start accepting game clients
pub async fn start_listener(
    state: web::Data<AppState>,
    request: Option<web::Json<StartListenerRequest>>,
) -> HttpResponse {
    let current = state.listener.config();
    let request = request.map(|r| r.into_inner());

    let listen_port = request
        .as_ref()
        .and_then(|r| r.listen_port)
        .unwrap_or(state.config.listen_port);
    let target_host = request
        .as_ref()
        .and_then(|r| r.target_host.clone())
        .unwrap_or(current.target_host);
    let target_port = request
        .as_ref()
        .and_then(|r| r.target_port)
        .unwrap_or(current.target_port);
    let version = match parse_version(request.as_ref().and_then(|r| r.protocol_version.as_deref())) {
        Ok(version) => version.unwrap_or(current.protocol_version),
        Err(response) => return response,
    };

    info!(
        "Starting listener on port {} for {}:{} ({})",
        listen_port, target_host, target_port, version
    );

    match state
        .listener
        .start(listen_port, &target_host, target_port, version)
        .await
    {
        Ok(addr) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Listening on {}", addr),
            "local_addr": addr,
        })),
        Err(e) => {
            error!("Failed to start listener: {}", e);
            error_response(&e)
        }
    }
}

/// Stop the listener and close open live connections
pub async fn stop_listener(state: web::Data<AppState>) -> HttpResponse {
    if state.listener.stop() {
        success("Listener stopped")
    } else {
        success("Listener was not running")
    }
}

/// Change settings for connections accepted from now on
pub async fn update_listener_settings(
    state: web::Data<AppState>,
    request: web::Json<UpdateSettingsRequest>,
) -> HttpResponse {
    let version = match parse_version(request.protocol_version.as_deref()) {
        Ok(version) => version,
        Err(response) => return response,
    };

    if let Some(host) = &request.target_host {
        state.listener.set_target_host(host);
    }
    if let Some(port) = request.target_port {
        state.listener.set_target_port(port);
    }
    if let Some(version) = version {
        state.listener.set_protocol_version(version, request.propagate);
    }

    HttpResponse::Ok().json(state.listener.status())
}
