use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

use crate::api::handlers::{
    connections::{
        delete_connection, disconnect_connection, get_connection, list_connections, load_capture,
        save_connection, send_packet,
    },
    filters::{list_columns, validate_filter},
    listener::{get_listener_status, start_listener, stop_listener, update_listener_settings},
    packets::{get_packet, get_packets},
};
use crate::api::websocket::ws_index;

/// Root endpoint to provide information about the API
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "mucap API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Capturing relay proxy for game client/server traffic",
        "endpoints": [
            { "path": "/api/listener", "method": "GET", "description": "Listener status and settings" },
            { "path": "/api/listener/start", "method": "POST", "description": "Start accepting game clients" },
            { "path": "/api/listener/stop", "method": "POST", "description": "Stop the listener and close live connections" },
            { "path": "/api/listener/settings", "method": "POST", "description": "Change target and protocol version" },
            { "path": "/api/connections", "method": "GET", "description": "List captured connections" },
            { "path": "/api/connections/{id}", "method": "GET", "description": "Get one connection" },
            { "path": "/api/connections/{id}", "method": "DELETE", "description": "Remove a connection" },
            { "path": "/api/connections/{id}/packets", "method": "GET", "description": "List packets, with optional filter" },
            { "path": "/api/connections/{id}/packets/{index}", "method": "GET", "description": "Get a decoded packet" },
            { "path": "/api/connections/{id}/disconnect", "method": "POST", "description": "Close a live connection" },
            { "path": "/api/connections/{id}/send", "method": "POST", "description": "Inject a packet" },
            { "path": "/api/connections/{id}/save", "method": "POST", "description": "Save packets to a capture file" },
            { "path": "/api/captures/load", "method": "POST", "description": "Load a capture file" },
            { "path": "/api/filters/validate", "method": "POST", "description": "Check a filter expression" },
            { "path": "/api/filters/columns", "method": "GET", "description": "Columns usable in filters" },
            { "path": "/api/ws", "method": "GET", "description": "WebSocket endpoint for live events" }
        ]
    }))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint
        .route("/", web::get().to(index))
        .service(
            web::scope("/api")
                // WebSocket route for live events
                .route("/ws", web::get().to(ws_index))
                .service(
                    web::scope("/listener")
                        .route("", web::get().to(get_listener_status))
                        .route("/start", web::post().to(start_listener))
                        .route("/stop", web::post().to(stop_listener))
                        .route("/settings", web::post().to(update_listener_settings)),
                )
                .service(
                    web::scope("/connections")
                        .route("", web::get().to(list_connections))
                        .route("/{id}", web::get().to(get_connection))
                        .route("/{id}", web::delete().to(delete_connection))
                        .route("/{id}/packets", web::get().to(get_packets))
                        .route("/{id}/packets/{index}", web::get().to(get_packet))
                        .route("/{id}/disconnect", web::post().to(disconnect_connection))
                        .route("/{id}/send", web::post().to(send_packet))
                        .route("/{id}/save", web::post().to(save_connection)),
                )
                .service(web::scope("/captures").route("/load", web::post().to(load_capture)))
                .service(
                    web::scope("/filters")
                        .route("/validate", web::post().to(validate_filter))
                        .route("/columns", web::get().to(list_columns)),
                ),
        );
}
