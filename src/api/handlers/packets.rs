use actix_web::{web, HttpResponse};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{bad_request, error_response, AppState};
use crate::capture::filter::compile_optional;
use crate::models::packet::PacketSummary;

/// Query parameters for listing packets
#[derive(Deserialize)]
pub struct PacketsQuery {
    /// Offset into the matching packets
    #[serde(default = "default_offset")]
    offset: usize,

    /// Limit for pagination
    #[serde(default = "default_limit")]
    limit: usize,

    /// Filter expression, e.g. `[Type] IN 'C1' AND [Code] IN 'F3'`
    filter: Option<String>,
}

fn default_offset() -> usize { 0 }
fn default_limit() -> usize { 100 }

/// Response for listing packets
#[derive(Serialize)]
struct PacketsResponse {
    packets: Vec<PacketSummary>,
    /// Packets matching the filter
    total: usize,
    offset: usize,
    limit: usize,
    filter: Option<String>,
}

/// Get a page of a connection's packets, optionally filtered
pub async fn get_packets(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<PacketsQuery>,
) -> HttpResponse {
    let connection = match state.session.get(&path.into_inner()) {
        Ok(connection) => connection,
        Err(e) => return error_response(&e),
    };

    let predicate = match compile_optional(query.filter.as_deref()) {
        Ok(predicate) => predicate,
        Err(e) => return bad_request(format!("Invalid filter: {}", e)),
    };

    let matching: Vec<PacketSummary> = connection
        .snapshot()
        .iter()
        .enumerate()
        .filter(|(_, record)| predicate.as_ref().map_or(true, |p| p.matches(record)))
        .map(|(index, record)| PacketSummary::from_record(index, record))
        .collect();
    let total = matching.len();

    let packets: Vec<PacketSummary> = matching
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();

    debug!(
        "Retrieved {} packets of {} (offset: {}, limit: {}, total: {})",
        packets.len(), connection.name(), query.offset, query.limit, total
    );

    HttpResponse::Ok().json(PacketsResponse {
        packets,
        total,
        offset: query.offset,
        limit: query.limit,
        filter: predicate.map(|_| query.filter.clone().unwrap_or_default()),
    })
}

/// Get one packet with decoded information
pub async fn get_packet(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, usize)>,
) -> HttpResponse {
    let (id, index) = path.into_inner();
    let connection = match state.session.get(&id) {
        Ok(connection) => connection,
        Err(e) => return error_response(&e),
    };

    match connection.get(index) {
        Some(record) => {
            let version = connection.protocol_version();
            HttpResponse::Ok().json(state.decoder.detail(index, &record, &version))
        }
        None => HttpResponse::NotFound().json(serde_json::json!({
            "status": "error",
            "message": format!("Packet {} not found in {}", index, connection.name())
        })),
    }
}
