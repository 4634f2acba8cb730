use actix_web::{web, Error, HttpRequest, Responder};
use actix_ws::{self, Message};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use uuid::Uuid;

use crate::api::AppState;
use crate::capture::connection::{CapturedConnection, ConnectionInfo};
use crate::capture::filter::{FilteredView, Predicate};
use crate::models::event::CaptureEvent;
use crate::models::packet::PacketSummary;

// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// Drop clients that stay silent this long
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// WebSocket message types that can be sent to clients
#[derive(Serialize)]
#[serde(tag = "type")]
enum WsOutMessage {
    #[serde(rename = "connected")]
    Connected { connection: ConnectionInfo },

    #[serde(rename = "connect_failed")]
    ConnectFailed { peer: String, target: String, error: String },

    #[serde(rename = "disconnected")]
    Disconnected { connection: ConnectionInfo },

    #[serde(rename = "packet")]
    Packet { connection: Uuid, packet: PacketSummary },

    #[serde(rename = "watching")]
    Watching { connection: Uuid, filter: Option<String>, matched: usize },

    #[serde(rename = "filter")]
    Filter { filter: Option<String>, matched: Option<usize> },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
}

/// Connection selected by `watch` and its live filtered view
struct Watch {
    connection: Arc<CapturedConnection>,
    view: FilteredView,
}

/// Per-socket state driven by client commands
#[derive(Default)]
struct WsClient {
    filter: Option<String>,
    watch: Option<Watch>,
}

impl WsClient {
    /// Apply one text command and return the replies
    fn command(&mut self, text: &str, state: &AppState) -> Vec<WsOutMessage> {
        let text = text.trim();
        let (verb, arg) = text.split_once(' ').unwrap_or((text, ""));

        match verb {
            "watch" => match arg.trim().parse::<Uuid>() {
                Ok(id) => match state.session.get(&id) {
                    Ok(connection) => self.watch(connection),
                    Err(e) => vec![error(e.to_string())],
                },
                Err(_) => vec![error(format!("invalid connection id '{}'", arg.trim()))],
            },
            "unwatch" => {
                self.watch = None;
                Vec::new()
            }
            "filter" => self.set_filter(arg),
            _ => vec![error(format!("unknown command '{}'", text))],
        }
    }

    fn watch(&mut self, connection: Arc<CapturedConnection>) -> Vec<WsOutMessage> {
        let mut view = FilteredView::new();
        let filter = self.filter.clone().unwrap_or_default();
        // already validated when it was installed
        if view.set_filter(&filter, &connection).is_err() {
            view.sync(&connection);
        }

        let reply = WsOutMessage::Watching {
            connection: connection.id(),
            filter: view.filter_text().map(str::to_string),
            matched: view.packets().len(),
        };
        self.watch = Some(Watch { connection, view });
        vec![reply]
    }

    /// Install a live filter. A rejected filter leaves the current one in place.
    fn set_filter(&mut self, text: &str) -> Vec<WsOutMessage> {
        if let Err(e) = Predicate::compile(text) {
            return vec![error(format!("invalid filter: {}", e))];
        }

        let text = text.trim();
        self.filter = (!text.is_empty()).then(|| text.to_string());

        let matched = self.watch.as_mut().map(|watch| {
            // compiled above, cannot fail
            let _ = watch.view.set_filter(text, &watch.connection);
            watch.view.packets().len()
        });

        vec![WsOutMessage::Filter {
            filter: self.filter.clone(),
            matched,
        }]
    }

    /// Pull records appended since the last sync and return the ones the filter accepts
    fn catch_up(&mut self) -> Vec<WsOutMessage> {
        let Some(watch) = self.watch.as_mut() else {
            return Vec::new();
        };

        let before = watch.view.packets().len();
        watch.view.sync(&watch.connection);
        debug!(
            "{} view at {} records, {} matched",
            watch.connection.name(),
            watch.view.cursor(),
            watch.view.packets().len()
        );

        let id = watch.connection.id();
        watch.view.packets()[before..]
            .iter()
            .map(|(index, record)| WsOutMessage::Packet {
                connection: id,
                packet: PacketSummary::from_record(*index, record),
            })
            .collect()
    }

    fn event(&mut self, event: CaptureEvent) -> Vec<WsOutMessage> {
        match event {
            CaptureEvent::ClientConnected(connection) => vec![WsOutMessage::Connected {
                connection: connection.info(),
            }],
            CaptureEvent::ConnectFailed { peer, target, error } => vec![WsOutMessage::ConnectFailed {
                peer: peer.to_string(),
                target,
                error,
            }],
            CaptureEvent::Disconnected(connection) => {
                let mut out = self.catch_up();
                out.push(WsOutMessage::Disconnected {
                    connection: connection.info(),
                });
                out
            }
            CaptureEvent::PacketAppended { connection, .. } => {
                let watched = self
                    .watch
                    .as_ref()
                    .map_or(false, |w| w.connection.id() == connection.id());
                if watched {
                    self.catch_up()
                } else {
                    Vec::new()
                }
            }
        }
    }
}

fn error(message: String) -> WsOutMessage {
    WsOutMessage::Error { message }
}

async fn send_all(
    session: &mut actix_ws::Session,
    messages: Vec<WsOutMessage>,
) -> Result<(), actix_ws::Closed> {
    for msg in messages {
        if let Ok(json) = serde_json::to_string(&msg) {
            session.text(json).await?;
        }
    }
    Ok(())
}

/// Handle WebSocket connections
pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<impl Responder, Error> {
    let addr = req
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("WebSocket connection from: {}", addr);

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;
    let state = state.into_inner();
    let mut events = state.session.events().subscribe();

    actix_web::rt::spawn(async move {
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        let mut last_heard = Instant::now();
        let mut client = WsClient::default();

        loop {
            let outgoing = tokio::select! {
                msg = msg_stream.next() => {
                    let Some(Ok(msg)) = msg else { break };
                    last_heard = Instant::now();

                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                            Vec::new()
                        }
                        Message::Text(text) => {
                            debug!("Received text message: {}", text);
                            client.command(&text, &state)
                        }
                        Message::Close(_) => {
                            info!("Client requested close");
                            break;
                        }
                        _ => Vec::new(),
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => client.event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        // packet events are recovered from the connection itself
                        warn!("WebSocket {} lagged, skipped {} events", addr, skipped);
                        client.catch_up()
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    if last_heard.elapsed() > CLIENT_TIMEOUT {
                        warn!("WebSocket client heartbeat timed out");
                        break;
                    }
                    vec![WsOutMessage::Ping {
                        timestamp: chrono::Utc::now().timestamp() as u64,
                    }]
                }
            };

            if send_all(&mut session, outgoing).await.is_err() {
                break;
            }
        }

        let _ = session.close(None).await;
        info!("WebSocket connection {} closed", addr);
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::listener::Listener;
    use crate::capture::session::CaptureSession;
    use crate::decode::decoder::ProtocolDecoder;
    use crate::decode::registry::RuleRegistry;
    use crate::models::config::{AppConfig, ListenerConfig};
    use crate::models::event::EventBus;
    use crate::models::packet::Direction;
    use crate::models::version::ProtocolVersion;

    fn state() -> AppState {
        let session = Arc::new(CaptureSession::new(EventBus::new(64)));
        let config = AppConfig {
            listen_port: 0,
            listener: ListenerConfig::default(),
            api_port: 0,
            read_buffer: 4096,
            rules: None,
        };
        AppState {
            listener: Arc::new(Listener::new(config.listener.clone(), session.clone(), 4096)),
            session,
            decoder: ProtocolDecoder::new(Arc::new(RuleRegistry::new())),
            config,
        }
    }

    fn live(state: &AppState) -> Arc<CapturedConnection> {
        let connection = CapturedConnection::live(
            "live".to_string(),
            ProtocolVersion::default(),
            state.session.events().clone(),
        );
        state.session.insert(connection.clone());
        connection
    }

    fn packet_indexes(messages: &[WsOutMessage]) -> Vec<usize> {
        messages
            .iter()
            .filter_map(|m| match m {
                WsOutMessage::Packet { packet, .. } => Some(packet.index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_watched_packets_respect_live_filter() {
        let state = state();
        let connection = live(&state);
        let mut rx = state.session.events().subscribe();
        let mut client = WsClient::default();

        assert!(matches!(
            client.command("filter [Direction] IN 'S->C'", &state).as_slice(),
            [WsOutMessage::Filter { matched: None, .. }]
        ));
        let reply = client.command(&format!("watch {}", connection.id()), &state);
        assert!(matches!(reply.as_slice(), [WsOutMessage::Watching { matched: 0, .. }]));

        connection.append(Direction::ClientToServer, vec![1]).unwrap();
        connection.append(Direction::ServerToClient, vec![2]).unwrap();

        let mut sent = Vec::new();
        while let Ok(event) = rx.try_recv() {
            sent.extend(client.event(event));
        }
        assert_eq!(packet_indexes(&sent), vec![1]);
    }

    #[test]
    fn test_rejected_filter_keeps_previous() {
        let state = state();
        let connection = live(&state);
        connection.append(Direction::ClientToServer, vec![0xC1]).unwrap();
        connection.append(Direction::ServerToClient, vec![0xC2]).unwrap();

        let mut client = WsClient::default();
        client.command(&format!("watch {}", connection.id()), &state);
        client.command("filter [Type] IN 'C2'", &state);

        let reply = client.command("filter [Nope] IN 'x'", &state);
        assert!(matches!(reply.as_slice(), [WsOutMessage::Error { .. }]));
        assert_eq!(client.filter.as_deref(), Some("[Type] IN 'C2'"));
        assert_eq!(client.watch.as_ref().unwrap().view.packets().len(), 1);
    }

    #[test]
    fn test_unwatched_connection_is_silent() {
        let state = state();
        let watched = live(&state);
        let other = live(&state);
        let mut rx = state.session.events().subscribe();

        let mut client = WsClient::default();
        client.command(&format!("watch {}", watched.id()), &state);
        other.append(Direction::ClientToServer, vec![1]).unwrap();

        let event = rx.try_recv().unwrap();
        assert!(client.event(event).is_empty());

        client.command("unwatch", &state);
        watched.append(Direction::ClientToServer, vec![1]).unwrap();
        let event = rx.try_recv().unwrap();
        assert!(client.event(event).is_empty());
    }

    #[test]
    fn test_lag_recovers_from_connection() {
        let state = state();
        let connection = live(&state);
        let mut client = WsClient::default();
        client.command(&format!("watch {}", connection.id()), &state);

        for i in 0..3u8 {
            connection.append(Direction::ClientToServer, vec![i]).unwrap();
        }
        assert_eq!(packet_indexes(&client.catch_up()), vec![0, 1, 2]);
        assert!(client.catch_up().is_empty());
    }

    #[test]
    fn test_bad_commands() {
        let state = state();
        let mut client = WsClient::default();

        assert!(matches!(client.command("watch nope", &state).as_slice(), [WsOutMessage::Error { .. }]));
        assert!(matches!(
            client.command(&format!("watch {}", Uuid::new_v4()), &state).as_slice(),
            [WsOutMessage::Error { .. }]
        ));
        assert!(matches!(client.command("dance", &state).as_slice(), [WsOutMessage::Error { .. }]));
    }
}
