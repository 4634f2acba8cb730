use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::capture::relay::RelayHandles;
use crate::models::event::{CaptureEvent, EventBus};
use crate::models::packet::{Direction, PacketRecord};
use crate::models::stats::ConnectionStats;
use crate::models::version::ProtocolVersion;
use crate::utils::error::{AppError, AppResult};

/// Where a connection's packets come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    /// Backed by an active relay
    Live,

    /// Loaded from a capture file
    Saved,
}

/// Operations a connection supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_disconnect: bool,
    pub can_send: bool,
}

/// An ordered packet log plus, for live connections, the relay feeding it.
///
/// The packet sequence is append-only. Relay pumps append concurrently while
/// readers take cheap snapshots of `Arc<PacketRecord>`s.
#[derive(Debug)]
pub struct CapturedConnection {
    id: Uuid,
    name: String,
    kind: ConnectionKind,
    created_at: DateTime<Utc>,
    protocol_version: RwLock<ProtocolVersion>,
    records: RwLock<Vec<Arc<PacketRecord>>>,
    /// Running totals, folded in on append
    stats: Mutex<ConnectionStats>,
    connected: AtomicBool,
    relay: Mutex<Option<RelayHandles>>,
    events: Option<EventBus>,
}

impl CapturedConnection {
    /// Create a live connection. Packets arrive once a relay is attached.
    pub fn live(name: String, protocol_version: ProtocolVersion, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name,
            kind: ConnectionKind::Live,
            created_at: Utc::now(),
            protocol_version: RwLock::new(protocol_version),
            records: RwLock::new(Vec::new()),
            stats: Mutex::new(ConnectionStats::default()),
            connected: AtomicBool::new(true),
            relay: Mutex::new(None),
            events: Some(events),
        })
    }

    /// Create an immutable connection from already captured packets
    pub fn saved(
        name: String,
        records: Vec<PacketRecord>,
        protocol_version: ProtocolVersion,
    ) -> Arc<Self> {
        let mut stats = ConnectionStats::default();
        for record in &records {
            stats.record(record);
        }

        Arc::new(Self {
            id: Uuid::new_v4(),
            name,
            kind: ConnectionKind::Saved,
            created_at: Utc::now(),
            protocol_version: RwLock::new(protocol_version),
            records: RwLock::new(records.into_iter().map(Arc::new).collect()),
            stats: Mutex::new(stats),
            connected: AtomicBool::new(false),
            relay: Mutex::new(None),
            events: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn capabilities(&self) -> Capabilities {
        match self.kind {
            ConnectionKind::Live => Capabilities {
                can_disconnect: true,
                can_send: true,
            },
            ConnectionKind::Saved => Capabilities {
                can_disconnect: false,
                can_send: false,
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version.read().clone()
    }

    /// Switch the version used to decode this connection's packets
    pub fn set_protocol_version(&self, version: ProtocolVersion) {
        *self.protocol_version.write() = version;
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<PacketRecord>> {
        self.records.read().get(index).cloned()
    }

    /// Records from `start` to the current end
    pub fn records_from(&self, start: usize) -> Vec<Arc<PacketRecord>> {
        let records = self.records.read();
        records.get(start..).map(|tail| tail.to_vec()).unwrap_or_default()
    }

    /// All records captured so far
    pub fn snapshot(&self) -> Vec<Arc<PacketRecord>> {
        self.records_from(0)
    }

    /// Totals so far. Does not touch the packet sequence.
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    /// Append a relayed packet and notify subscribers
    pub fn append(
        self: &Arc<Self>,
        direction: Direction,
        payload: Vec<u8>,
    ) -> AppResult<Arc<PacketRecord>> {
        if self.kind == ConnectionKind::Saved {
            return Err(AppError::InvalidOperation(format!(
                "{} is a saved capture and cannot grow",
                self.name
            )));
        }

        let record = Arc::new(PacketRecord::captured_now(direction, payload));
        let index = {
            let mut records = self.records.write();
            records.push(record.clone());
            self.stats.lock().record(&record);
            records.len() - 1
        };

        if let Some(events) = &self.events {
            events.publish(CaptureEvent::PacketAppended {
                connection: self.clone(),
                index,
                packet: record.clone(),
            });
        }

        Ok(record)
    }

    /// Hand the running relay to this connection.
    ///
    /// If the relay already ended (both peers gone before we got here) it is torn down at once.
    pub(crate) fn attach_relay(&self, handles: RelayHandles) {
        let mut relay = self.relay.lock();
        if self.is_connected() {
            *relay = Some(handles);
        } else {
            drop(relay);
            handles.abort();
        }
    }

    /// Inject bytes toward the server (`ClientToServer`) or the client (`ServerToClient`)
    pub async fn send(self: &Arc<Self>, direction: Direction, payload: Vec<u8>) -> AppResult<()> {
        if !self.capabilities().can_send {
            return Err(AppError::InvalidOperation(format!(
                "{} cannot send packets",
                self.name
            )));
        }

        let writer = {
            let relay = self.relay.lock();
            match relay.as_ref() {
                Some(handles) if self.is_connected() => handles.writer_for(direction),
                _ => {
                    return Err(AppError::InvalidOperation(format!(
                        "{} is not connected",
                        self.name
                    )))
                }
            }
        };

        let result = {
            let mut writer = writer.lock().await;
            writer.write_all(&payload).await
        };

        if let Err(e) = result {
            warn!("Send on {} failed: {}", self.name, e);
            self.close();
            return Err(AppError::IoError(e));
        }

        self.append(direction, payload)?;
        Ok(())
    }

    /// Close both sockets of a live connection
    pub fn disconnect(self: &Arc<Self>) -> AppResult<()> {
        if !self.capabilities().can_disconnect {
            return Err(AppError::InvalidOperation(format!(
                "{} is a saved capture",
                self.name
            )));
        }

        self.close();
        Ok(())
    }

    /// Stop the relay and publish the disconnect, once. Returns false if already closed.
    pub(crate) fn close(self: &Arc<Self>) -> bool {
        let handles = {
            let mut relay = self.relay.lock();
            if !self.connected.swap(false, Ordering::SeqCst) {
                return false;
            }
            relay.take()
        };

        if let Some(handles) = handles {
            handles.abort();
        }

        info!("Connection {} closed after {} packets", self.name, self.len());

        if let Some(events) = &self.events {
            events.publish(CaptureEvent::Disconnected(self.clone()));
        }
        true
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            connected: self.is_connected(),
            protocol_version: self.protocol_version().to_string(),
            capabilities: self.capabilities(),
            created_at: self.created_at,
            stats: self.stats(),
        }
    }
}

/// Serializable description of a connection for API listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub name: String,
    pub kind: ConnectionKind,
    pub connected: bool,
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub created_at: DateTime<Utc>,
    pub stats: ConnectionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_append_publishes_events() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let conn = CapturedConnection::live("test".to_string(), ProtocolVersion::default(), events);

        conn.append(Direction::ClientToServer, vec![1, 2, 3]).unwrap();
        conn.append(Direction::ServerToClient, vec![4]).unwrap();

        assert_eq!(conn.len(), 2);
        match rx.recv().await.unwrap() {
            CaptureEvent::PacketAppended { index, packet, .. } => {
                assert_eq!(index, 0);
                assert_eq!(packet.payload(), &[1, 2, 3]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let stats = conn.stats();
        assert_eq!(stats.total_packets, 2);
        assert_eq!(stats.client_bytes, 3);
        assert_eq!(stats.server_bytes, 1);
    }

    #[test]
    fn test_saved_is_immutable() {
        let records = vec![PacketRecord::captured_now(Direction::ClientToServer, vec![1])];
        let conn = CapturedConnection::saved("file".to_string(), records, ProtocolVersion::default());

        assert!(!conn.is_connected());
        assert_eq!(
            conn.capabilities(),
            Capabilities {
                can_disconnect: false,
                can_send: false
            }
        );
        assert!(matches!(
            conn.append(Direction::ClientToServer, vec![2]),
            Err(AppError::InvalidOperation(_))
        ));
        assert!(matches!(conn.disconnect(), Err(AppError::InvalidOperation(_))));
        assert_eq!(conn.len(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let saved = CapturedConnection::saved("file".to_string(), Vec::new(), ProtocolVersion::default());
        assert!(matches!(
            saved.send(Direction::ClientToServer, vec![1]).await,
            Err(AppError::InvalidOperation(_))
        ));

        let live = CapturedConnection::live("live".to_string(), ProtocolVersion::default(), EventBus::default());
        live.disconnect().unwrap();
        assert!(matches!(
            live.send(Direction::ClientToServer, vec![1]).await,
            Err(AppError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let conn = CapturedConnection::live("live".to_string(), ProtocolVersion::default(), events);

        assert!(conn.close());
        assert!(!conn.close());
        conn.disconnect().unwrap();

        assert!(matches!(rx.try_recv(), Ok(CaptureEvent::Disconnected(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stats_track_appends() {
        let records = vec![
            PacketRecord::captured_now(Direction::ClientToServer, vec![1, 2]),
            PacketRecord::captured_now(Direction::ServerToClient, vec![3, 4, 5]),
        ];
        let first = records[0].timestamp();
        let saved = CapturedConnection::saved("file".to_string(), records, ProtocolVersion::default());
        let stats = saved.stats();
        assert_eq!(stats.total_packets, 2);
        assert_eq!(stats.total_bytes, 5);
        assert_eq!(stats.server_packets, 1);
        assert_eq!(stats.first_packet, Some(first));

        let live = CapturedConnection::live("live".to_string(), ProtocolVersion::default(), EventBus::default());
        assert_eq!(live.stats(), ConnectionStats::default());
        for i in 0..10u8 {
            live.append(Direction::ServerToClient, vec![i; i as usize]).unwrap();
        }
        let stats = live.stats();
        assert_eq!(stats.total_packets, 10);
        assert_eq!(stats.server_bytes, 45);
        assert_eq!(stats.client_packets, 0);
        assert_eq!(stats.last_packet, Some(live.get(9).unwrap().timestamp()));

        // totals are readable while a long reader holds the sequence
        let held = live.records.read();
        assert_eq!(live.stats().total_packets, held.len());
    }

    #[test]
    fn test_records_from() {
        let conn = CapturedConnection::live("live".to_string(), ProtocolVersion::default(), EventBus::default());
        for i in 0..5u8 {
            conn.append(Direction::ClientToServer, vec![i]).unwrap();
        }

        let tail = conn.records_from(3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].payload(), &[3]);
        assert!(conn.records_from(10).is_empty());
    }
}
