use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::capture::connection::CapturedConnection;
use crate::models::packet::PacketRecord;

/// Notifications published by the capture core
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A client was accepted and relayed to the target
    ClientConnected(Arc<CapturedConnection>),

    /// A client was accepted but the target could not be reached
    ConnectFailed {
        peer: SocketAddr,
        target: String,
        error: String,
    },

    /// A live connection stopped relaying
    Disconnected(Arc<CapturedConnection>),

    /// A packet was appended to a live connection
    PacketAppended {
        connection: Arc<CapturedConnection>,
        index: usize,
        packet: Arc<PacketRecord>,
    },
}

/// Publish/subscribe fan-out for capture events.
///
/// Publishing never blocks and never fails when nobody is subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CaptureEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: CaptureEvent) {
        // Err only means there are no subscribers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
