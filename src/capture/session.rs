use dashmap::DashMap;
use log::info;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::capture::codec;
use crate::capture::connection::{CapturedConnection, ConnectionKind};
use crate::models::event::EventBus;
use crate::models::version::ProtocolVersion;
use crate::utils::error::{AppError, AppResult};

/// Every captured connection known to the process, live or loaded from disk
#[derive(Debug, Default)]
pub struct CaptureSession {
    connections: DashMap<Uuid, Arc<CapturedConnection>>,
    events: EventBus,
}

impl CaptureSession {
    pub fn new(events: EventBus) -> Self {
        Self {
            connections: DashMap::new(),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn insert(&self, connection: Arc<CapturedConnection>) {
        self.connections.insert(connection.id(), connection);
    }

    pub fn get(&self, id: &Uuid) -> AppResult<Arc<CapturedConnection>> {
        self.connections
            .get(id)
            .map(|c| c.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))
    }

    /// Forget a connection. A live one is disconnected first.
    pub fn remove(&self, id: &Uuid) -> AppResult<Arc<CapturedConnection>> {
        let (_, connection) = self
            .connections
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))?;

        if connection.kind() == ConnectionKind::Live {
            connection.disconnect()?;
        }
        Ok(connection)
    }

    /// All connections, oldest first
    pub fn list(&self) -> Vec<Arc<CapturedConnection>> {
        let mut all: Vec<_> = self.connections.iter().map(|c| c.value().clone()).collect();
        all.sort_by_key(|c| c.created_at());
        all
    }

    /// Live connections that are still relaying
    pub fn open_connections(&self) -> Vec<Arc<CapturedConnection>> {
        self.list()
            .into_iter()
            .filter(|c| c.kind() == ConnectionKind::Live && c.is_connected())
            .collect()
    }

    /// Write a connection's packets to a capture file
    pub fn save(&self, id: &Uuid, path: &Path) -> AppResult<usize> {
        let connection = self.get(id)?;
        codec::save(&connection, path)
    }

    /// Load a capture file and register it as a saved connection.
    ///
    /// The flag is false when the file could not be read; the connection is then empty.
    pub fn load(&self, path: &Path, version: ProtocolVersion) -> (Arc<CapturedConnection>, bool) {
        let (connection, loaded) = codec::load_with_status(path, version);
        info!("Registered capture {} ({} packets)", connection.name(), connection.len());
        self.insert(connection.clone());
        (connection, loaded)
    }
}
