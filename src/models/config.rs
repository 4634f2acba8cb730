use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::version::ProtocolVersion;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port the game client connects to
    pub listen_port: u16,

    /// Settings applied to newly accepted connections
    pub listener: ListenerConfig,

    /// Port for the REST API server
    pub api_port: u16,

    /// Bytes requested per socket read; each read becomes one packet record
    pub read_buffer: usize,

    /// JSON file with decode rule tables
    pub rules: Option<PathBuf>,
}

/// Runtime-mutable listener settings. Changes only affect connections accepted afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Host of the real game server
    pub target_host: String,

    /// Port of the real game server
    pub target_port: u16,

    /// Protocol version stamped on new connections
    pub protocol_version: ProtocolVersion,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            target_host: "127.0.0.1".to_string(),
            target_port: 44406,
            protocol_version: ProtocolVersion::default(),
        }
    }
}
