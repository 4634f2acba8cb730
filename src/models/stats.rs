use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::packet::{Direction, PacketRecord};

/// Statistics for one captured connection
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConnectionStats {
    /// Total number of packets captured
    pub total_packets: usize,

    /// Total bytes captured
    pub total_bytes: usize,

    /// Packets sent by the client
    pub client_packets: usize,

    /// Bytes sent by the client
    pub client_bytes: usize,

    /// Packets sent by the server
    pub server_packets: usize,

    /// Bytes sent by the server
    pub server_bytes: usize,

    /// Capture time of the first packet
    pub first_packet: Option<DateTime<Utc>>,

    /// Capture time of the latest packet
    pub last_packet: Option<DateTime<Utc>>,
}

impl ConnectionStats {
    /// Fold one record into the totals
    pub fn record(&mut self, packet: &PacketRecord) {
        self.total_packets += 1;
        self.total_bytes += packet.len();

        match packet.direction() {
            Direction::ClientToServer => {
                self.client_packets += 1;
                self.client_bytes += packet.len();
            }
            Direction::ServerToClient => {
                self.server_packets += 1;
                self.server_bytes += packet.len();
            }
        }

        let ts = packet.timestamp();
        if self.first_packet.map_or(true, |first| ts < first) {
            self.first_packet = Some(ts);
        }
        if self.last_packet.map_or(true, |last| ts > last) {
            self.last_packet = Some(ts);
        }
    }
}
