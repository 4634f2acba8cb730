use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::utils::hex::hex_string;

/// Which way a packet travelled through the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    /// Marker byte used in capture files
    pub fn marker(self) -> u8 {
        match self {
            Direction::ClientToServer => 0,
            Direction::ServerToClient => 1,
        }
    }

    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            0 => Some(Direction::ClientToServer),
            1 => Some(Direction::ServerToClient),
            _ => None,
        }
    }

    /// Short label shown in packet lists
    pub fn label(self) -> &'static str {
        match self {
            Direction::ClientToServer => "C->S",
            Direction::ServerToClient => "S->C",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Header kind from the first byte of a game packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    /// One-byte size, plain body
    C1,
    /// Two-byte size, plain body
    C2,
    /// One-byte size, encrypted body
    C3,
    /// Two-byte size, encrypted body
    C4,
    /// Anything else; carries the first byte (0 for an empty payload)
    Unknown(u8),
}

impl PacketKind {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0xC1 => PacketKind::C1,
            0xC2 => PacketKind::C2,
            0xC3 => PacketKind::C3,
            0xC4 => PacketKind::C4,
            other => PacketKind::Unknown(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            PacketKind::C1 => 0xC1,
            PacketKind::C2 => 0xC2,
            PacketKind::C3 => 0xC3,
            PacketKind::C4 => 0xC4,
            PacketKind::Unknown(b) => b,
        }
    }

    pub fn is_encrypted(self) -> bool {
        matches!(self, PacketKind::C3 | PacketKind::C4)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.byte())
    }
}

/// Key used to pick a decode rule for a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassificationKey {
    pub kind: PacketKind,
    pub code: Option<u8>,
    pub sub_code: Option<u8>,
}

impl ClassificationKey {
    /// Classify a payload by its header.
    ///
    /// Encrypted kinds only expose the header kind since their code bytes are ciphertext.
    pub fn from_payload(payload: &[u8]) -> Self {
        let Some(&first) = payload.first() else {
            return Self {
                kind: PacketKind::Unknown(0),
                code: None,
                sub_code: None,
            };
        };

        let kind = PacketKind::from_byte(first);
        let code_offset = match kind {
            PacketKind::C1 => Some(2),
            PacketKind::C2 => Some(3),
            _ => None,
        };

        let (code, sub_code) = match code_offset {
            Some(offset) => (
                payload.get(offset).copied(),
                payload.get(offset + 1).copied(),
            ),
            None => (None, None),
        };

        Self { kind, code, sub_code }
    }

    /// Same key with the sub-code dropped
    pub fn without_sub_code(&self) -> Self {
        Self {
            sub_code: None,
            ..*self
        }
    }
}

impl fmt::Display for ClassificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(code) = self.code {
            write!(f, ":{:02X}", code)?;
        }
        if let Some(sub) = self.sub_code {
            write!(f, ":{:02X}", sub)?;
        }
        Ok(())
    }
}

/// One chunk of relayed bytes. Immutable once created.
///
/// Timestamps are kept at microsecond precision, the resolution of capture files.
#[derive(Debug)]
pub struct PacketRecord {
    direction: Direction,
    timestamp: DateTime<Utc>,
    payload: Vec<u8>,
    key: OnceLock<ClassificationKey>,
}

impl PacketRecord {
    pub fn new(direction: Direction, timestamp: DateTime<Utc>, payload: Vec<u8>) -> Self {
        Self {
            direction,
            timestamp: timestamp.trunc_subsecs(6),
            payload,
            key: OnceLock::new(),
        }
    }

    /// Create a record stamped with the current time
    pub fn captured_now(direction: Direction, payload: Vec<u8>) -> Self {
        Self::new(direction, Utc::now(), payload)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Header classification, computed on first use
    pub fn classification(&self) -> ClassificationKey {
        *self
            .key
            .get_or_init(|| ClassificationKey::from_payload(&self.payload))
    }

    /// Length declared by the packet header, if the header carries one
    pub fn declared_size(&self) -> Option<usize> {
        match self.classification().kind {
            PacketKind::C1 | PacketKind::C3 => self.payload.get(1).map(|b| *b as usize),
            PacketKind::C2 | PacketKind::C4 => match (self.payload.get(1), self.payload.get(2)) {
                (Some(hi), Some(lo)) => Some(u16::from_be_bytes([*hi, *lo]) as usize),
                _ => None,
            },
            PacketKind::Unknown(_) => None,
        }
    }
}

impl PartialEq for PacketRecord {
    fn eq(&self, other: &Self) -> bool {
        self.direction == other.direction
            && self.timestamp == other.timestamp
            && self.payload == other.payload
    }
}

impl Eq for PacketRecord {}

/// A concise representation of a packet for list views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketSummary {
    /// Position in the owning connection
    pub index: usize,

    /// Capture time
    pub timestamp: DateTime<Utc>,

    /// Direction label (C->S or S->C)
    pub direction: String,

    /// Header kind (C1..C4 or raw hex)
    pub kind: String,

    /// Packet code, if readable
    pub code: Option<String>,

    /// Packet sub-code, if readable
    pub sub_code: Option<String>,

    /// Payload length in bytes
    pub length: usize,

    /// Payload as hex text
    pub data: String,
}

impl PacketSummary {
    pub fn from_record(index: usize, record: &PacketRecord) -> Self {
        let key = record.classification();
        Self {
            index,
            timestamp: record.timestamp(),
            direction: record.direction().label().to_string(),
            kind: key.kind.to_string(),
            code: key.code.map(|c| format!("{:02X}", c)),
            sub_code: key.sub_code.map(|c| format!("{:02X}", c)),
            length: record.len(),
            data: hex_string(record.payload()),
        }
    }
}

/// Full packet view including decoded information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketDetail {
    #[serde(flatten)]
    pub summary: PacketSummary,

    /// Size declared by the header, if any
    pub declared_size: Option<usize>,

    /// Human readable decode output
    pub info: String,
}
