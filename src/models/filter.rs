use serde::{Deserialize, Serialize};

use crate::models::packet::PacketRecord;
use crate::utils::hex::hex_string;

/// Columns a filter clause can address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterColumn {
    /// 0 / 1, text `C->S` / `S->C`
    Direction,

    /// Header byte, text `C1`..`C4` or two-digit hex
    Type,

    /// Packet code
    Code,

    /// Packet sub-code
    SubCode,

    /// Payload length
    Size,

    /// Capture time, text `HH:MM:SS.mmm`
    Time,

    /// Payload as hex text
    Data,
}

impl FilterColumn {
    pub const ALL: [FilterColumn; 7] = [
        FilterColumn::Direction,
        FilterColumn::Type,
        FilterColumn::Code,
        FilterColumn::SubCode,
        FilterColumn::Size,
        FilterColumn::Time,
        FilterColumn::Data,
    ];

    /// Look up a column by its (case-insensitive) name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterColumn::Direction => "Direction",
            FilterColumn::Type => "Type",
            FilterColumn::Code => "Code",
            FilterColumn::SubCode => "SubCode",
            FilterColumn::Size => "Size",
            FilterColumn::Time => "Time",
            FilterColumn::Data => "Data",
        }
    }

    /// Numeric view of the column, None when the record has no value for it
    pub fn number(self, record: &PacketRecord) -> Option<f64> {
        let key = record.classification();
        match self {
            FilterColumn::Direction => Some(record.direction().marker() as f64),
            FilterColumn::Type => Some(key.kind.byte() as f64),
            FilterColumn::Code => key.code.map(|c| c as f64),
            FilterColumn::SubCode => key.sub_code.map(|c| c as f64),
            FilterColumn::Size => Some(record.len() as f64),
            FilterColumn::Time => Some(record.timestamp().timestamp_micros() as f64),
            FilterColumn::Data => None,
        }
    }

    /// Text view of the column as it appears in packet lists
    pub fn text(self, record: &PacketRecord) -> Option<String> {
        let key = record.classification();
        match self {
            FilterColumn::Direction => Some(record.direction().label().to_string()),
            FilterColumn::Type => Some(key.kind.to_string()),
            FilterColumn::Code => key.code.map(|c| format!("{:02X}", c)),
            FilterColumn::SubCode => key.sub_code.map(|c| format!("{:02X}", c)),
            FilterColumn::Size => Some(record.len().to_string()),
            FilterColumn::Time => Some(record.timestamp().format("%H:%M:%S%.3f").to_string()),
            FilterColumn::Data => Some(hex_string(record.payload())),
        }
    }
}
