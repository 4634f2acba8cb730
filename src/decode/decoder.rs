use log::debug;
use std::fmt::Write;
use std::sync::Arc;

use crate::decode::registry::DecodeRuleProvider;
use crate::models::packet::{PacketDetail, PacketRecord, PacketSummary};
use crate::models::version::ProtocolVersion;
use crate::utils::hex::hex_dump;

/// Produces readable text for packets, dispatching to version-specific rules.
///
/// Holds no per-packet state; the version is passed on every call.
#[derive(Clone)]
pub struct ProtocolDecoder {
    provider: Arc<dyn DecodeRuleProvider>,
}

impl ProtocolDecoder {
    pub fn new(provider: Arc<dyn DecodeRuleProvider>) -> Self {
        Self { provider }
    }

    /// Decode with the matching rule, or describe the raw bytes when there is none
    pub fn extract_information(&self, record: &PacketRecord, version: &ProtocolVersion) -> String {
        let key = record.classification();

        let Some(rule) = self.provider.resolve_decoder(version, &key) else {
            return generic_summary(record);
        };

        match rule.decode(record.payload()) {
            Ok(text) => text,
            Err(e) => {
                debug!("Rule '{}' failed on {} packet: {}", rule.name(), key, e);
                format!("{}\n[{} failed: {}]", generic_summary(record), rule.name(), e)
            }
        }
    }

    pub fn detail(&self, index: usize, record: &PacketRecord, version: &ProtocolVersion) -> PacketDetail {
        PacketDetail {
            summary: PacketSummary::from_record(index, record),
            declared_size: record.declared_size(),
            info: self.extract_information(record, version),
        }
    }
}

/// Direction, length, header fields and a hex dump
pub fn generic_summary(record: &PacketRecord) -> String {
    let key = record.classification();
    let mut out = String::new();

    let _ = writeln!(out, "Direction: {}", record.direction());
    let _ = writeln!(out, "Length: {} bytes", record.len());

    let _ = write!(out, "Kind: {}", key.kind);
    if let Some(size) = record.declared_size() {
        let _ = write!(out, " (declared size {})", size);
    }
    if key.kind.is_encrypted() {
        out.push_str(" encrypted");
    }
    out.push('\n');

    if let Some(code) = key.code {
        let _ = write!(out, "Code: {:02X}", code);
        if let Some(sub) = key.sub_code {
            let _ = write!(out, "  Sub-code: {:02X}", sub);
        }
        out.push('\n');
    }

    out.push_str(&hex_dump(record.payload()));
    out
}
