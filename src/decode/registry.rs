use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::models::packet::{ClassificationKey, PacketKind};
use crate::models::version::ProtocolVersion;
use crate::utils::hex::hex_string;

/// Decode rule loading and evaluation errors
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid rule file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule '{rule}' needs {needed} bytes, packet has {actual}")]
    PayloadTooShort {
        rule: String,
        needed: usize,
        actual: usize,
    },

    #[error("rule '{rule}': {message}")]
    InvalidField { rule: String, message: String },

    #[error("invalid classification key: {0}")]
    InvalidKey(String),

    #[error("invalid protocol version: {0}")]
    InvalidVersion(String),
}

/// Turns one class of packet into readable text
pub trait DecodeRule: Send + Sync {
    fn name(&self) -> &str;

    fn decode(&self, payload: &[u8]) -> Result<String, RuleError>;
}

/// Source of decode rules, keyed by protocol version and packet classification
pub trait DecodeRuleProvider: Send + Sync {
    fn resolve_decoder(
        &self,
        version: &ProtocolVersion,
        key: &ClassificationKey,
    ) -> Option<Arc<dyn DecodeRule>>;
}

struct FnRule<F> {
    name: String,
    decode: F,
}

impl<F> DecodeRule for FnRule<F>
where
    F: Fn(&[u8]) -> Result<String, RuleError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, payload: &[u8]) -> Result<String, RuleError> {
        (self.decode)(payload)
    }
}

/// Explicit rule table built at startup
#[derive(Default)]
pub struct RuleRegistry {
    rules: HashMap<(ProtocolVersion, ClassificationKey), Arc<dyn DecodeRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, replacing any previous rule for the same version and key
    pub fn register(
        &mut self,
        version: ProtocolVersion,
        key: ClassificationKey,
        rule: Arc<dyn DecodeRule>,
    ) {
        debug!("Registering decode rule '{}' for {} {}", rule.name(), version, key);
        self.rules.insert((version, key), rule);
    }

    pub fn register_fn<F>(
        &mut self,
        version: ProtocolVersion,
        key: ClassificationKey,
        name: &str,
        decode: F,
    ) where
        F: Fn(&[u8]) -> Result<String, RuleError> + Send + Sync + 'static,
    {
        self.register(
            version,
            key,
            Arc::new(FnRule {
                name: name.to_string(),
                decode,
            }),
        );
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Build a registry from a JSON rule table
    pub fn from_json(text: &str) -> Result<Self, RuleError> {
        let file: RuleFile = serde_json::from_str(text)?;
        let mut registry = Self::new();
        for spec in file.rules {
            let (version, key, rule) = spec.into_rule()?;
            registry.register(version, key, Arc::new(rule));
        }
        Ok(registry)
    }

    pub fn load_file(path: &Path) -> Result<Self, RuleError> {
        let text = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&text)?;
        info!("Loaded {} decode rules from {}", registry.len(), path.display());
        Ok(registry)
    }
}

impl DecodeRuleProvider for RuleRegistry {
    /// Exact key first, then the same code with any sub-code
    fn resolve_decoder(
        &self,
        version: &ProtocolVersion,
        key: &ClassificationKey,
    ) -> Option<Arc<dyn DecodeRule>> {
        let lookup = |k: ClassificationKey| self.rules.get(&(version.clone(), k)).cloned();

        lookup(*key).or_else(|| {
            if key.sub_code.is_some() {
                lookup(key.without_sub_code())
            } else {
                None
            }
        })
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    version: String,
    kind: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    sub_code: Option<String>,
    name: String,
    #[serde(default)]
    fields: Vec<FieldSpec>,
}

impl RuleSpec {
    fn into_rule(self) -> Result<(ProtocolVersion, ClassificationKey, LayoutRule), RuleError> {
        let version: ProtocolVersion = self.version.parse().map_err(RuleError::InvalidVersion)?;

        let kind = match self.kind.to_ascii_uppercase().as_str() {
            "C1" => PacketKind::C1,
            "C2" => PacketKind::C2,
            "C3" => PacketKind::C3,
            "C4" => PacketKind::C4,
            other => PacketKind::from_byte(parse_hex_byte(other)?),
        };
        let key = ClassificationKey {
            kind,
            code: self.code.as_deref().map(parse_hex_byte).transpose()?,
            sub_code: self.sub_code.as_deref().map(parse_hex_byte).transpose()?,
        };
        if key.code.is_none() && key.sub_code.is_some() {
            return Err(RuleError::InvalidKey(format!("{}: sub_code without code", self.name)));
        }

        for field in &self.fields {
            if field.field_type.width(field.length).is_none() {
                return Err(RuleError::InvalidField {
                    rule: self.name.clone(),
                    message: format!("field '{}' needs a length", field.name),
                });
            }
        }

        let rule = LayoutRule {
            name: self.name,
            fields: self.fields,
        };
        Ok((version, key, rule))
    }
}

fn parse_hex_byte(text: &str) -> Result<u8, RuleError> {
    let digits = text.trim().trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|_| RuleError::InvalidKey(text.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    U8,
    U16le,
    U16be,
    U32le,
    U32be,
    Ascii,
    Bytes,
}

impl FieldType {
    fn width(self, length: Option<usize>) -> Option<usize> {
        match self {
            FieldType::U8 => Some(1),
            FieldType::U16le | FieldType::U16be => Some(2),
            FieldType::U32le | FieldType::U32be => Some(4),
            FieldType::Ascii | FieldType::Bytes => length,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub offset: usize,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub length: Option<usize>,
}

/// Rule described by a list of fixed-offset fields
#[derive(Debug, Clone)]
pub struct LayoutRule {
    name: String,
    fields: Vec<FieldSpec>,
}

impl DecodeRule for LayoutRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, payload: &[u8]) -> Result<String, RuleError> {
        let mut out = self.name.clone();

        for field in &self.fields {
            let width = field.field_type.width(field.length).unwrap_or(0);
            let bytes = field
                .offset
                .checked_add(width)
                .and_then(|end| payload.get(field.offset..end))
                .ok_or_else(|| RuleError::PayloadTooShort {
                    rule: self.name.clone(),
                    needed: field.offset.saturating_add(width),
                    actual: payload.len(),
                })?;

            let value = match field.field_type {
                FieldType::U8 => number(bytes[0] as u32),
                FieldType::U16le => number(u16::from_le_bytes([bytes[0], bytes[1]]) as u32),
                FieldType::U16be => number(u16::from_be_bytes([bytes[0], bytes[1]]) as u32),
                FieldType::U32le => number(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
                FieldType::U32be => number(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
                FieldType::Ascii => {
                    // fixed-size game strings are NUL padded
                    let text = bytes.split(|b| *b == 0).next().unwrap_or_default();
                    format!("\"{}\"", String::from_utf8_lossy(text))
                }
                FieldType::Bytes => hex_string(bytes),
            };

            out.push_str(&format!("\n  {} = {}", field.name, value));
        }

        Ok(out)
    }
}

fn number(value: u32) -> String {
    format!("{} (0x{:X})", value, value)
}
