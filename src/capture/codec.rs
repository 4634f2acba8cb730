//! Capture file format.
//!
//! A capture file is a plain sequence of records with no global header:
//!
//! ```text
//! +-----------+----------------------+-------------+-----------------+
//! | direction | timestamp (i64 LE)   | length (u32 | payload         |
//! | u8 0 / 1  | microseconds, epoch  | LE)         | `length` bytes  |
//! +-----------+----------------------+-------------+-----------------+
//! ```
//!
//! The file must end exactly on a record boundary.

use chrono::{DateTime, Utc};
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::capture::connection::CapturedConnection;
use crate::models::packet::{Direction, PacketRecord};
use crate::models::version::ProtocolVersion;
use crate::utils::error::AppResult;

/// Records larger than this are treated as corruption
pub const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

const HEADER_LEN: usize = 1 + 8 + 4;

/// Capture file decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid direction marker {marker:#04x} at offset {offset}")]
    BadDirection { offset: u64, marker: u8 },

    #[error("timestamp {micros} out of range at offset {offset}")]
    BadTimestamp { offset: u64, micros: i64 },

    #[error("record at offset {offset} declares {len} bytes")]
    RecordTooLarge { offset: u64, len: u32 },

    #[error("truncated record at offset {offset}")]
    Truncated { offset: u64 },
}

/// Serialize records in capture order.
///
/// Nothing is written if any record exceeds [`MAX_RECORD_LEN`], since the
/// reader would reject the whole file.
pub fn write_records<W: Write>(writer: &mut W, records: &[Arc<PacketRecord>]) -> io::Result<()> {
    if let Some((index, record)) = records
        .iter()
        .enumerate()
        .find(|(_, r)| r.len() > MAX_RECORD_LEN as usize)
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "packet #{} is {} bytes, captures hold at most {}",
                index,
                record.len(),
                MAX_RECORD_LEN
            ),
        ));
    }

    for record in records {
        writer.write_all(&[record.direction().marker()])?;
        writer.write_all(&record.timestamp().timestamp_micros().to_le_bytes())?;
        writer.write_all(&(record.len() as u32).to_le_bytes())?;
        writer.write_all(record.payload())?;
    }
    Ok(())
}

/// Parse a whole capture stream; any malformed record fails the read
pub fn read_records<R: Read>(mut reader: R) -> Result<Vec<PacketRecord>, CodecError> {
    let mut records = Vec::new();
    let mut offset = 0u64;
    let mut header = [0u8; HEADER_LEN];

    loop {
        let got = read_full(&mut reader, &mut header)?;
        if got == 0 {
            break;
        }
        if got < HEADER_LEN {
            return Err(CodecError::Truncated { offset });
        }

        let direction = Direction::from_marker(header[0]).ok_or(CodecError::BadDirection {
            offset,
            marker: header[0],
        })?;

        let mut micros_bytes = [0u8; 8];
        micros_bytes.copy_from_slice(&header[1..9]);
        let micros = i64::from_le_bytes(micros_bytes);
        let timestamp =
            timestamp_from_micros(micros).ok_or(CodecError::BadTimestamp { offset, micros })?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[9..13]);
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_RECORD_LEN {
            return Err(CodecError::RecordTooLarge { offset, len });
        }

        let mut payload = vec![0u8; len as usize];
        if read_full(&mut reader, &mut payload)? < payload.len() {
            return Err(CodecError::Truncated { offset });
        }

        records.push(PacketRecord::new(direction, timestamp, payload));
        offset += (HEADER_LEN as u64) + len as u64;
    }

    Ok(records)
}

fn timestamp_from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Read until `buf` is full or the stream ends. Returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write a connection's packets to `path`.
///
/// The file is written next to its destination and renamed into place, so a
/// failed save never leaves a partial capture behind.
pub fn save(connection: &CapturedConnection, path: &Path) -> AppResult<usize> {
    let records = connection.snapshot();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write_records(&mut writer, &records)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    info!("Saved {} packets of {} to {}", records.len(), connection.name(), path.display());
    Ok(records.len())
}

/// Load a capture file as a saved connection named after the file.
///
/// Unreadable or malformed files yield a connection with no packets.
pub fn load(path: &Path, version: ProtocolVersion) -> Arc<CapturedConnection> {
    load_with_status(path, version).0
}

/// Like [`load`], also reporting whether the file was read successfully
pub fn load_with_status(path: &Path, version: ProtocolVersion) -> (Arc<CapturedConnection>, bool) {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let (records, loaded) = match try_load(path) {
        Ok(records) => {
            info!("Loaded {} packets from {}", records.len(), path.display());
            (records, true)
        }
        Err(e) => {
            warn!("Could not load capture {}: {}", path.display(), e);
            (Vec::new(), false)
        }
    };

    (CapturedConnection::saved(name, records, version), loaded)
}

fn try_load(path: &Path) -> Result<Vec<PacketRecord>, CodecError> {
    let file = File::open(path)?;
    read_records(BufReader::new(file))
}
