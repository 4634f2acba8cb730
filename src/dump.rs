use std::io::{self, Write};
use termcolor::{Color, ColorSpec, WriteColor};

use crate::capture::connection::CapturedConnection;
use crate::capture::filter::Predicate;
use crate::decode::decoder::ProtocolDecoder;
use crate::models::packet::Direction;

fn direction_color(direction: Direction) -> Color {
    match direction {
        Direction::ClientToServer => Color::Green,
        Direction::ServerToClient => Color::Cyan,
    }
}

/// Print the packets of a connection that pass `predicate`, each followed by its decoded text.
///
/// Returns how many packets were printed.
pub fn dump<W: WriteColor>(
    out: &mut W,
    connection: &CapturedConnection,
    predicate: Option<&Predicate>,
    decoder: &ProtocolDecoder,
) -> io::Result<usize> {
    let version = connection.protocol_version();
    let mut shown = 0;

    for (index, record) in connection.snapshot().iter().enumerate() {
        if !predicate.map_or(true, |p| p.matches(record)) {
            continue;
        }

        out.set_color(ColorSpec::new().set_fg(Some(direction_color(record.direction()))).set_bold(true))?;
        write!(
            out,
            "#{:<6} {} {}",
            index,
            record.timestamp().format("%H:%M:%S%.3f"),
            record.direction()
        )?;
        out.reset()?;
        writeln!(out, " {} ({} bytes)", record.classification(), record.len())?;

        for line in decoder.extract_information(record, &version).lines() {
            writeln!(out, "    {}", line)?;
        }
        shown += 1;
    }

    out.flush()?;
    Ok(shown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::registry::RuleRegistry;
    use crate::models::packet::PacketRecord;
    use crate::models::version::ProtocolVersion;
    use std::sync::Arc;
    use termcolor::Buffer;

    #[test]
    fn test_dump_applies_filter() {
        let records = vec![
            PacketRecord::captured_now(Direction::ClientToServer, vec![0xC1, 0x04, 0xF3, 0x03]),
            PacketRecord::captured_now(Direction::ServerToClient, vec![0xC1, 0x04, 0xF4, 0x06]),
        ];
        let connection = CapturedConnection::saved("dump".to_string(), records, ProtocolVersion::default());
        let decoder = ProtocolDecoder::new(Arc::new(RuleRegistry::new()));
        let predicate = Predicate::compile("[Direction] IN 'S->C'").unwrap();

        let mut out = Buffer::no_color();
        let shown = dump(&mut out, &connection, predicate.as_ref(), &decoder).unwrap();
        assert_eq!(shown, 1);

        let text = String::from_utf8(out.into_inner()).unwrap();
        assert!(text.starts_with("#1 "));
        assert!(text.contains("S->C C1:F4:06 (4 bytes)"));
        assert!(text.contains("    Length: 4 bytes"));
        assert!(!text.contains("C->S"));
    }
}
