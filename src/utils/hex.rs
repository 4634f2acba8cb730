use std::fmt::Write;

/// Space separated upper-case hex, e.g. `C1 04 F3 00`
pub fn hex_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// Offset / hex / ascii dump, 16 bytes per line, in the same upper case as [`hex_string`].
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();

    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04X}:  ", i * 16);

        for b in chunk {
            let _ = write!(out, "{:02X} ", b);
        }

        // align
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }

        out.push_str(" |");
        for b in chunk {
            out.push(if b.is_ascii_graphic() { *b as char } else { '.' });
        }
        out.push_str("|\n");
    }

    out
}

/// Parse hex text, ignoring whitespace. Returns None on odd length or bad digits.
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return None;
    }

    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0xC1, 0x04, 0x0A]), "C1 04 0A");
        assert_eq!(hex_string(&[]), "");
    }

    #[test]
    fn test_hex_dump_line_layout() {
        let dump = hex_dump(b"AB");
        assert!(dump.starts_with("0000:  41 42 "));
        assert!(dump.ends_with("|AB|\n"));
    }

    #[test]
    fn test_hex_dump_is_upper_case() {
        let data: Vec<u8> = (0xE0..=0xFF).chain(0x00..0x0B).collect();
        let dump = hex_dump(&data);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("0000:  E0 E1 E2 E3 E4 E5 E6 E7 E8 E9 EA EB EC ED EE EF "));
        assert!(lines[1].starts_with("0010:  F0 F1"));
        assert!(lines[2].starts_with("0020:  00 01 02 03 04 05 06 07 08 09 0A "));

        // each hex column matches hex_string
        let hex_part = &lines[0][7..7 + 16 * 3 - 1];
        assert_eq!(hex_part, hex_string(&data[..16]));
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("c1 04 f3 00"), Some(vec![0xC1, 0x04, 0xF3, 0x00]));
        assert_eq!(parse_hex("c1 0"), None);
        assert_eq!(parse_hex("zz"), None);
    }
}
