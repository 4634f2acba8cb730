//! Tabular filter expressions.
//!
//! A filter is a conjunction of clauses of the form
//! `[Column] IN 'v1', 'v2', ...`, joined by `AND`. Keywords are
//! case-insensitive. A value that parses as a number compares for equality
//! against the column's numeric view; any other value is a case-sensitive
//! substring test against the column's text view.
//!
//! ```text
//! [Direction] IN 'C->S' AND [Code] IN '243', 'F3'
//! ```

use std::sync::Arc;
use thiserror::Error;

use crate::capture::connection::CapturedConnection;
use crate::models::filter::FilterColumn;
use crate::models::packet::PacketRecord;

/// Filter compilation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("clause '{0}' is missing the IN keyword")]
    MissingIn(String),

    #[error("clause '{0}' has no column name")]
    MissingColumn(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' has an empty value list")]
    EmptyValues(String),

    #[error("unterminated quote in '{0}'")]
    UnterminatedQuote(String),
}

/// One accepted value of a clause
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTest {
    /// Numeric equality against the column's numeric view
    Equals(f64),

    /// Substring test against the column's text view
    Contains(String),
}

impl ValueTest {
    fn parse(raw: &str) -> Self {
        let value = strip_quotes(raw.trim());
        match value.parse::<f64>() {
            Ok(n) if n.is_finite() => ValueTest::Equals(n),
            _ => ValueTest::Contains(value.to_string()),
        }
    }

    fn matches(&self, column: FilterColumn, record: &PacketRecord) -> bool {
        match self {
            ValueTest::Equals(expected) => column.number(record).map_or(false, |n| n == *expected),
            ValueTest::Contains(needle) => column
                .text(record)
                .map_or(false, |text| text.contains(needle.as_str())),
        }
    }
}

/// `[Column] IN ...`: true when any value matches
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: FilterColumn,
    pub values: Vec<ValueTest>,
}

impl Clause {
    pub fn matches(&self, record: &PacketRecord) -> bool {
        self.values.iter().any(|v| v.matches(self.column, record))
    }
}

/// Compiled filter: true when every clause matches
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Compile filter text. Empty text means "no filter" and yields `Ok(None)`.
    pub fn compile(text: &str) -> Result<Option<Predicate>, FilterError> {
        let cleaned: String = text.chars().filter(|c| *c != '(' && *c != ')').collect();
        if cleaned.trim().is_empty() {
            return Ok(None);
        }

        let clauses = split_keyword(&cleaned, "AND")?
            .into_iter()
            .map(compile_clause)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Predicate { clauses }))
    }

    pub fn matches(&self, record: &PacketRecord) -> bool {
        self.clauses.iter().all(|c| c.matches(record))
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

/// Compile text that may be absent
pub fn compile_optional(text: Option<&str>) -> Result<Option<Predicate>, FilterError> {
    match text {
        Some(text) => Predicate::compile(text),
        None => Ok(None),
    }
}

fn compile_clause(clause: &str) -> Result<Clause, FilterError> {
    let parts = split_keyword(clause, "IN")?;
    if parts.len() < 2 {
        return Err(FilterError::MissingIn(clause.trim().to_string()));
    }

    // Everything after the first IN is the value list
    let column_part = parts[0];
    let in_pos = column_part.len();
    let values_part = clause[in_pos..]
        .trim_start()
        .get(2..)
        .unwrap_or_default();

    let name = column_part
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    if name.is_empty() {
        return Err(FilterError::MissingColumn(clause.trim().to_string()));
    }
    let column =
        FilterColumn::from_name(name).ok_or_else(|| FilterError::UnknownColumn(name.to_string()))?;

    let values: Vec<ValueTest> = split_outside_quotes(values_part, ',')?
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .map(ValueTest::parse)
        .collect();
    if values.is_empty() {
        return Err(FilterError::EmptyValues(column.name().to_string()));
    }

    Ok(Clause { column, values })
}

fn strip_quotes(value: &str) -> &str {
    const QUOTES: &[char] = &['\'', '"'];
    let value = value.strip_prefix(QUOTES).unwrap_or(value);
    value.strip_suffix(QUOTES).unwrap_or(value)
}

/// Split on a whitespace-delimited keyword that is outside quotes.
fn split_keyword<'a>(text: &'a str, keyword: &str) -> Result<Vec<&'a str>, FilterError> {
    let bytes = text.as_bytes();
    let klen = keyword.len();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None => {
                let before_ok = i == 0 || is_keyword_boundary(bytes[i - 1]) || bytes[i - 1] == b']';
                let end = i + klen;
                let after_ok = end == bytes.len() || (end < bytes.len() && is_keyword_boundary(bytes[end]));
                if before_ok && after_ok && bytes[i..end].eq_ignore_ascii_case(keyword.as_bytes()) {
                    parts.push(&text[start..i]);
                    start = end;
                    i = end;
                    continue;
                }
            }
        }
        i += 1;
    }

    if quote.is_some() {
        return Err(FilterError::UnterminatedQuote(text.trim().to_string()));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// Whitespace or a quote can sit right next to a keyword
fn is_keyword_boundary(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'\'' || b == b'"'
}

fn split_outside_quotes(text: &str, sep: char) -> Result<Vec<&str>, FilterError> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == sep => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }

    if quote.is_some() {
        return Err(FilterError::UnterminatedQuote(text.trim().to_string()));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// Filtered subset of a connection's packets, kept current incrementally.
///
/// The view remembers how far into the source sequence it has looked; each
/// sync evaluates only records past that point, in arrival order.
#[derive(Debug, Default)]
pub struct FilteredView {
    filter_text: Option<String>,
    predicate: Option<Predicate>,
    packets: Vec<(usize, Arc<PacketRecord>)>,
    cursor: usize,
}

impl FilteredView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the filter and rebuild the view.
    ///
    /// On a compile error the previous filter and its packets stay in place.
    pub fn set_filter(
        &mut self,
        text: &str,
        connection: &CapturedConnection,
    ) -> Result<(), FilterError> {
        let predicate = Predicate::compile(text)?;

        self.filter_text = predicate.as_ref().map(|_| text.trim().to_string());
        self.predicate = predicate;
        self.packets.clear();
        self.cursor = 0;
        self.sync(connection);
        Ok(())
    }

    /// Evaluate records appended since the last sync. Returns how many were evaluated.
    pub fn sync(&mut self, connection: &CapturedConnection) -> usize {
        let fresh = connection.records_from(self.cursor);
        let count = fresh.len();
        for record in fresh {
            self.push(record);
        }
        count
    }

    /// Evaluate one newly appended record
    pub fn push(&mut self, record: Arc<PacketRecord>) -> bool {
        let index = self.cursor;
        self.cursor += 1;

        let accepted = self.accepts(&record);
        if accepted {
            self.packets.push((index, record));
        }
        accepted
    }

    pub fn accepts(&self, record: &PacketRecord) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(record))
    }

    pub fn filter_text(&self) -> Option<&str> {
        self.filter_text.as_deref()
    }

    /// Accepted packets with their index in the source sequence
    pub fn packets(&self) -> &[(usize, Arc<PacketRecord>)] {
        &self.packets
    }

    /// Number of source records evaluated so far
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::packet::Direction;

    fn record(direction: Direction, payload: &[u8]) -> PacketRecord {
        PacketRecord::captured_now(direction, payload.to_vec())
    }

    #[test]
    fn test_empty_filter_is_pass_through() {
        assert_eq!(Predicate::compile("").unwrap(), None);
        assert_eq!(Predicate::compile("   ").unwrap(), None);
        assert_eq!(Predicate::compile("()").unwrap(), None);
        assert_eq!(compile_optional(None).unwrap(), None);
    }

    #[test]
    fn test_numeric_or_substring() {
        let p = Predicate::compile("[Type] IN '5', 'abc'").unwrap().unwrap();
        assert_eq!(
            p.clauses()[0].values,
            vec![ValueTest::Equals(5.0), ValueTest::Contains("abc".to_string())]
        );

        assert!(p.matches(&record(Direction::ClientToServer, &[0x05, 0x00])));
        assert!(!p.matches(&record(Direction::ClientToServer, &[0xC1, 0x03, 0x05])));
    }

    #[test]
    fn test_substring_is_case_sensitive() {
        let p = Predicate::compile("[Data] IN 'F3 03'").unwrap().unwrap();
        assert!(p.matches(&record(Direction::ClientToServer, &[0xC1, 0x04, 0xF3, 0x03])));

        let p = Predicate::compile("[Data] IN 'f3 03'").unwrap().unwrap();
        assert!(!p.matches(&record(Direction::ClientToServer, &[0xC1, 0x04, 0xF3, 0x03])));
    }

    #[test]
    fn test_and_requires_both_clauses() {
        let p = Predicate::compile("([Direction] IN 'C->S') and ([Code] IN '243', '0E')")
            .unwrap()
            .unwrap();
        assert_eq!(p.clauses().len(), 2);

        assert!(p.matches(&record(Direction::ClientToServer, &[0xC1, 0x04, 0xF3, 0x00])));
        assert!(p.matches(&record(Direction::ClientToServer, &[0xC1, 0x04, 0x0E, 0x00])));
        assert!(!p.matches(&record(Direction::ServerToClient, &[0xC1, 0x04, 0xF3, 0x00])));
        assert!(!p.matches(&record(Direction::ClientToServer, &[0xC1, 0x04, 0x11, 0x00])));
    }

    #[test]
    fn test_keywords_inside_quotes_are_values() {
        let p = Predicate::compile("[Data] IN 'a AND b', 'x IN y'").unwrap().unwrap();
        assert_eq!(p.clauses().len(), 1);
        assert_eq!(p.clauses()[0].values.len(), 2);
    }

    #[test]
    fn test_null_fields_never_match() {
        let p = Predicate::compile("[SubCode] IN '0', 'F'").unwrap().unwrap();
        // C3 bodies are encrypted so there is no sub-code
        assert!(!p.matches(&record(Direction::ClientToServer, &[0xC3, 0x04, 0x00, 0x0F])));
    }

    #[test]
    fn test_size_column() {
        let p = Predicate::compile("[size] in 4").unwrap().unwrap();
        assert!(p.matches(&record(Direction::ClientToServer, &[1, 2, 3, 4])));
        assert!(!p.matches(&record(Direction::ClientToServer, &[1, 2, 3])));
    }

    #[test]
    fn test_invalid_filters() {
        assert_eq!(
            Predicate::compile("[Code] '1'"),
            Err(FilterError::MissingIn("[Code] '1'".to_string()))
        );
        assert_eq!(
            Predicate::compile("[Nope] IN '1'"),
            Err(FilterError::UnknownColumn("Nope".to_string()))
        );
        assert_eq!(
            Predicate::compile("[Code] IN "),
            Err(FilterError::EmptyValues("Code".to_string()))
        );
        assert!(matches!(
            Predicate::compile("[] IN '1'"),
            Err(FilterError::MissingColumn(_))
        ));
        assert!(matches!(
            Predicate::compile("[Data] IN 'abc"),
            Err(FilterError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn test_and_directly_after_quote_splits() {
        let p = Predicate::compile("[Direction] IN 'C->S'AND [Code] IN 'F3'").unwrap().unwrap();
        assert_eq!(p.clauses().len(), 2);
        assert_eq!(p.clauses()[0].column, FilterColumn::Direction);
        assert_eq!(p.clauses()[0].values, vec![ValueTest::Contains("C->S".to_string())]);
        assert_eq!(p.clauses()[1].column, FilterColumn::Code);

        let p = Predicate::compile("[Code] IN'F3'and [Size] IN '4'").unwrap().unwrap();
        assert_eq!(p.clauses().len(), 2);
        assert!(p.matches(&record(Direction::ClientToServer, &[0xC1, 0x04, 0xF3, 0x00])));
    }

    fn live_with(payloads: &[(Direction, &[u8])]) -> Arc<CapturedConnection> {
        use crate::models::event::EventBus;
        use crate::models::version::ProtocolVersion;

        let conn = CapturedConnection::live("view".to_string(), ProtocolVersion::default(), EventBus::default());
        for (direction, payload) in payloads {
            conn.append(*direction, payload.to_vec()).unwrap();
        }
        conn
    }

    #[test]
    fn test_view_rejected_filter_keeps_state() {
        let conn = live_with(&[
            (Direction::ClientToServer, &[0xC1, 0x03, 0x0E]),
            (Direction::ServerToClient, &[0xC2, 0x00, 0x04, 0x10]),
        ]);

        let mut view = FilteredView::new();
        view.set_filter("[Type] IN 'C2'", &conn).unwrap();
        assert_eq!(view.packets().len(), 1);
        assert_eq!(view.packets()[0].0, 1);

        let err = view.set_filter("[Type] 'C1'", &conn).unwrap_err();
        assert!(matches!(err, FilterError::MissingIn(_)));
        assert_eq!(view.filter_text(), Some("[Type] IN 'C2'"));
        assert_eq!(view.packets().len(), 1);
        assert_eq!(view.cursor(), 2);

        // the kept predicate still applies to new records
        conn.append(Direction::ClientToServer, vec![0xC1, 0x03, 0x0F]).unwrap();
        conn.append(Direction::ServerToClient, vec![0xC2, 0x00, 0x04, 0x11]).unwrap();
        assert_eq!(view.sync(&conn), 2);
        let indexes: Vec<usize> = view.packets().iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 3]);
    }

    #[test]
    fn test_view_sync_only_evaluates_new_records() {
        let conn = live_with(&[
            (Direction::ClientToServer, &[1]),
            (Direction::ServerToClient, &[2]),
        ]);

        let mut view = FilteredView::new();
        view.set_filter("[Direction] IN 'S->C'", &conn).unwrap();
        assert_eq!(view.cursor(), 2);
        assert_eq!(view.sync(&conn), 0);

        for i in 0..6u8 {
            let direction = if i % 2 == 0 {
                Direction::ClientToServer
            } else {
                Direction::ServerToClient
            };
            conn.append(direction, vec![i]).unwrap();
        }

        assert_eq!(view.sync(&conn), 6);
        assert_eq!(view.cursor(), 8);
        assert_eq!(view.sync(&conn), 0);

        // arrival order, earlier matches untouched
        let indexes: Vec<usize> = view.packets().iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 3, 5, 7]);
        assert!(Arc::ptr_eq(&view.packets()[0].1, &conn.get(1).unwrap()));
    }
}
