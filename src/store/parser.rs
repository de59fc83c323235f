//! Row reconstruction for pipe-delimited, unaligned query output.
//!
//! Free-text columns may contain newlines and `|`, so neither lines nor
//! separators mark row boundaries on their own. A row is complete once the
//! last `k` separator-delimited pieces of the buffered text match the
//! expected [`FieldShape`]; only the fixed leading columns are split off
//! the front, and whatever text remains stays one field.

use tracing::warn;

use crate::error::ParseError;

/// Structural pattern of one trailing column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `{...}` or `[...]`: a text array or a vector literal.
    Array,
    /// Optionally signed run of ASCII digits.
    Integer,
    Float,
    /// A bare token such as an enum tag: ASCII alphanumerics, `-` and `_`.
    Word,
}

impl FieldKind {
    /// Whether `field` is an instance of this kind. The empty string (SQL NULL
    /// in unaligned output) is an instance of every kind.
    pub fn matches(self, field: &str) -> bool {
        if field.is_empty() {
            return true;
        }
        match self {
            FieldKind::Array => {
                field.len() >= 2
                    && ((field.starts_with('{') && field.ends_with('}'))
                        || (field.starts_with('[') && field.ends_with(']')))
            }
            FieldKind::Integer => {
                let digits = field.strip_prefix('-').unwrap_or(field);
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            }
            FieldKind::Float => field.parse::<f64>().is_ok(),
            FieldKind::Word => field
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
        }
    }
}

/// Column layout of a row: `leading_fixed` unambiguous columns, one free-text
/// remainder, then the `trailing` anchored columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldShape {
    leading_fixed: usize,
    trailing: Vec<FieldKind>,
}

impl FieldShape {
    pub fn new(leading_fixed: usize, trailing: Vec<FieldKind>) -> Self {
        Self {
            leading_fixed,
            trailing,
        }
    }

    pub fn trailing(&self) -> &[FieldKind] {
        &self.trailing
    }

    pub fn leading_fixed(&self) -> usize {
        self.leading_fixed
    }

    /// Fields in a well-formed record.
    pub fn field_count(&self) -> usize {
        self.leading_fixed + 1 + self.trailing.len()
    }

    /// Split `buffer` into fields if its trailing pieces validate.
    fn split_complete(&self, buffer: &str) -> Option<Vec<String>> {
        let k = self.trailing.len();
        let mut pieces: Vec<&str> = buffer.rsplitn(k + 1, '|').collect();
        if pieces.len() != k + 1 {
            return None;
        }
        pieces.reverse();

        let (prefix, trailing) = pieces.split_first()?;
        let valid = trailing
            .iter()
            .zip(&self.trailing)
            .all(|(field, kind)| kind.matches(field));
        valid.then(|| self.assemble(prefix, trailing))
    }

    /// Split without validating; used for a buffer left over at end of input.
    fn split_best_effort(&self, buffer: &str) -> Vec<String> {
        let mut pieces: Vec<&str> = buffer.rsplitn(self.trailing.len() + 1, '|').collect();
        pieces.reverse();
        match pieces.split_first() {
            Some((prefix, trailing)) => self.assemble(prefix, trailing),
            None => vec![buffer.to_string()],
        }
    }

    fn assemble(&self, prefix: &str, trailing: &[&str]) -> Vec<String> {
        let mut fields: Vec<String> = prefix
            .splitn(self.leading_fixed + 1, '|')
            .map(str::to_string)
            .collect();
        fields.extend(trailing.iter().map(|s| s.to_string()));
        fields
    }
}

/// One reconstructed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
    terminated: bool,
}

impl Record {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// False for a best-effort record flushed at end of input.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }

    /// The fields, provided there are exactly `expected` of them.
    pub fn expect_fields(&self, expected: usize) -> Result<&[String], ParseError> {
        if self.fields.len() == expected {
            Ok(&self.fields)
        } else {
            Err(ParseError::FieldCount {
                expected,
                found: self.fields.len(),
            })
        }
    }

    /// Strict check: right field count and a validated boundary.
    pub fn validate(&self, shape: &FieldShape) -> Result<(), ParseError> {
        self.expect_fields(shape.field_count())?;
        if self.terminated {
            Ok(())
        } else {
            Err(ParseError::Unterminated)
        }
    }
}

#[derive(Debug)]
enum ParserState {
    Idle,
    /// Lines joined with `\n` so far, and how many there are.
    Accumulating { buffer: String, lines: usize },
}

/// Streaming form of [`parse_rows`]: feed lines, collect records as they close.
#[derive(Debug)]
pub struct RecordParser {
    shape: FieldShape,
    state: ParserState,
}

impl RecordParser {
    pub fn new(shape: FieldShape) -> Self {
        Self {
            shape,
            state: ParserState::Idle,
        }
    }

    /// Append a line; returns the record it completes, if any.
    pub fn push_line(&mut self, line: &str) -> Option<Record> {
        let (buffer, lines) = match std::mem::replace(&mut self.state, ParserState::Idle) {
            ParserState::Idle if line.trim().is_empty() => return None,
            ParserState::Idle => (line.to_string(), 1),
            ParserState::Accumulating { mut buffer, lines } => {
                buffer.push('\n');
                buffer.push_str(line);
                (buffer, lines + 1)
            }
        };

        match self.shape.split_complete(&buffer) {
            Some(fields) => Some(Record {
                fields,
                terminated: true,
            }),
            None => {
                self.state = ParserState::Accumulating { buffer, lines };
                None
            }
        }
    }

    /// Flush whatever is still buffered as a best-effort record.
    pub fn finish(self) -> Option<Record> {
        let ParserState::Accumulating { buffer, lines } = self.state else {
            return None;
        };
        warn!(
            lines,
            expected_fields = self.shape.field_count(),
            "{}; emitting best-effort record",
            ParseError::Unterminated
        );
        Some(Record {
            fields: self.shape.split_best_effort(&buffer),
            terminated: false,
        })
    }
}

/// Reconstruct records from raw output lines.
pub fn parse_rows<I, S>(lines: I, shape: &FieldShape) -> Vec<Record>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = RecordParser::new(shape.clone());
    let mut records = Vec::new();
    for line in lines {
        if let Some(record) = parser.push_line(line.as_ref()) {
            records.push(record);
        }
    }
    records.extend(parser.finish());
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_shape() -> FieldShape {
        FieldShape::new(
            2,
            vec![FieldKind::Integer, FieldKind::Integer, FieldKind::Array],
        )
    }

    #[test]
    fn test_field_kinds() {
        assert!(FieldKind::Array.matches("{a,b}"));
        assert!(FieldKind::Array.matches("[0.1,0.2]"));
        assert!(FieldKind::Array.matches("{}"));
        assert!(!FieldKind::Array.matches("{"));
        assert!(!FieldKind::Array.matches("text"));
        assert!(FieldKind::Integer.matches("42"));
        assert!(FieldKind::Integer.matches("-7"));
        assert!(!FieldKind::Integer.matches("-"));
        assert!(!FieldKind::Integer.matches("4.2"));
        assert!(FieldKind::Float.matches("4.2"));
        assert!(!FieldKind::Float.matches("four"));
        assert!(FieldKind::Word.matches("append-only"));
        assert!(!FieldKind::Word.matches("two words"));
        for kind in [
            FieldKind::Array,
            FieldKind::Integer,
            FieldKind::Float,
            FieldKind::Word,
        ] {
            assert!(kind.matches(""));
        }
    }

    #[test]
    fn test_long_multiline_field_stays_one_record() {
        let body: Vec<String> = (0..20_000)
            .map(|i| format!("line {} | keeps its pipe", i))
            .collect();
        let mut lines = vec![format!("c1|doc|{}", body[0])];
        lines.extend(body[1..].iter().cloned());
        let last = lines.pop().unwrap();
        lines.push(format!("{}|0|7|[1,2]", last));
        lines.push("c2|doc|next|1|1|[3,4]".to_string());

        let records = parse_rows(&lines, &chunk_shape());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].field(2), Some(body.join("\n").as_str()));
        assert_eq!(records[0].field(3), Some("0"));
        assert_eq!(records[1].field(0), Some("c2"));
        assert!(records.iter().all(Record::is_terminated));
    }

    #[test]
    fn test_single_line_rows() {
        let lines = ["c1|doc|hello world|0|3|[1,2]", "c2|doc|second|1|2|[3,4]"];
        let records = parse_rows(lines, &chunk_shape());
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].fields(),
            &["c1", "doc", "hello world", "0", "3", "[1,2]"]
        );
        assert!(records.iter().all(Record::is_terminated));
    }

    #[test]
    fn test_multiline_text_with_pipes() {
        let lines = [
            "c1|doc|a table:",
            "| col | col |",
            "",
            "end of text|0|12|[0.5]",
            "c2|doc|next|1|1|",
        ];
        let records = parse_rows(lines, &chunk_shape());
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].field(2),
            Some("a table:\n| col | col |\n\nend of text")
        );
        assert_eq!(records[0].len(), 6);
        assert_eq!(records[1].field(5), Some(""));
    }

    #[test]
    fn test_leading_split_stops_at_fixed_fields() {
        let shape = FieldShape::new(1, vec![FieldKind::Integer]);
        let records = parse_rows(["id|title|with|pipes|9"], &shape);
        assert_eq!(records[0].fields(), &["id", "title|with|pipes", "9"]);
        assert!(records[0].validate(&shape).is_ok());
    }

    #[test]
    fn test_blank_lines_between_records_are_skipped() {
        let lines = ["", "c1|doc|x|0|1|[1]", "   ", "c2|doc|y|1|1|[1]"];
        let records = parse_rows(lines, &chunk_shape());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_unterminated_tail_is_best_effort() {
        let lines = ["c1|doc|x|0|1|[1]", "c2|doc|cut off mid", "field"];
        let shape = chunk_shape();
        let records = parse_rows(lines, &shape);
        assert_eq!(records.len(), 2);
        let last = &records[1];
        assert!(!last.is_terminated());
        assert!(last.field(2).is_some_and(|f| f.contains("cut off mid\nfield")));
        assert!(last.validate(&shape).is_err());
    }

    #[test]
    fn test_no_trailing_fields_means_one_record_per_line() {
        let shape = FieldShape::new(0, vec![]);
        let records = parse_rows(["a|b", "c"], &shape);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields(), &["a|b"]);
    }

    #[test]
    fn test_reparse_is_deterministic() {
        let lines: Vec<String> = vec![
            "c1|doc|one".into(),
            "two|0|5|[1]".into(),
            "c2|doc|three|1|2|[2]".into(),
            "dangling".into(),
        ];
        let shape = chunk_shape();
        let first = parse_rows(lines.clone(), &shape);
        let second = parse_rows(lines, &shape);
        assert_eq!(first, second);
    }

    #[test]
    fn test_expect_fields_reports_count() {
        let records = parse_rows(["a|b|1"], &FieldShape::new(1, vec![FieldKind::Integer]));
        assert_eq!(
            records[0].expect_fields(5),
            Err(ParseError::FieldCount {
                expected: 5,
                found: 3
            })
        );
    }

    #[test]
    fn test_streaming_parser_emits_on_completion() {
        let mut parser = RecordParser::new(chunk_shape());
        assert!(parser.push_line("c1|doc|start").is_none());
        let record = parser.push_line("finish|0|1|{}").unwrap();
        assert_eq!(record.field(2), Some("start\nfinish"));
        assert!(parser.finish().is_none());
    }
}
