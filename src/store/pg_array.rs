//! Decoding of PostgreSQL text-array and pgvector literals.

use crate::error::ParseError;

/// Decode a one-dimensional text array such as `{rust,"async io","say \"hi\""}`.
///
/// An empty field (SQL NULL) decodes to an empty list; unquoted `NULL`
/// elements are skipped.
pub fn parse_text_array(literal: &str) -> Result<Vec<String>, ParseError> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Ok(Vec::new());
    }

    let inner = literal
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| invalid("text array", literal))?;

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();

    while chars.peek().is_some() {
        let mut item = String::new();
        let quoted = chars.peek() == Some(&'"');

        if quoted {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => item.push(escaped),
                        None => return Err(invalid("text array", literal)),
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => item.push(other),
                }
            }
            if !closed {
                return Err(invalid("text array", literal));
            }
            match chars.next() {
                None | Some(',') => {}
                Some(_) => return Err(invalid("text array", literal)),
            }
            items.push(item);
        } else {
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
                item.push(c);
            }
            let item = item.trim();
            if !item.eq_ignore_ascii_case("NULL") {
                items.push(item.to_string());
            }
        }
    }

    Ok(items)
}

/// Decode a pgvector literal such as `[0.1,0.2,0.3]`. An empty field decodes
/// to an empty vector.
pub fn parse_vector(literal: &str) -> Result<Vec<f32>, ParseError> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Ok(Vec::new());
    }

    let inner = literal
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| invalid("vector", literal))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|_| invalid("vector", literal)))
        .collect()
}

pub fn parse_integer(field: &str) -> Result<i64, ParseError> {
    field
        .trim()
        .parse::<i64>()
        .map_err(|_| invalid("integer", field))
}

fn invalid(kind: &'static str, value: &str) -> ParseError {
    ParseError::InvalidLiteral {
        kind,
        value: crate::utils::truncate_chars(value, 60),
    }
}
