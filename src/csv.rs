//! Minimal RFC 4180 CSV support for the summary and breakdown tables.
//!
//! Query strings routinely contain commas and double quotes, so fields are
//! quoted whenever they need to be. Lines end with `\n`.

use std::io::Write;

/// Quote a field if it contains a delimiter, quote, or line break.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render one record as a CSV line, including the trailing newline.
pub fn format_record<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Write one record to `w`.
pub fn write_record<W: Write, S: AsRef<str>>(w: &mut W, fields: &[S]) -> std::io::Result<()> {
    w.write_all(format_record(fields).as_bytes())
}

/// Parse CSV text into records. Accepts `\n` and `\r\n` line endings.
pub fn parse(text: &str) -> Result<Vec<Vec<String>>, ParseError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '"' => return Err(ParseError::StrayQuote { line }),
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                line += 1;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ParseError::UnterminatedQuote { line });
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Malformed CSV input.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    StrayQuote { line: usize },
    UnterminatedQuote { line: usize },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::StrayQuote { line } => {
                write!(f, "unexpected quote inside unquoted field on line {line}")
            }
            ParseError::UnterminatedQuote { line } => {
                write!(f, "quoted field not terminated by end of input (line {line})")
            }
        }
    }
}

impl std::error::Error for ParseError {}
