//! Statement classification and bind placeholder extraction.

use regex::Regex;
use sqlmux_core::{ConfigError, Error, Result};

/// Named placeholder: a colon followed by an identifier, optionally back-quoted.
const BIND_NAME_PATTERN: &str = r":([`]?[a-zA-Z])\w*[`]?";

/// Positional marker substituted for named placeholders.
pub const POSITIONAL_MARKER: &str = "?";

/// What a statement does to session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Returns rows
    Query,
    /// Returns rows and locks them (`SELECT ... FOR UPDATE`)
    QueryForUpdate,
    /// Modifies data
    Write,
    Begin,
    Commit,
    Rollback,
    /// DDL, session settings, anything else
    Other,
}

impl StatementKind {
    /// Does executing this statement open a cursor?
    pub const fn has_result(self) -> bool {
        matches!(self, StatementKind::Query | StatementKind::QueryForUpdate)
    }

    /// Does this statement need to run inside a transaction?
    pub const fn start_trans(self) -> bool {
        matches!(self, StatementKind::Write | StatementKind::QueryForUpdate)
    }
}

/// Result of scanning one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    /// SQL text to hand to the backend
    pub sql: String,
    /// Placeholder names in order of appearance, colon included
    pub bind_names: Vec<String>,
    pub kind: StatementKind,
}

/// Compiled statement scanner.
#[derive(Debug, Clone)]
pub struct SqlParser {
    bind_name: Regex,
}

impl SqlParser {
    pub fn new() -> Result<Self> {
        let bind_name = Regex::new(BIND_NAME_PATTERN).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid bind name pattern: {e}"),
                source: Some(Box::new(e)),
            })
        })?;
        Ok(Self { bind_name })
    }

    /// Extract named placeholders and classify the statement.
    ///
    /// When `keep_names` is false every placeholder is rewritten to
    /// [`POSITIONAL_MARKER`]. Quoted literals and `::` casts are left alone.
    pub fn parse(&self, sql: &str, keep_names: bool) -> ParsedSql {
        let mut out = String::with_capacity(sql.len());
        let mut bind_names = Vec::new();

        for (quoted, segment) in split_quoted(sql) {
            if quoted {
                out.push_str(segment);
                continue;
            }
            let mut last = 0;
            for m in self.bind_name.find_iter(segment) {
                if segment[..m.start()].ends_with(':') {
                    continue;
                }
                bind_names.push(m.as_str().to_string());
                out.push_str(&segment[last..m.start()]);
                out.push_str(if keep_names { m.as_str() } else { POSITIONAL_MARKER });
                last = m.end();
            }
            out.push_str(&segment[last..]);
        }

        ParsedSql {
            sql: out,
            bind_names,
            kind: classify(sql),
        }
    }
}

/// Number of `?` markers outside literals, quoted identifiers and comments.
pub fn count_positional(sql: &str) -> usize {
    code_segments(sql).iter().map(|s| s.matches('?').count()).sum()
}

/// Strip the colon and any back-quotes from a placeholder name.
pub fn bare_name(name: &str) -> &str {
    name.trim_start_matches(':').trim_matches('`')
}

/// Classify a statement by its leading keyword.
pub fn classify(sql: &str) -> StatementKind {
    let body = skip_leading_noise(sql);
    let mut words = body
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty());
    let first = words.next().unwrap_or_default().to_ascii_uppercase();

    match first.as_str() {
        "SELECT" | "WITH" => {
            let upper = body.to_ascii_uppercase();
            let for_update = upper
                .split_whitespace()
                .collect::<Vec<_>>()
                .windows(2)
                .any(|w| w[0] == "FOR" && w[1].trim_end_matches(';') == "UPDATE");
            if for_update {
                StatementKind::QueryForUpdate
            } else {
                StatementKind::Query
            }
        }
        "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" => StatementKind::Query,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "MERGE" | "UPSERT" | "CALL" => {
            StatementKind::Write
        }
        "BEGIN" => StatementKind::Begin,
        "START" if words.next().is_some_and(|w| w.eq_ignore_ascii_case("TRANSACTION")) => {
            StatementKind::Begin
        }
        "COMMIT" => StatementKind::Commit,
        "ROLLBACK" => StatementKind::Rollback,
        _ => StatementKind::Other,
    }
}

/// Skip whitespace, comments and opening parentheses.
fn skip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, r)| r);
        } else if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, r)| r);
        } else if let Some(after) = trimmed.strip_prefix('#') {
            rest = after.split_once('\n').map_or("", |(_, r)| r);
        } else {
            return trimmed;
        }
    }
}

/// Split SQL into alternating unquoted and single-quoted segments.
///
/// A doubled quote inside a literal toggles twice and stays in the literal.
fn split_quoted(sql: &str) -> impl Iterator<Item = (bool, &str)> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in sql.char_indices() {
        if c != '\'' {
            continue;
        }
        if quoted {
            segments.push((true, &sql[start..=i]));
            start = i + 1;
        } else {
            segments.push((false, &sql[start..i]));
            start = i;
        }
        quoted = !quoted;
    }
    segments.push((quoted, &sql[start..]));
    segments.into_iter().filter(|(_, s)| !s.is_empty())
}

/// The parts of `sql` that are neither quoted nor commented out.
///
/// Handles `'...'`, `"..."` and `` `...` `` spans (doubled quotes and
/// backslash escapes stay inside), `#` and `-- ` line comments, and
/// `/* */` blocks. Every delimiter is ASCII so the cut points are always
/// char boundaries.
fn code_segments(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let skip_to = match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => Some(closing_quote(bytes, i + 1, quote)),
            b'#' => Some(line_end(bytes, i)),
            b'-' if bytes.get(i + 1) == Some(&b'-')
                && bytes.get(i + 2).is_none_or(u8::is_ascii_whitespace) =>
            {
                Some(line_end(bytes, i))
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => Some(
                sql[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |at| i + 2 + at + 2),
            ),
            _ => None,
        };
        match skip_to {
            Some(end) => {
                segments.push(&sql[start..i]);
                start = end;
                i = end;
            }
            None => i += 1,
        }
    }
    segments.push(&sql[start..]);
    segments
}

/// Index just past the quote that closes a span opened before `from`.
fn closing_quote(bytes: &[u8], from: usize, quote: u8) -> usize {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote != b'`' => i += 2,
            b if b == quote && bytes.get(i + 1) == Some(&quote) => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |at| from + at)
}
