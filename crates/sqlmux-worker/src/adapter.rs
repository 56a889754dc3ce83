//! Database adapters.
//!
//! An adapter carries the conventions of one backend engine that the
//! processor cannot infer from the generic [`Backend`](sqlmux_core::Backend)
//! trait: how column types are numbered for the client, how result text is
//! rendered, and whether binds travel by name.

use sqlmux_core::{ConnectionErrorKind, Error};
use sqlmux_wire::mysql::FieldType;
use std::collections::HashMap;

/// Type code reported for a column whose type name is not in the map.
pub const UNDEFINED_TYPE_CODE: i32 = 0;

/// Engine-specific conventions used by the command processor.
pub trait DatabaseAdapter: Send {
    /// Upper-case database type name to client type code.
    fn col_type_map(&self) -> &HashMap<String, i32>;

    /// Render one non-NULL result value for the client.
    fn process_result(&self, type_name: &str, raw: &str) -> String;

    /// Does the backend take bind arguments by name?
    fn use_bind_names(&self) -> bool;

    /// Should the backend connection be replaced after this error?
    fn should_recycle(&self, _err: &Error) -> bool {
        false
    }

    /// Client type code for a database type name.
    fn type_code(&self, type_name: &str) -> i32 {
        let key = if type_name.is_empty() {
            "UNDEFINED".to_string()
        } else {
            type_name.to_ascii_uppercase()
        };
        self.col_type_map()
            .get(&key)
            .copied()
            .unwrap_or(UNDEFINED_TYPE_CODE)
    }
}

/// Adapter for MySQL-compatible backends.
#[derive(Debug, Clone)]
pub struct MySqlAdapter {
    type_map: HashMap<String, i32>,
}

/// ER_OPTION_PREVENTS_STATEMENT (server running with --read-only)
const ER_OPTION_PREVENTS_STATEMENT: u16 = 1290;
/// ER_CANT_EXECUTE_IN_READ_ONLY_TRANSACTION
const ER_READ_ONLY_TRANSACTION: u16 = 1792;

impl MySqlAdapter {
    pub fn new() -> Self {
        let mut type_map: HashMap<String, i32> = FieldType::type_names()
            .map(|(name, ty)| (name.to_string(), i32::from(ty as u8)))
            .collect();
        // Names drivers report that are not canonical protocol names.
        for (alias, ty) in [
            ("INT", FieldType::Long),
            ("BIGINT", FieldType::LongLong),
            ("SMALLINT", FieldType::Short),
            ("TINYINT", FieldType::Tiny),
            ("MEDIUMINT", FieldType::Int24),
            ("DECIMAL", FieldType::NewDecimal),
            ("TEXT", FieldType::Blob),
            ("BINARY", FieldType::String),
            ("VARBINARY", FieldType::VarString),
        ] {
            type_map
                .entry(alias.to_string())
                .or_insert(i32::from(ty as u8));
        }
        Self { type_map }
    }
}

impl Default for MySqlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseAdapter for MySqlAdapter {
    fn col_type_map(&self) -> &HashMap<String, i32> {
        &self.type_map
    }

    /// Date and time values are rewritten to `DD-MM-YYYY HH:MM:SS.mmm`;
    /// everything else, and any text that does not parse, passes through.
    fn process_result(&self, type_name: &str, raw: &str) -> String {
        match type_name.to_ascii_uppercase().as_str() {
            "DATE" | "DATETIME" | "TIMESTAMP" => {
                native_datetime(raw).unwrap_or_else(|| raw.to_string())
            }
            _ => raw.to_string(),
        }
    }

    fn use_bind_names(&self) -> bool {
        false
    }

    fn should_recycle(&self, err: &Error) -> bool {
        match err {
            Error::Connection(c) => c.kind == ConnectionErrorKind::ReadOnly || err.is_connection_error(),
            Error::Query(_) => matches!(
                err.db_code(),
                Some(ER_OPTION_PREVENTS_STATEMENT | ER_READ_ONLY_TRANSACTION)
            ),
            other => other.is_connection_error(),
        }
    }
}

/// `YYYY-MM-DD[ HH:MM:SS[.ffffff]]` to `DD-MM-YYYY HH:MM:SS.mmm`.
fn native_datetime(raw: &str) -> Option<String> {
    let (date, time) = match raw.split_once(' ') {
        Some((d, t)) => (d, Some(t)),
        None => (raw, None),
    };
    let mut parts = date.split('-');
    let year: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let (mut hour, mut minute, mut second, mut millis) = (0_u32, 0_u32, 0_u32, 0_u32);
    if let Some(time) = time {
        let (hms, fraction) = match time.split_once('.') {
            Some((h, f)) => (h, Some(f)),
            None => (time, None),
        };
        let mut t = hms.split(':');
        hour = t.next()?.parse().ok()?;
        minute = t.next()?.parse().ok()?;
        second = t.next()?.parse().ok()?;
        if let Some(f) = fraction {
            if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let digits: String = f.chars().chain(std::iter::repeat('0')).take(3).collect();
            millis = digits.parse().ok()?;
        }
    }
    Some(format!(
        "{day:02}-{month:02}-{year:04} {hour:02}:{minute:02}:{second:02}.{millis:03}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlmux_core::QueryError;
    use sqlmux_core::QueryErrorKind;

    #[test]
    fn test_type_codes() {
        let adapter = MySqlAdapter::new();
        assert_eq!(adapter.type_code("varchar"), i32::from(FieldType::VarChar as u8));
        assert_eq!(adapter.type_code("INT"), i32::from(FieldType::Long as u8));
        assert_eq!(adapter.type_code("NOPE"), UNDEFINED_TYPE_CODE);
        assert_eq!(adapter.type_code(""), UNDEFINED_TYPE_CODE);
    }

    #[test]
    fn test_datetime_rendering() {
        let adapter = MySqlAdapter::new();
        assert_eq!(
            adapter.process_result("DATETIME", "2024-05-17 13:45:09.123456"),
            "17-05-2024 13:45:09.123"
        );
        assert_eq!(
            adapter.process_result("date", "2024-05-17"),
            "17-05-2024 00:00:00.000"
        );
        assert_eq!(
            adapter.process_result("TIMESTAMP", "2024-05-17 01:02:03.5"),
            "17-05-2024 01:02:03.500"
        );
        assert_eq!(adapter.process_result("DATETIME", "garbage"), "garbage");
        assert_eq!(adapter.process_result("VARCHAR", "2024-05-17"), "2024-05-17");
    }

    #[test]
    fn test_recycle_decisions() {
        let adapter = MySqlAdapter::new();
        assert!(adapter.should_recycle(&Error::connection(
            ConnectionErrorKind::ReadOnly,
            "read only"
        )));
        assert!(adapter.should_recycle(&Error::connection(ConnectionErrorKind::Lost, "gone")));

        let read_only = Error::Query(QueryError {
            code: Some(1290),
            ..query_error()
        });
        assert!(adapter.should_recycle(&read_only));
        assert!(!adapter.should_recycle(&Error::query(QueryErrorKind::Syntax, "bad sql")));
    }

    fn query_error() -> QueryError {
        QueryError {
            kind: QueryErrorKind::Execution,
            sql: None,
            code: None,
            sqlstate: None,
            message: "read only".into(),
            source: None,
        }
    }

    #[test]
    fn test_positional_binds() {
        assert!(!MySqlAdapter::new().use_bind_names());
    }
}
