//! Core types and traits for sqlmux.
//!
//! This crate provides the shared vocabulary of the proxy worker:
//!
//! - `Error` taxonomy (framing, session, query, connection)
//! - `Value` and `Row` for bind arguments and result data
//! - `Backend` and `Cursor` traits for the SQL engine behind a session
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod row;
pub mod value;

pub use connection::{ArgValue, Arguments, Backend, ColumnMeta, Cursor, ExecResult, NamedArg};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, FramingError, FramingErrorKind,
    ProtocolError, QueryError, QueryErrorKind, Result, SessionError, SessionErrorKind,
};
pub use row::Row;
pub use value::{Timestamp, Value};
