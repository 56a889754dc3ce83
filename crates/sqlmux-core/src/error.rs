//! Error types for sqlmux operations.

use std::fmt;

/// The primary error type for all sqlmux operations.
#[derive(Debug)]
pub enum Error {
    /// Wire framing errors (indicator byte, lengths, truncation)
    Framing(FramingError),
    /// Backend connection errors (lost, closed, read-only)
    Connection(ConnectionError),
    /// Query preparation or execution errors reported by the backend
    Query(QueryError),
    /// Session-protocol violations (unknown bind name, no cursor, ...)
    Session(SessionError),
    /// Protocol errors above the framing layer
    Protocol(ProtocolError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct FramingError {
    pub kind: FramingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingErrorKind {
    /// Indicator byte absent or neither netstring nor MySQL
    UnknownPacketKind,
    /// Indicator byte belongs to the other protocol's decoder
    WrongPacketKind,
    /// Fewer bytes available than the declared length
    IncompletePacket,
    /// Non-digit byte in a netstring length field
    MalformedLength,
    /// Non-digit byte in a netstring command field
    MalformedCommand,
    /// Netstring body not closed by a comma
    MissingTerminator,
    /// Declared message size exceeds the configured maximum
    Oversized,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Peer closed the connection
    Closed,
    /// Connection lost during operation
    Lost,
    /// Connection refused
    Refused,
    /// Backend is read-only (failover in progress)
    ReadOnly,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// Numeric database error code (e.g. MySQL 1062)
    pub code: Option<u16>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Execution failure
    Execution,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// Bound a name that the prepared statement does not declare
    BindNameNotFound,
    /// Execute with an input placeholder that was never supplied
    BindValueMissing,
    /// Array binds requested
    BatchNotSupported,
    /// Output binds requested on a positional backend
    OutBindNotSupported,
    /// Fetch or column info with no open cursor
    NoCursor,
    /// Execute or bind with no prepared statement
    NoStatement,
    /// Bind value could not be decoded for its declared type
    InvalidBindValue,
    /// Binary-protocol statement id not in the statement table
    UnknownStatement,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a framing error.
    pub fn framing(kind: FramingErrorKind, message: impl Into<String>) -> Self {
        Error::Framing(FramingError {
            kind,
            message: message.into(),
        })
    }

    /// Build a session-protocol error.
    pub fn session(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Error::Session(SessionError {
            kind,
            message: message.into(),
        })
    }

    /// Build a query error with no SQL text or database code attached.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: None,
            code: None,
            sqlstate: None,
            message: message.into(),
            source: None,
        })
    }

    /// Build a connection error.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// The framing kind, if this is a framing error.
    pub fn framing_kind(&self) -> Option<FramingErrorKind> {
        match self {
            Error::Framing(f) => Some(f.kind),
            _ => None,
        }
    }

    /// The session kind, if this is a session-protocol error.
    pub fn session_kind(&self) -> Option<SessionErrorKind> {
        match self {
            Error::Session(s) => Some(s.kind),
            _ => None,
        }
    }

    /// Can a stream reader retry this decode with the other protocol?
    pub fn is_wrong_packet_kind(&self) -> bool {
        self.framing_kind() == Some(FramingErrorKind::WrongPacketKind)
    }

    /// Is this reported to the client while the session stays alive?
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Query(_) | Error::Session(_))
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Closed | ConnectionErrorKind::Lost | ConnectionErrorKind::Refused
            ),
            Error::Protocol(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Does this end the session?
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable() && !self.is_wrong_packet_kind()
    }

    /// Get SQLSTATE if available (e.g., "23000" for a duplicate key)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the numeric database error code if available
    pub fn db_code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => q.code,
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Text sent to the client inside an error response.
    ///
    /// Recoverable errors carry their bare message; everything else uses
    /// the full `Display` form.
    pub fn client_message(&self) -> String {
        match self {
            Error::Query(q) => q.message.clone(),
            Error::Session(s) => s.message.clone(),
            other => other.to_string(),
        }
    }
}

impl QueryError {
    /// Attach the SQL text that failed.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.code == Some(1062) || self.sqlstate.as_deref() == Some("23505")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Framing(e) => write!(f, "Framing error: {}", e),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Session(e) => write!(f, "Session error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for FramingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramingErrorKind::UnknownPacketKind => "unknown packet kind",
            FramingErrorKind::WrongPacketKind => "wrong packet kind",
            FramingErrorKind::IncompletePacket => "incomplete packet",
            FramingErrorKind::MalformedLength => "malformed length",
            FramingErrorKind::MalformedCommand => "malformed command",
            FramingErrorKind::MissingTerminator => "missing terminator",
            FramingErrorKind::Oversized => "oversized message",
        };
        f.write_str(name)
    }
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<FramingError> for Error {
    fn from(err: FramingError) -> Self {
        Error::Framing(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlmux operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_packet_kind_is_not_fatal() {
        let err = Error::framing(FramingErrorKind::WrongPacketKind, "expected netstring");
        assert!(err.is_wrong_packet_kind());
        assert!(!err.is_fatal());
        assert!(!err.is_recoverable());

        let err = Error::framing(FramingErrorKind::IncompletePacket, "short read");
        assert!(!err.is_wrong_packet_kind());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_recoverable_classification() {
        let err = Error::session(SessionErrorKind::BindNameNotFound, "bindname not found in query: :x");
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
        assert_eq!(err.session_kind(), Some(SessionErrorKind::BindNameNotFound));

        let err = Error::query(QueryErrorKind::Syntax, "bad sql");
        assert!(err.is_recoverable());

        let err = Error::connection(ConnectionErrorKind::Lost, "gone");
        assert!(err.is_connection_error());
        assert!(err.is_fatal());
        assert!(Error::Timeout.is_fatal());
    }

    #[test]
    fn test_client_message_is_bare_for_recoverable() {
        let err = Error::session(SessionErrorKind::NoCursor, "fetch requested but no statement exists");
        assert_eq!(err.client_message(), "fetch requested but no statement exists");
        assert_eq!(
            err.to_string(),
            "Session error: fetch requested but no statement exists"
        );

        let err = Error::framing(FramingErrorKind::MalformedLength, "Expected digit reading length");
        assert_eq!(
            err.client_message(),
            "Framing error: malformed length: Expected digit reading length"
        );
    }

    #[test]
    fn test_query_error_helpers() {
        let query = QueryError {
            kind: QueryErrorKind::Constraint,
            sql: None,
            code: Some(1062),
            sqlstate: Some("23000".to_string()),
            message: "Duplicate entry".to_string(),
            source: None,
        }
        .with_sql("INSERT INTO t VALUES (1)");

        assert!(query.is_unique_violation());
        let err = Error::Query(query);
        assert_eq!(err.sqlstate(), Some("23000"));
        assert_eq!(err.db_code(), Some(1062));
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));
        assert_eq!(
            err.to_string(),
            "Query error (SQLSTATE 23000): Duplicate entry"
        );
    }

    #[test]
    fn test_io_source_is_exposed() {
        use std::error::Error as _;
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(err.source().is_some());
        assert!(err.is_connection_error());
    }
}
