//! Numeric codes carried inside netstring packets.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ty {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Numeric wire value.
            pub const fn code(self) -> $repr {
                match self {
                    $( $name::$variant => $value ),+
                }
            }

            /// Map a wire value back to its variant.
            pub const fn from_code(code: $repr) -> Option<Self> {
                match code {
                    $( $value => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}({})", self, self.code())
            }
        }
    };
}

code_enum! {
    /// Request commands of the native netstring protocol.
    pub enum NetstringCommand: u32 {
        /// Payload is a batch of nested netstrings
        Composite = 0,
        Prepare = 1,
        BindName = 2,
        BindValue = 3,
        Execute = 4,
        Rows = 5,
        Cols = 6,
        Fetch = 7,
        Commit = 8,
        Rollback = 9,
        BindType = 10,
        ClientInfo = 11,
        Backtrace = 12,
        BindOutName = 13,
        PrepareSpecial = 14,
        ColsInfo = 22,
        BindNum = 23,
        BindValueMaxSize = 24,
        PrepareV2 = 25,
        ShardKey = 27,
        GetNumShards = 28,
        SetShardId = 29,
        ControlMsg = 501,
        /// End-of-response marker
        Eor = 502,
        ClientCalCorrelationId = 2006,
    }
}

code_enum! {
    /// Response commands of the native netstring protocol.
    pub enum ResponseCode: u32 {
        SqlError = 1,
        Error = 2,
        Value = 3,
        Hello = 4,
        Ok = 5,
        NoMoreData = 6,
        StillExecuting = 7,
    }
}

code_enum! {
    /// Declared type of a bind variable (sent with BindType).
    pub enum DataType: u32 {
        String = 0,
        Raw = 3,
        Blob = 4,
        Clob = 5,
        Timestamp = 6,
        TimestampTz = 7,
    }
}

code_enum! {
    /// Post-command session state carried by every end-of-response packet.
    pub enum EorCode: u8 {
        Free = 0,
        InTransaction = 1,
        InCursorNotInTransaction = 2,
        InCursorInTransaction = 3,
        MoreIncomingRequests = 4,
        BusyOther = 5,
        Restart = 6,
    }
}

impl DataType {
    /// Parse the decimal payload of a BindType command.
    ///
    /// Unknown codes fall back to [`DataType::String`].
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        let code: u32 = text.trim().parse().ok()?;
        Some(Self::from_code(code).unwrap_or(DataType::String))
    }

    /// Are values of this type passed through as untyped bytes?
    pub const fn is_binary(self) -> bool {
        matches!(self, DataType::Raw | DataType::Blob)
    }
}

impl EorCode {
    /// State code for a session with the given transaction and cursor facets.
    pub const fn for_state(in_transaction: bool, in_cursor: bool) -> Self {
        match (in_transaction, in_cursor) {
            (false, false) => EorCode::Free,
            (true, false) => EorCode::InTransaction,
            (false, true) => EorCode::InCursorNotInTransaction,
            (true, true) => EorCode::InCursorInTransaction,
        }
    }

    pub const fn is_in_transaction(self) -> bool {
        matches!(self, EorCode::InTransaction | EorCode::InCursorInTransaction)
    }

    pub const fn is_in_cursor(self) -> bool {
        matches!(
            self,
            EorCode::InCursorNotInTransaction | EorCode::InCursorInTransaction
        )
    }
}
