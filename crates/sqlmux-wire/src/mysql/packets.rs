//! Server response packets for the MySQL command phase.
//!
//! Every builder produces a payload; [`super::encode`] adds framing.

#![allow(clippy::cast_possible_truncation)]

use super::charset;
use super::types::FieldType;
use crate::packet::Packet;
use crate::primitives::{ByteReader, ByteWriter, StringKind};
use sqlmux_core::ColumnMeta;

/// Default SQLSTATE for errors without a more specific one.
pub const GENERAL_SQLSTATE: &str = "HY000";

/// OK packet (0x00).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OkPacket {
    /// Number of affected rows
    pub affected_rows: u64,
    /// Last insert ID
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
    /// Info string (if any)
    pub info: String,
}

impl OkPacket {
    /// Payload bytes (protocol 4.1 layout).
    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(16 + self.info.len());
        w.write_u8(0x00);
        w.write_lenenc_int(self.affected_rows);
        w.write_lenenc_int(self.last_insert_id);
        w.write_u16_le(self.status_flags);
        w.write_u16_le(self.warnings);
        w.write_str(self.info.as_bytes(), StringKind::Eof);
        w.into_bytes()
    }

    /// Parse an OK payload, including its 0x00 marker.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut r = ByteReader::new(payload);
        if r.read_u8()? != 0x00 {
            return None;
        }
        Some(Self {
            affected_rows: r.read_lenenc_int()?,
            last_insert_id: r.read_lenenc_int()?,
            status_flags: r.read_u16_le()?,
            warnings: r.read_u16_le()?,
            info: r.read_rest_string(),
        })
    }

    pub fn to_packet(&self, sequence_id: u8) -> Packet {
        super::encode(sequence_id, &self.to_payload())
    }
}

/// Error packet (0xFF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Error code
    pub error_code: u16,
    /// SQL state (5 characters)
    pub sql_state: String,
    /// Error message
    pub error_message: String,
}

impl ErrPacket {
    /// ER_UNKNOWN_ERROR
    pub const UNKNOWN_ERROR: u16 = 1105;
    /// ER_UNKNOWN_COM_ERROR
    pub const UNKNOWN_COMMAND: u16 = 1047;
    /// ER_NOT_SUPPORTED_YET
    pub const NOT_SUPPORTED: u16 = 1235;
    /// ER_UNKNOWN_STMT_HANDLER
    pub const UNKNOWN_STMT_HANDLER: u16 = 1243;

    pub fn new(error_code: u16, message: impl Into<String>) -> Self {
        Self {
            error_code,
            sql_state: GENERAL_SQLSTATE.to_string(),
            error_message: message.into(),
        }
    }

    /// Build from a session error, keeping the database's code and state.
    pub fn from_error(err: &sqlmux_core::Error) -> Self {
        Self {
            error_code: err.db_code().unwrap_or(Self::UNKNOWN_ERROR),
            sql_state: err.sqlstate().unwrap_or(GENERAL_SQLSTATE).to_string(),
            error_message: err.client_message(),
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(9 + self.error_message.len());
        w.write_u8(0xFF);
        w.write_u16_le(self.error_code);
        w.write_u8(b'#');
        w.write_str(self.sql_state.as_bytes(), StringKind::Fixed(5));
        w.write_str(self.error_message.as_bytes(), StringKind::Eof);
        w.into_bytes()
    }

    /// Parse an ERR payload, including its 0xFF marker.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut r = ByteReader::new(payload);
        if r.read_u8()? != 0xFF {
            return None;
        }
        let error_code = r.read_u16_le()?;
        let sql_state = if r.peek() == Some(b'#') {
            r.skip(1);
            String::from_utf8_lossy(r.read_str(StringKind::Fixed(5))?).into_owned()
        } else {
            String::new()
        };
        Some(Self {
            error_code,
            sql_state,
            error_message: r.read_rest_string(),
        })
    }

    pub fn to_packet(&self, sequence_id: u8) -> Packet {
        super::encode(sequence_id, &self.to_payload())
    }
}

/// EOF packet (0xFE), closing column and row sections of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EofPacket {
    /// Number of warnings
    pub warnings: u16,
    /// Server status flags
    pub status_flags: u16,
}

impl EofPacket {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(5);
        w.write_u8(0xFE);
        w.write_u16_le(self.warnings);
        w.write_u16_le(self.status_flags);
        w.into_bytes()
    }

    pub fn to_packet(&self, sequence_id: u8) -> Packet {
        super::encode(sequence_id, &self.to_payload())
    }
}

/// COM_STMT_PREPARE_OK response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

impl StmtPrepareOk {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(12);
        w.write_u8(0x00);
        w.write_u32_le(self.statement_id);
        w.write_u16_le(self.num_columns);
        w.write_u16_le(self.num_params);
        w.write_u8(0x00); // filler
        w.write_u16_le(self.warnings);
        w.into_bytes()
    }

    pub fn to_packet(&self, sequence_id: u8) -> Packet {
        super::encode(sequence_id, &self.to_payload())
    }
}

/// ColumnDefinition41.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    /// Column definition for a result column reported by a cursor.
    pub fn from_meta(meta: &ColumnMeta) -> Self {
        let column_type = FieldType::from_type_name(&meta.type_name).unwrap_or(FieldType::VarString);
        let flags = if meta.nullable { 0 } else { 1 }; // NOT_NULL
        Self {
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: meta.name.clone(),
            org_name: meta.name.clone(),
            charset: if column_type.is_blob() {
                charset::BINARY
            } else {
                charset::UTF8_GENERAL_CI
            },
            column_length: u32::try_from(meta.length.max(0)).unwrap_or(u32::MAX),
            column_type,
            flags,
            decimals: column_type.column_decimals(meta.scale),
        }
    }

    /// Placeholder definition sent once per `?` after COM_STMT_PREPARE_OK.
    pub fn parameter() -> Self {
        Self {
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: "?".to_string(),
            org_name: String::new(),
            charset: charset::UTF8_GENERAL_CI,
            column_length: 0,
            column_type: FieldType::VarString,
            flags: 0,
            decimals: 0,
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_lenenc_string("def");
        w.write_lenenc_string(&self.schema);
        w.write_lenenc_string(&self.table);
        w.write_lenenc_string(&self.org_table);
        w.write_lenenc_string(&self.name);
        w.write_lenenc_string(&self.org_name);
        w.write_lenenc_int(0x0c); // length of the fixed-size fields
        w.write_u16_le(self.charset);
        w.write_u32_le(self.column_length);
        w.write_u8(self.column_type as u8);
        w.write_u16_le(self.flags);
        w.write_u8(self.decimals);
        w.write_zeros(2);
        w.into_bytes()
    }
}

/// Build a complete text-protocol result set.
///
/// Layout: column count, one definition per column, EOF, one row packet per
/// row (length-encoded text, 0xFB for NULL), EOF. Sequence ids count up from
/// `first_sequence_id`.
pub fn text_resultset(
    columns: &[ColumnDefinition],
    rows: &[Vec<Option<Vec<u8>>>],
    status_flags: u16,
    first_sequence_id: u8,
) -> Vec<Packet> {
    let mut seq = first_sequence_id;
    let mut next_seq = || {
        let current = seq;
        seq = seq.wrapping_add(1);
        current
    };
    let mut packets = Vec::with_capacity(columns.len() + rows.len() + 3);

    let mut count = ByteWriter::with_capacity(9);
    count.write_lenenc_int(columns.len() as u64);
    packets.push(super::encode(next_seq(), count.as_bytes()));

    for column in columns {
        packets.push(super::encode(next_seq(), &column.to_payload()));
    }
    let eof = EofPacket {
        warnings: 0,
        status_flags,
    };
    packets.push(eof.to_packet(next_seq()));

    for row in rows {
        let mut w = ByteWriter::new();
        for cell in row {
            match cell {
                Some(bytes) => w.write_str(bytes, StringKind::LengthEncoded),
                None => w.write_lenenc_null(),
            }
        }
        packets.push(super::encode(next_seq(), w.as_bytes()));
    }
    packets.push(eof.to_packet(next_seq()));
    packets
}
