//! MySQL client/server protocol framing.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger messages are split
//! into frames of exactly that size followed by a shorter terminal frame
//! (possibly empty). Decoding reassembles them into one logical packet.

#![allow(clippy::cast_possible_truncation)]

pub mod packets;
pub mod params;
pub mod types;

pub use packets::{
    ColumnDefinition, EofPacket, ErrPacket, OkPacket, StmtPrepareOk, text_resultset,
};
pub use params::{BoundParam, StmtExecute};
pub use types::FieldType;

use crate::packet::{MYSQL_INDICATOR, NETSTRING_INDICATOR, Packet, Protocol};
use sqlmux_core::{Error, FramingErrorKind, Result};

/// Maximum payload size for a single MySQL frame (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL command codes (COM_xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Sleep (internal use)
    Sleep = 0x00,
    /// Quit connection
    Quit = 0x01,
    /// Switch database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// List fields in table (deprecated)
    FieldList = 0x04,
    /// Create database
    CreateDb = 0x05,
    /// Drop database
    DropDb = 0x06,
    Refresh = 0x07,
    Shutdown = 0x08,
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    Connect = 0x0b,
    ProcessKill = 0x0c,
    Debug = 0x0d,
    /// Ping server
    Ping = 0x0e,
    Time = 0x0f,
    DelayedInsert = 0x10,
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    TableDump = 0x13,
    ConnectOut = 0x14,
    RegisterSlave = 0x15,
    /// Prepare statement
    StmtPrepare = 0x16,
    /// Execute prepared statement
    StmtExecute = 0x17,
    /// Send long data for prepared statement
    StmtSendLongData = 0x18,
    /// Close prepared statement
    StmtClose = 0x19,
    /// Reset prepared statement
    StmtReset = 0x1a,
    SetOption = 0x1b,
    /// Fetch cursor rows
    StmtFetch = 0x1c,
    Daemon = 0x1d,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
}

impl Command {
    /// Map a command byte to its command.
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Command::Sleep,
            0x01 => Command::Quit,
            0x02 => Command::InitDb,
            0x03 => Command::Query,
            0x04 => Command::FieldList,
            0x05 => Command::CreateDb,
            0x06 => Command::DropDb,
            0x07 => Command::Refresh,
            0x08 => Command::Shutdown,
            0x09 => Command::Statistics,
            0x0a => Command::ProcessInfo,
            0x0b => Command::Connect,
            0x0c => Command::ProcessKill,
            0x0d => Command::Debug,
            0x0e => Command::Ping,
            0x0f => Command::Time,
            0x10 => Command::DelayedInsert,
            0x11 => Command::ChangeUser,
            0x12 => Command::BinlogDump,
            0x13 => Command::TableDump,
            0x14 => Command::ConnectOut,
            0x15 => Command::RegisterSlave,
            0x16 => Command::StmtPrepare,
            0x17 => Command::StmtExecute,
            0x18 => Command::StmtSendLongData,
            0x19 => Command::StmtClose,
            0x1a => Command::StmtReset,
            0x1b => Command::SetOption,
            0x1c => Command::StmtFetch,
            0x1d => Command::Daemon,
            0x1e => Command::BinlogDumpGtid,
            0x1f => Command::ResetConnection,
            _ => return None,
        })
    }
}

/// MySQL server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
    pub const SERVER_STATUS_METADATA_CHANGED: u16 = 0x0400;
    pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
    pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;
    pub const SERVER_STATUS_IN_TRANS_READONLY: u16 = 0x2000;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// MySQL character set codes.
pub mod charset {
    pub const UTF8_GENERAL_CI: u16 = 0x21;
    pub const BINARY: u16 = 63;
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// Decode one indicator-prefixed MySQL message from the front of `buf`.
///
/// Continuation frames are read until one is shorter than
/// [`MAX_PACKET_SIZE`]; the packet's payload is their concatenation and its
/// sequence id is the last frame's. On `WrongPacketKind` nothing beyond the
/// indicator byte has been examined.
pub fn decode(buf: &[u8]) -> Result<(Packet, usize)> {
    decode_bounded(buf, usize::MAX)
}

/// [`decode`], rejecting reassembled payloads above `max_len`.
pub fn decode_bounded(buf: &[u8], max_len: usize) -> Result<(Packet, usize)> {
    match buf.first() {
        Some(&MYSQL_INDICATOR) => {}
        Some(&NETSTRING_INDICATOR) => {
            return Err(Error::framing(
                FramingErrorKind::WrongPacketKind,
                "expected mysql indicator, found netstring",
            ));
        }
        Some(&byte) => {
            return Err(Error::framing(
                FramingErrorKind::UnknownPacketKind,
                format!("invalid indicator byte 0x{byte:02x}"),
            ));
        }
        None => {
            return Err(Error::framing(
                FramingErrorKind::UnknownPacketKind,
                "missing indicator byte",
            ));
        }
    }
    let frames = scan_frames(&buf[1..], max_len)?;
    let consumed = 1 + frames.consumed;
    Ok((assemble(buf[..consumed].to_vec(), 1, &frames), consumed))
}

/// Decode a MySQL message that carries no indicator byte, as a client sends it.
///
/// The returned packet's serialized form has the indicator prepended.
pub fn decode_untagged(buf: &[u8], max_len: usize) -> Result<(Packet, usize)> {
    let frames = scan_frames(buf, max_len)?;
    let mut serialized = Vec::with_capacity(frames.consumed + 1);
    serialized.push(MYSQL_INDICATOR);
    serialized.extend_from_slice(&buf[..frames.consumed]);
    Ok((assemble(serialized, 1, &frames), frames.consumed))
}

/// Build an outgoing MySQL packet, splitting payloads of
/// [`MAX_PACKET_SIZE`] bytes or more into continuation frames.
pub fn encode(sequence_id: u8, payload: &[u8]) -> Packet {
    let command = payload.first().map_or(0, |&b| u32::from(b));
    let mut serialized = Vec::with_capacity(1 + payload.len() + PacketHeader::SIZE);
    serialized.push(MYSQL_INDICATOR);

    if payload.len() < MAX_PACKET_SIZE {
        let header = PacketHeader {
            payload_length: payload.len() as u32,
            sequence_id,
        };
        serialized.extend_from_slice(&header.to_bytes());
        let start = serialized.len();
        serialized.extend_from_slice(payload);
        let end = serialized.len();
        return Packet::framed(Protocol::MySql, command, serialized, start..end, sequence_id);
    }

    let mut seq = sequence_id;
    let mut chunks = payload.chunks(MAX_PACKET_SIZE).peekable();
    let mut last_seq = seq;
    while let Some(chunk) = chunks.next() {
        let header = PacketHeader {
            payload_length: chunk.len() as u32,
            sequence_id: seq,
        };
        serialized.extend_from_slice(&header.to_bytes());
        serialized.extend_from_slice(chunk);
        last_seq = seq;
        seq = seq.wrapping_add(1);

        // A message that is an exact multiple of the max frame size needs
        // an empty terminal frame.
        if chunks.peek().is_none() && chunk.len() == MAX_PACKET_SIZE {
            let header = PacketHeader {
                payload_length: 0,
                sequence_id: seq,
            };
            serialized.extend_from_slice(&header.to_bytes());
            last_seq = seq;
        }
    }
    Packet::joined(Protocol::MySql, command, serialized, payload.to_vec(), last_seq)
}

struct Frames {
    /// Payload ranges relative to the start of the scanned buffer
    ranges: Vec<std::ops::Range<usize>>,
    last_sequence_id: u8,
    consumed: usize,
}

fn scan_frames(buf: &[u8], max_len: usize) -> Result<Frames> {
    let mut ranges = Vec::with_capacity(1);
    let mut pos = 0;
    let mut total = 0_usize;
    loop {
        let Some(header_bytes) = buf.get(pos..pos + PacketHeader::SIZE) else {
            return Err(Error::framing(
                FramingErrorKind::IncompletePacket,
                "stream ended while reading mysql header",
            ));
        };
        let mut raw = [0_u8; PacketHeader::SIZE];
        raw.copy_from_slice(header_bytes);
        let header = PacketHeader::from_bytes(&raw);
        let len = header.payload_length as usize;

        total += len;
        if total > max_len {
            return Err(Error::framing(
                FramingErrorKind::Oversized,
                format!("mysql message length {total} exceeds limit {max_len}"),
            ));
        }

        let start = pos + PacketHeader::SIZE;
        let end = start + len;
        if buf.len() < end {
            return Err(Error::framing(
                FramingErrorKind::IncompletePacket,
                format!(
                    "mysql frame declares {len} bytes, {} available",
                    buf.len() - start
                ),
            ));
        }
        ranges.push(start..end);
        pos = end;

        if len < MAX_PACKET_SIZE {
            return Ok(Frames {
                ranges,
                last_sequence_id: header.sequence_id,
                consumed: pos,
            });
        }
    }
}

/// Build the packet over `serialized`, whose frames start `offset` bytes in.
fn assemble(serialized: Vec<u8>, offset: usize, frames: &Frames) -> Packet {
    let shift = |r: &std::ops::Range<usize>| r.start + offset..r.end + offset;
    if let [only] = frames.ranges.as_slice() {
        let range = shift(only);
        let command = serialized.get(range.start).map_or(0, |&b| u32::from(b));
        return Packet::framed(
            Protocol::MySql,
            command,
            serialized,
            range,
            frames.last_sequence_id,
        );
    }
    let mut payload = Vec::with_capacity(frames.ranges.iter().map(|r| r.len()).sum());
    for range in &frames.ranges {
        payload.extend_from_slice(&serialized[shift(range)]);
    }
    let command = payload.first().map_or(0, |&b| u32::from(b));
    Packet::joined(
        Protocol::MySql,
        command,
        serialized,
        payload,
        frames.last_sequence_id,
    )
}
