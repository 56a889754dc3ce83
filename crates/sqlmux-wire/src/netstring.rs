//! Netstring codec.
//!
//! Wire form after the indicator byte:
//!
//! ```text
//! <decimal length>:<decimal command>[ <payload>],
//! ```
//!
//! `length` counts the command digits, the separating space and the payload.
//! When the payload is empty the space is omitted (`3:502,`).

use crate::packet::{NETSTRING_INDICATOR, Packet, Protocol};
use sqlmux_core::{Error, FramingErrorKind, Result};

/// Command code of a composite netstring.
pub const COMPOSITE_COMMAND: u32 = 0;

/// Longest length prefix accepted; anything longer cannot fit a `usize`
/// message on any supported target anyway.
const MAX_LENGTH_DIGITS: usize = 10;

/// Decode one indicator-prefixed netstring from the front of `buf`.
///
/// Returns the packet and the number of bytes consumed. On
/// `WrongPacketKind` nothing beyond the indicator byte has been examined.
pub fn decode(buf: &[u8]) -> Result<(Packet, usize)> {
    decode_bounded(buf, usize::MAX)
}

/// [`decode`], rejecting declared lengths above `max_len`.
pub fn decode_bounded(buf: &[u8], max_len: usize) -> Result<(Packet, usize)> {
    match buf.first() {
        Some(&NETSTRING_INDICATOR) => {}
        Some(&byte) if Protocol::from_indicator(byte) == Some(Protocol::MySql) => {
            return Err(Error::framing(
                FramingErrorKind::WrongPacketKind,
                "expected netstring indicator, found mysql",
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
    let frame = parse_frame(&buf[1..], max_len)?;
    let consumed = 1 + frame.consumed;
    let serialized = buf[..consumed].to_vec();
    let payload = 1 + frame.payload.start..1 + frame.payload.end;
    Ok((
        Packet::framed(Protocol::Netstring, frame.command, serialized, payload, 0),
        consumed,
    ))
}

/// Decode a netstring that carries no indicator byte, as a client sends it.
///
/// The returned packet's serialized form has the indicator prepended.
pub fn decode_untagged(buf: &[u8], max_len: usize) -> Result<(Packet, usize)> {
    let frame = parse_frame(buf, max_len)?;
    let mut serialized = Vec::with_capacity(frame.consumed + 1);
    serialized.push(NETSTRING_INDICATOR);
    serialized.extend_from_slice(&buf[..frame.consumed]);
    let payload = 1 + frame.payload.start..1 + frame.payload.end;
    Ok((
        Packet::framed(Protocol::Netstring, frame.command, serialized, payload, 0),
        frame.consumed,
    ))
}

/// Build an outgoing netstring packet.
pub fn encode(command: u32, payload: &[u8]) -> Packet {
    let command_text = command.to_string();
    let body_len = if payload.is_empty() {
        command_text.len()
    } else {
        command_text.len() + 1 + payload.len()
    };
    let length_text = body_len.to_string();

    let mut serialized = Vec::with_capacity(1 + length_text.len() + 1 + body_len + 1);
    serialized.push(NETSTRING_INDICATOR);
    serialized.extend_from_slice(length_text.as_bytes());
    serialized.push(b':');
    serialized.extend_from_slice(command_text.as_bytes());
    if !payload.is_empty() {
        serialized.push(b' ');
    }
    let start = serialized.len();
    serialized.extend_from_slice(payload);
    let end = serialized.len();
    serialized.push(b',');

    Packet::framed(Protocol::Netstring, command, serialized, start..end, 0)
}

/// Build a composite netstring batching `children` into one message.
///
/// Each child keeps its own indicator byte inside the composite payload.
pub fn encode_composite<'a>(children: impl IntoIterator<Item = &'a Packet>) -> Packet {
    let mut payload = Vec::new();
    for child in children {
        payload.extend_from_slice(child.serialized());
    }
    encode(COMPOSITE_COMMAND, &payload)
}

/// Split a composite packet's payload into its direct children.
///
/// Children may themselves be composites; this expands one level only.
pub fn expand_composite(packet: &Packet) -> Result<Vec<Packet>> {
    let mut children = Vec::new();
    let mut rest = packet.payload();
    while !rest.is_empty() {
        let (child, used) = crate::decode(rest)?;
        children.push(child);
        rest = &rest[used..];
    }
    Ok(children)
}

struct Frame {
    command: u32,
    /// Payload range relative to the start of the frame
    payload: std::ops::Range<usize>,
    consumed: usize,
}

fn parse_frame(buf: &[u8], max_len: usize) -> Result<Frame> {
    let mut length: usize = 0;
    let mut digits = 0;
    let colon = loop {
        let Some(&byte) = buf.get(digits) else {
            return Err(Error::framing(
                FramingErrorKind::IncompletePacket,
                "stream ended while reading netstring length",
            ));
        };
        match byte {
            b':' if digits > 0 => break digits,
            b'0'..=b'9' if digits < MAX_LENGTH_DIGITS => {
                length = length * 10 + usize::from(byte - b'0');
                digits += 1;
            }
            _ => {
                return Err(Error::framing(
                    FramingErrorKind::MalformedLength,
                    "Expected digit reading length",
                ));
            }
        }
    };
    if length > max_len {
        return Err(Error::framing(
            FramingErrorKind::Oversized,
            format!("netstring length {length} exceeds limit {max_len}"),
        ));
    }

    let body_start = colon + 1;
    let body_end = body_start + length;
    if buf.len() <= body_end {
        return Err(Error::framing(
            FramingErrorKind::IncompletePacket,
            format!(
                "netstring declares {length} bytes, {} available",
                buf.len().saturating_sub(body_start)
            ),
        ));
    }
    if buf[body_end] != b',' {
        return Err(Error::framing(
            FramingErrorKind::MissingTerminator,
            "netstring not terminated by ','",
        ));
    }

    let body = &buf[body_start..body_end];
    let command_end = body.iter().position(|&b| b == b' ').unwrap_or(body.len());
    let command_digits = &body[..command_end];
    if command_digits.is_empty() || !command_digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::framing(
            FramingErrorKind::MalformedCommand,
            "Expected digit reading command",
        ));
    }
    let command = std::str::from_utf8(command_digits)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| {
            Error::framing(FramingErrorKind::MalformedCommand, "command out of range")
        })?;

    let payload_start = (body_start + command_end + 1).min(body_end);
    Ok(Frame {
        command,
        payload: payload_start..body_end,
        consumed: body_end + 1,
    })
}
