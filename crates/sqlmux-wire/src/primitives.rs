//! Byte-level helpers shared by both protocol decoders.
//!
//! Fixed-width little-endian integers (1, 2, 3, 4, 6 and 8 bytes), MySQL
//! length-encoded integers, and the four string encodings: null-terminated,
//! fixed-length, rest-of-packet and length-prefixed.

#![allow(clippy::cast_possible_truncation)]

/// Marker byte for a NULL length-encoded value.
pub const LENENC_NULL: u8 = 0xFB;

/// The four string encodings of the MySQL wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    /// Bytes followed by 0x00
    NullTerminated,
    /// Exactly `n` bytes, zero padded
    Fixed(usize),
    /// Everything up to the end of the payload
    Eof,
    /// Length-encoded integer, then that many bytes
    LengthEncoded,
}

/// A cursor over a payload.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset into the data.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if we've reached the end of the data.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos)?;
        self.pos += 1;
        Some(*byte)
    }

    /// Read an unsigned little-endian integer of `width` bytes (1..=8).
    pub fn read_uint_le(&mut self, width: usize) -> Option<u64> {
        debug_assert!((1..=8).contains(&width));
        let bytes = self.read_bytes(width)?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0_u64, |acc, &b| (acc << 8) | u64::from(b)),
        )
    }

    /// Read a u16 (little-endian).
    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.read_uint_le(2).map(|v| v as u16)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Option<u32> {
        self.read_uint_le(3).map(|v| v as u32)
    }

    /// Read a u32 (little-endian).
    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.read_uint_le(4).map(|v| v as u32)
    }

    /// Read a u48 (little-endian, 6 bytes).
    pub fn read_u48_le(&mut self) -> Option<u64> {
        self.read_uint_le(6)
    }

    /// Read a u64 (little-endian).
    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.read_uint_le(8)
    }

    /// Read a length-encoded integer.
    ///
    /// MySQL uses a variable-length integer encoding:
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - 0xFB: NULL (special case for length-encoded strings)
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => None,
        }
    }

    /// Read a string in the given encoding, as raw bytes.
    ///
    /// `Fixed` strings keep their padding; `NullTerminated` consumes the
    /// terminator and fails if it is missing.
    pub fn read_str(&mut self, kind: StringKind) -> Option<&'a [u8]> {
        match kind {
            StringKind::NullTerminated => {
                let rest = &self.data[self.pos.min(self.data.len())..];
                let end = rest.iter().position(|&b| b == 0)?;
                let s = &rest[..end];
                self.pos += end + 1;
                Some(s)
            }
            StringKind::Fixed(len) => self.read_bytes(len),
            StringKind::Eof => Some(self.read_rest()),
            StringKind::LengthEncoded => {
                let len = usize::try_from(self.read_lenenc_int()?).ok()?;
                self.read_bytes(len)
            }
        }
    }

    /// Read a length-encoded string.
    pub fn read_lenenc_string(&mut self) -> Option<String> {
        self.read_str(StringKind::LengthEncoded)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read a null-terminated string.
    pub fn read_null_string(&mut self) -> Option<String> {
        self.read_str(StringKind::NullTerminated)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    /// Read remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, n: usize) -> bool {
        if self.remaining() >= n {
            self.pos += n;
            true
        } else {
            false
        }
    }
}

/// A growable output buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the buffer as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write the low `width` bytes of `value`, little-endian.
    pub fn write_uint_le(&mut self, value: u64, width: usize) {
        debug_assert!((1..=8).contains(&width));
        self.buffer.extend_from_slice(&value.to_le_bytes()[..width]);
    }

    /// Write a u16 (little-endian).
    pub fn write_u16_le(&mut self, value: u16) {
        self.write_uint_le(u64::from(value), 2);
    }

    /// Write a u24 (little-endian, 3 bytes).
    pub fn write_u24_le(&mut self, value: u32) {
        self.write_uint_le(u64::from(value), 3);
    }

    /// Write a u32 (little-endian).
    pub fn write_u32_le(&mut self, value: u32) {
        self.write_uint_le(u64::from(value), 4);
    }

    /// Write a u48 (little-endian, 6 bytes).
    pub fn write_u48_le(&mut self, value: u64) {
        self.write_uint_le(value, 6);
    }

    /// Write a u64 (little-endian).
    pub fn write_u64_le(&mut self, value: u64) {
        self.write_uint_le(value, 8);
    }

    /// Write a length-encoded integer.
    ///
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC + 2 bytes: values up to 2^16
    /// - 0xFD + 3 bytes: values up to 2^24
    /// - 0xFE + 8 bytes: values up to 2^64
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.write_u8(value as u8);
        } else if value < 0x10000 {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value < 0x0100_0000 {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    /// Write the NULL marker used in text result rows.
    pub fn write_lenenc_null(&mut self) {
        self.write_u8(LENENC_NULL);
    }

    /// Write a string in the given encoding.
    ///
    /// `Fixed(n)` truncates or zero-pads to exactly `n` bytes.
    pub fn write_str(&mut self, data: &[u8], kind: StringKind) {
        match kind {
            StringKind::NullTerminated => {
                self.buffer.extend_from_slice(data);
                self.buffer.push(0);
            }
            StringKind::Fixed(len) => {
                if data.len() >= len {
                    self.buffer.extend_from_slice(&data[..len]);
                } else {
                    self.buffer.extend_from_slice(data);
                    self.write_zeros(len - data.len());
                }
            }
            StringKind::Eof => self.buffer.extend_from_slice(data),
            StringKind::LengthEncoded => {
                self.write_lenenc_int(data.len() as u64);
                self.buffer.extend_from_slice(data);
            }
        }
    }

    /// Write a length-encoded string.
    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_str(s.as_bytes(), StringKind::LengthEncoded);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write zeros (padding).
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }
}

/// Encoded size of a length-encoded integer.
pub const fn lenenc_int_len(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < 0x10000 {
        3
    } else if value < 0x0100_0000 {
        4
    } else {
        9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_ints() {
        let mut w = ByteWriter::new();
        w.write_u8(0x12);
        w.write_u16_le(0x3456);
        w.write_u24_le(0x0078_9abc);
        w.write_u32_le(0xdead_beef);
        w.write_u48_le(0x0000_1122_3344_5566);
        w.write_u64_le(u64::MAX - 1);
        assert_eq!(w.len(), 1 + 2 + 3 + 4 + 6 + 8);
        assert_eq!(&w.as_bytes()[..6], &[0x12, 0x56, 0x34, 0xbc, 0x9a, 0x78]);

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u8(), Some(0x12));
        assert_eq!(r.read_u16_le(), Some(0x3456));
        assert_eq!(r.read_u24_le(), Some(0x0078_9abc));
        assert_eq!(r.read_u32_le(), Some(0xdead_beef));
        assert_eq!(r.read_u48_le(), Some(0x0000_1122_3344_5566));
        assert_eq!(r.read_u64_le(), Some(u64::MAX - 1));
        assert!(r.is_empty());
        assert_eq!(r.read_u8(), None);
    }

    #[test]
    fn test_lenenc_boundaries() {
        let cases: [(u64, &[u8]); 6] = [
            (0, &[0x00]),
            (250, &[0xFA]),
            (251, &[0xFC, 0xFB, 0x00]),
            (0xFFFF, &[0xFC, 0xFF, 0xFF]),
            (0x10000, &[0xFD, 0x00, 0x00, 0x01]),
            (0x0100_0000, &[0xFE, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]),
        ];
        for (value, expected) in cases {
            let mut w = ByteWriter::new();
            w.write_lenenc_int(value);
            assert_eq!(w.as_bytes(), expected, "encoding {value}");
            assert_eq!(lenenc_int_len(value), expected.len());
            let mut r = ByteReader::new(expected);
            assert_eq!(r.read_lenenc_int(), Some(value));
        }
    }

    #[test]
    fn test_lenenc_null_marker() {
        let mut r = ByteReader::new(&[0xFB]);
        assert_eq!(r.read_lenenc_int(), None);
    }

    #[test]
    fn test_string_kinds() {
        let mut w = ByteWriter::new();
        w.write_str(b"abc", StringKind::NullTerminated);
        w.write_str(b"de", StringKind::Fixed(4));
        w.write_str(b"hello", StringKind::LengthEncoded);
        w.write_str(b"tail", StringKind::Eof);
        assert_eq!(w.as_bytes(), b"abc\0de\0\0\x05hellotail");

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_str(StringKind::NullTerminated), Some(&b"abc"[..]));
        assert_eq!(r.read_str(StringKind::Fixed(4)), Some(&b"de\0\0"[..]));
        assert_eq!(r.read_lenenc_string().as_deref(), Some("hello"));
        assert_eq!(r.read_rest_string(), "tail");
    }

    #[test]
    fn test_null_string_without_terminator_fails() {
        let mut r = ByteReader::new(b"abc");
        assert_eq!(r.read_null_string(), None);
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_fixed_string_truncates() {
        let mut w = ByteWriter::new();
        w.write_str(b"abcdef", StringKind::Fixed(3));
        assert_eq!(w.as_bytes(), b"abc");
    }
}
