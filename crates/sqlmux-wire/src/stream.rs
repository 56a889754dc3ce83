//! Packet stream reader.
//!
//! Pulls one logical packet at a time off a byte stream, either a blocking
//! [`Read`] source or an asupersync [`AsyncRead`] one. Composite netstrings
//! are flattened, depth first and in arrival order, into a queue that is
//! served before the underlying stream is read again.

use crate::netstring;
use crate::packet::{Packet, Protocol};
use asupersync::Cx;
use asupersync::io::{AsyncRead, ReadBuf};
use sqlmux_core::{Error, FramingErrorKind, Result};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::pin::Pin;
use std::task::Poll;

/// Default size of a single read from the underlying stream.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;
/// Default cap on one message's declared length.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// How the reader decides which protocol decoder to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Every message carries an indicator byte. Try `first`, and on
    /// `WrongPacketKind` retry the other decoder at the same position.
    Tagged { first: Protocol },
    /// Messages carry no indicator (client side of the transport).
    Untagged(Protocol),
}

impl Default for DecodeStrategy {
    fn default() -> Self {
        DecodeStrategy::Tagged {
            first: Protocol::Netstring,
        }
    }
}

/// Whether sub-packets of a composite are queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    Draining,
}

/// Reads [`Packet`]s from a [`Read`] or [`AsyncRead`] source.
#[derive(Debug)]
pub struct PacketStream<R> {
    inner: R,
    buf: Vec<u8>,
    pending: VecDeque<Packet>,
    strategy: DecodeStrategy,
    read_buffer_size: usize,
    max_message_size: usize,
    eof: bool,
}

/// What the buffered bytes yield without another read.
enum Buffered {
    Packet(Packet),
    /// Nothing buffered; the stream may end cleanly here
    Empty,
    /// Part of a message is buffered; ending here is this error
    Partial(Error),
}

impl<R> PacketStream<R> {
    /// Create a reader using the default tagged strategy.
    pub fn new(inner: R) -> Self {
        Self::with_strategy(inner, DecodeStrategy::default())
    }

    pub fn with_strategy(inner: R, strategy: DecodeStrategy) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pending: VecDeque::new(),
            strategy,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            eof: false,
        }
    }

    /// Set the size of each read from the underlying stream.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the largest accepted message.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn state(&self) -> ReadState {
        if self.pending.is_empty() {
            ReadState::Idle
        } else {
            ReadState::Draining
        }
    }

    /// Are more requests already available without blocking?
    pub fn has_buffered(&self) -> bool {
        !self.pending.is_empty() || !self.buf.is_empty()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Serve the next packet from what has already been read.
    fn take_buffered(&mut self) -> Result<Buffered> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Buffered::Packet(packet));
        }
        while !self.buf.is_empty() {
            match self.decode_front() {
                Ok((packet, used)) => {
                    self.buf.drain(..used);
                    if !packet.is_composite() {
                        return Ok(Buffered::Packet(packet));
                    }
                    tracing::trace!(bytes = used, "expanding composite packet");
                    flatten_into(&packet, &mut self.pending)?;
                    if let Some(first) = self.pending.pop_front() {
                        return Ok(Buffered::Packet(first));
                    }
                    // An empty composite carries nothing to serve.
                }
                Err(e) if e.framing_kind() == Some(FramingErrorKind::IncompletePacket) => {
                    return Ok(Buffered::Partial(e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Buffered::Empty)
    }

    fn decode_front(&self) -> Result<(Packet, usize)> {
        let max = self.max_message_size;
        match self.strategy {
            DecodeStrategy::Tagged { first } => match decode_tagged(first, &self.buf, max) {
                Err(e) if e.is_wrong_packet_kind() => decode_tagged(first.other(), &self.buf, max),
                other => other,
            },
            DecodeStrategy::Untagged(Protocol::Netstring) => {
                netstring::decode_untagged(&self.buf, max)
            }
            DecodeStrategy::Untagged(Protocol::MySql) => {
                crate::mysql::decode_untagged(&self.buf, max)
            }
        }
    }

    /// Record the result of one read into `chunk`. Returns `false` at end
    /// of stream.
    fn absorb(&mut self, read: std::io::Result<usize>, chunk: &[u8]) -> Result<bool> {
        match read {
            Ok(0) => {
                self.eof = true;
                Ok(false)
            }
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(Error::Timeout)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl<R: Read> PacketStream<R> {
    /// Read the next logical packet.
    ///
    /// `Ok(None)` is a clean end of stream at a message boundary. A stream
    /// that ends mid-message yields `IncompletePacket`; a read timeout yields
    /// [`Error::Timeout`].
    pub fn read_next(&mut self) -> Result<Option<Packet>> {
        loop {
            let incomplete = match self.take_buffered()? {
                Buffered::Packet(packet) => return Ok(Some(packet)),
                Buffered::Empty => None,
                Buffered::Partial(e) => Some(e),
            };
            if self.eof || !self.fill()? {
                return incomplete.map_or(Ok(None), Err);
            }
        }
    }

    /// Append one read's worth of bytes. Returns `false` at end of stream.
    fn fill(&mut self) -> Result<bool> {
        let mut chunk = vec![0_u8; self.read_buffer_size];
        loop {
            match self.inner.read(&mut chunk) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                read => return self.absorb(read, &chunk),
            }
        }
    }
}

impl<R: AsyncRead + Unpin> PacketStream<R> {
    /// Read the next logical packet from an async source.
    ///
    /// Same results as [`read_next`](Self::read_next). A cancellation
    /// request on `cx` ends the wait for bytes with [`Error::Cancelled`].
    pub async fn read_next_async(&mut self, cx: &Cx) -> Result<Option<Packet>> {
        loop {
            let incomplete = match self.take_buffered()? {
                Buffered::Packet(packet) => return Ok(Some(packet)),
                Buffered::Empty => None,
                Buffered::Partial(e) => Some(e),
            };
            if self.eof || !self.fill_async(cx).await? {
                return incomplete.map_or(Ok(None), Err);
            }
        }
    }

    async fn fill_async(&mut self, cx: &Cx) -> Result<bool> {
        let mut chunk = vec![0_u8; self.read_buffer_size];
        loop {
            let inner = &mut self.inner;
            let read = std::future::poll_fn(|task| {
                if cx.is_cancel_requested() {
                    return Poll::Ready(None);
                }
                let mut read_buf = ReadBuf::new(&mut chunk);
                Pin::new(&mut *inner)
                    .poll_read(task, &mut read_buf)
                    .map(|done| Some(done.map(|()| read_buf.filled().len())))
            })
            .await;
            match read {
                None => return Err(Error::Cancelled),
                Some(Err(e)) if e.kind() == ErrorKind::Interrupted => continue,
                Some(read) => return self.absorb(read, &chunk),
            }
        }
    }
}

fn decode_tagged(protocol: Protocol, buf: &[u8], max: usize) -> Result<(Packet, usize)> {
    match protocol {
        Protocol::Netstring => netstring::decode_bounded(buf, max),
        Protocol::MySql => crate::mysql::decode_bounded(buf, max),
    }
}

/// Queue the leaves of a composite in order, expanding nested composites.
fn flatten_into(packet: &Packet, out: &mut VecDeque<Packet>) -> Result<()> {
    for child in netstring::expand_composite(packet)? {
        if child.is_composite() {
            flatten_into(&child, out)?;
        } else {
            out.push_back(child);
        }
    }
    Ok(())
}

/// Flatten a packet into its leaf packets (a non-composite yields itself).
pub fn flatten(packet: &Packet) -> Result<Vec<Packet>> {
    if !packet.is_composite() {
        return Ok(vec![packet.clone()]);
    }
    let mut out = VecDeque::new();
    flatten_into(packet, &mut out)?;
    Ok(out.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netstring::{encode, encode_composite};
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len() - self.pos);
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_reads_mixed_protocols() {
        let mut bytes = encode(502, b"0").into_serialized();
        bytes.extend_from_slice(&[0, 1, 0, 0, 0, 1]);
        bytes.extend_from_slice(encode(7, b"").serialized());

        let mut stream = PacketStream::new(Cursor::new(bytes));
        let a = stream.read_next().expect("read").expect("packet");
        assert_eq!((a.protocol(), a.command()), (Protocol::Netstring, 502));
        let b = stream.read_next().expect("read").expect("packet");
        assert_eq!((b.protocol(), b.command()), (Protocol::MySql, 1));
        let c = stream.read_next().expect("read").expect("packet");
        assert_eq!(c.command(), 7);
        assert!(stream.read_next().expect("read").is_none());
    }

    #[test]
    fn test_mysql_first_strategy_falls_back() {
        let bytes = encode(3, b"x").into_serialized();
        let mut stream = PacketStream::with_strategy(
            Cursor::new(bytes),
            DecodeStrategy::Tagged {
                first: Protocol::MySql,
            },
        );
        let p = stream.read_next().expect("read").expect("packet");
        assert_eq!(p.protocol(), Protocol::Netstring);
        assert_eq!(p.payload(), b"x");
    }

    #[test]
    fn test_composite_drains_in_order() {
        let inner = encode_composite(&[encode(2, b":a"), encode(3, b"1")]);
        let outer = encode_composite(&[encode(1, b"select 1"), inner, encode(4, b"")]);
        let mut bytes = outer.into_serialized();
        bytes.extend_from_slice(encode(7, b"").serialized());

        let mut stream = PacketStream::new(Cursor::new(bytes));
        let first = stream.read_next().expect("read").expect("packet");
        assert_eq!(first.command(), 1);
        assert_eq!(stream.state(), ReadState::Draining);
        let rest: Vec<u32> = std::iter::from_fn(|| stream.read_next().expect("read"))
            .map(|p| p.command())
            .collect();
        assert_eq!(rest, vec![2, 3, 4, 7]);
        assert_eq!(stream.state(), ReadState::Idle);
    }

    #[test]
    fn test_partial_reads_are_reassembled() {
        let mut data = encode(1, b"select * from t where a = :a").into_serialized();
        data.extend_from_slice(&[0, 1, 0, 0, 0, 14]);
        let mut stream = PacketStream::new(Trickle { data, pos: 0, step: 3 });
        assert_eq!(stream.read_next().expect("read").expect("packet").command(), 1);
        assert_eq!(stream.read_next().expect("read").expect("packet").command(), 14);
        assert!(stream.read_next().expect("read").is_none());
    }

    #[test]
    fn test_truncated_stream_is_incomplete() {
        let mut stream = PacketStream::new(Cursor::new(b"\x015:502".to_vec()));
        let err = stream.read_next().expect_err("truncated");
        assert_eq!(err.framing_kind(), Some(FramingErrorKind::IncompletePacket));
    }

    #[test]
    fn test_unknown_indicator_is_not_retried() {
        let mut stream = PacketStream::new(Cursor::new(b"\x095:502 0,".to_vec()));
        let err = stream.read_next().expect_err("bad indicator");
        assert_eq!(err.framing_kind(), Some(FramingErrorKind::UnknownPacketKind));
    }

    #[test]
    fn test_untagged_client_stream() {
        let mut stream = PacketStream::with_strategy(
            Cursor::new(b"5:502 0,3:502,".to_vec()),
            DecodeStrategy::Untagged(Protocol::Netstring),
        );
        let a = stream.read_next().expect("read").expect("packet");
        assert_eq!(a.serialized(), b"\x015:502 0,");
        let b = stream.read_next().expect("read").expect("packet");
        assert!(b.is_empty());
    }

    #[test]
    fn test_has_buffered() {
        let mut bytes = encode(4, b"").into_serialized();
        bytes.extend_from_slice(encode(7, b"").serialized());
        let mut stream = PacketStream::new(Cursor::new(bytes)).read_buffer_size(1024);
        stream.read_next().expect("read");
        assert!(stream.has_buffered());
        stream.read_next().expect("read");
        assert!(!stream.has_buffered());
    }

    #[test]
    fn test_timeout_maps_to_timeout_error() {
        struct Stalled;
        impl Read for Stalled {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::WouldBlock, "idle"))
            }
        }
        let mut stream = PacketStream::new(Stalled);
        assert!(matches!(stream.read_next(), Err(Error::Timeout)));
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        let rt = asupersync::runtime::RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(future)
    }

    #[test]
    fn test_async_reads_mixed_protocols() {
        block_on(async {
            let cx = Cx::for_testing();
            let mut bytes = encode_composite(&[encode(3, b"a"), encode(4, b"b")]).serialized().to_vec();
            bytes.extend_from_slice(crate::mysql::encode(0, b"\x0e").serialized());
            let mut stream = PacketStream::new(Cursor::new(bytes)).read_buffer_size(3);

            let first = stream.read_next_async(&cx).await.expect("read").expect("packet");
            assert_eq!(first.payload(), b"a");
            assert!(stream.has_buffered());
            let second = stream.read_next_async(&cx).await.expect("read").expect("packet");
            assert_eq!(second.command(), 4);
            let third = stream.read_next_async(&cx).await.expect("read").expect("packet");
            assert_eq!(third.protocol(), Protocol::MySql);
            assert!(stream.read_next_async(&cx).await.expect("read").is_none());
        });
    }

    #[test]
    fn test_async_truncated_stream_is_incomplete() {
        block_on(async {
            let cx = Cx::for_testing();
            let mut stream = PacketStream::new(Cursor::new(b"\x0110:3 abc".to_vec()));
            let err = stream.read_next_async(&cx).await.expect_err("truncated");
            assert_eq!(err.framing_kind(), Some(FramingErrorKind::IncompletePacket));
        });
    }

    #[test]
    fn test_async_read_stops_on_cancel() {
        block_on(async {
            let cx = Cx::for_testing();
            let mut stream = PacketStream::new(Cursor::new(encode(3, b"a").serialized().to_vec()));
            cx.set_cancel_requested(true);
            assert!(matches!(stream.read_next_async(&cx).await, Err(Error::Cancelled)));
            cx.set_cancel_requested(false);
            let packet = stream.read_next_async(&cx).await.expect("read").expect("packet");
            assert_eq!(packet.payload(), b"a");
        });
    }
}
