//! Per-connection worker loop.
//!
//! One worker serves one client connection: it reads a request, hands it to
//! the [`Processor`], writes every reply before reading the next request,
//! and tears the session down however the loop ends.
//!
//! The client side is any asupersync [`AsyncRead`]/[`AsyncWrite`] pair. A
//! TCP client is split into its two halves; in-memory buffers serve as well.

use crate::adapter::DatabaseAdapter;
use crate::config::WorkerConfig;
use crate::processor::Processor;
use asupersync::io::{AsyncRead, AsyncWrite};
use asupersync::net::{OwnedReadHalf, OwnedWriteHalf, TcpStream};
use asupersync::time::{timeout, wall_now};
use asupersync::{Cx, Outcome};
use sqlmux_core::{Backend, Error, Result};
use sqlmux_wire::{DecodeStrategy, Packet, PacketStream};
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its side of the connection
    ClientClosed,
    /// The client sent COM_QUIT
    ClientQuit,
    /// No request arrived within the idle timeout
    IdleTimeout,
    /// The backend reported an error after which it should be replaced
    RecycleRequested,
}

/// Serves one client connection.
pub struct Worker<R, W, B: Backend, A: DatabaseAdapter> {
    reader: PacketStream<R>,
    writer: W,
    processor: Processor<B, A>,
    idle_timeout: Option<Duration>,
}

impl<B: Backend, A: DatabaseAdapter> Worker<OwnedReadHalf, OwnedWriteHalf, B, A> {
    /// Serve an accepted TCP client.
    pub fn from_tcp(stream: TcpStream, processor: Processor<B, A>, config: &WorkerConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, processor, config))
    }
}

impl<R, W, B, A> Worker<R, W, B, A>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    B: Backend,
    A: DatabaseAdapter,
{
    pub fn new(reader: R, writer: W, processor: Processor<B, A>, config: &WorkerConfig) -> Self {
        let reader = PacketStream::with_strategy(
            reader,
            DecodeStrategy::Tagged {
                first: config.first_protocol,
            },
        )
        .read_buffer_size(config.read_buffer_size)
        .max_message_size(config.max_message_size);
        Self {
            reader,
            writer,
            processor,
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn processor(&self) -> &Processor<B, A> {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut Processor<B, A> {
        &mut self.processor
    }

    pub fn into_parts(self) -> (PacketStream<R>, W, Processor<B, A>) {
        (self.reader, self.writer, self.processor)
    }

    /// Serve requests until the client leaves, then release the session.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn run(&mut self, cx: &Cx) -> Outcome<SessionEnd, Error> {
        let served = self.serve(cx).await;
        match &served {
            Outcome::Ok(end) => tracing::debug!(end = ?end, "session ended"),
            Outcome::Err(e) => tracing::error!(error = %e, "session failed"),
            Outcome::Cancelled(_) => tracing::debug!("session cancelled"),
            Outcome::Panicked(_) => tracing::error!("session panicked"),
        }

        match self.processor.teardown(cx).await {
            Outcome::Ok(()) => served,
            Outcome::Err(e) => match served {
                Outcome::Ok(_) => Outcome::Err(e),
                other => {
                    tracing::warn!(error = %e, "teardown failed after session end");
                    other
                }
            },
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn serve(&mut self, cx: &Cx) -> Outcome<SessionEnd, Error> {
        loop {
            if cx.is_cancel_requested() {
                return cancelled(cx);
            }

            let packet = match self.next_request(cx).await {
                Ok(Some(packet)) => packet,
                Ok(None) => return Outcome::Ok(SessionEnd::ClientClosed),
                Err(Error::Timeout) => return Outcome::Ok(SessionEnd::IdleTimeout),
                Err(Error::Cancelled) => return cancelled(cx),
                Err(Error::Io(e)) if is_disconnect(e.kind()) => {
                    return Outcome::Ok(SessionEnd::ClientClosed);
                }
                Err(e) => return Outcome::Err(e),
            };

            self.processor.set_more_pending(self.reader.has_buffered());
            let replies = match self.processor.process_command(cx, &packet).await {
                Outcome::Ok(replies) => replies,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            match self.write_replies(&replies).await {
                Ok(()) => {}
                Err(e) if is_disconnect(e.kind()) => return Outcome::Ok(SessionEnd::ClientClosed),
                Err(e) => return Outcome::Err(Error::Io(e)),
            }

            if self.processor.quit_requested() {
                return Outcome::Ok(SessionEnd::ClientQuit);
            }
            if self.processor.recycle_requested() {
                return Outcome::Ok(SessionEnd::RecycleRequested);
            }
        }
    }

    /// Wait for the next request, bounded by the idle timeout.
    async fn next_request(&mut self, cx: &Cx) -> Result<Option<Packet>> {
        let read = self.reader.read_next_async(cx);
        match self.idle_timeout {
            Some(idle) => timeout(wall_now(), idle, read)
                .await
                .unwrap_or(Err(Error::Timeout)),
            None => read.await,
        }
    }

    async fn write_replies(&mut self, replies: &[Packet]) -> std::io::Result<()> {
        if replies.is_empty() {
            return Ok(());
        }
        for reply in replies {
            write_all(&mut self.writer, reply.serialized()).await?;
        }
        let writer = &mut self.writer;
        std::future::poll_fn(|cx| Pin::new(&mut *writer).poll_flush(cx)).await
    }
}

/// Loop on `poll_write` until every byte is accepted.
async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        let n = std::future::poll_fn(|cx| Pin::new(&mut *writer).poll_write(cx, &bytes[written..])).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                ErrorKind::WriteZero,
                "connection closed while writing reply",
            ));
        }
        written += n;
    }
    Ok(())
}

fn cancelled<T>(cx: &Cx) -> Outcome<T, Error> {
    match cx.cancel_reason() {
        Some(reason) => Outcome::Cancelled(reason),
        None => Outcome::Err(Error::Cancelled),
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
            | ErrorKind::WriteZero
    )
}
