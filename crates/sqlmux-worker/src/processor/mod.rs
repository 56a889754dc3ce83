//! Session command processor.
//!
//! [`Processor`] owns one backend connection and one [`Session`], and turns
//! each decoded request into the packets to write back. Requests are
//! dispatched on the packet's protocol tag to the native netstring table or
//! the MySQL table; the two never share command codes.
//!
//! Recoverable failures (bad SQL, bind mistakes, backend query errors) come
//! back as `Outcome::Ok` carrying an error reply. `Outcome::Err` is reserved
//! for conditions that end the session.

use crate::adapter::DatabaseAdapter;
use crate::config::WorkerConfig;
use crate::eor::ResponseCoder;
use crate::session::Session;
use crate::sql_parser::SqlParser;
use asupersync::{Cx, Outcome};
use sqlmux_core::{Backend, ConnectionError, ConnectionErrorKind, Error, Result};
use sqlmux_wire::{EorCode, Packet, Protocol};

/// Await a backend call, splitting its outcome three ways.
///
/// Yields `Ok(value)` or `Err(recoverable)`; fatal errors, cancellation and
/// panics return from the enclosing function. An error after which the
/// connection must be replaced also switches the EOR code to `Restart`.
macro_rules! backend_try {
    ($self:ident, $call:expr) => {
        match $call {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(e) => {
                if $self.adapter.should_recycle(&e) {
                    $self.recycle = true;
                    $self.coder.set_restart();
                }
                if e.is_recoverable() {
                    Err(e)
                } else {
                    tracing::error!(error = %e, "fatal backend error");
                    return Outcome::Err(e);
                }
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

mod mysql;
mod netstring;

/// Per-connection command processor.
pub struct Processor<B: Backend, A: DatabaseAdapter> {
    backend: B,
    adapter: A,
    parser: SqlParser,
    session: Session<B>,
    coder: ResponseCoder,
    use_bind_names: bool,
    quit: bool,
    recycle: bool,
}

impl<B: Backend, A: DatabaseAdapter> Processor<B, A> {
    /// Create a processor with the default configuration.
    pub fn new(backend: B, adapter: A) -> Result<Self> {
        Self::with_config(backend, adapter, &WorkerConfig::default())
    }

    pub fn with_config(backend: B, adapter: A, config: &WorkerConfig) -> Result<Self> {
        config.validate()?;
        let use_bind_names = config
            .use_bind_names
            .unwrap_or_else(|| adapter.use_bind_names());
        Ok(Self {
            backend,
            adapter,
            parser: SqlParser::new()?,
            session: Session::new(),
            coder: ResponseCoder::new(),
            use_bind_names,
            quit: false,
            recycle: false,
        })
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Give the backend connection back, e.g. to return it to a pool.
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Transaction/cursor state after the last command.
    pub fn current_state(&self) -> EorCode {
        self.session.state()
    }

    /// Tell the next EOR whether the reader holds more requests.
    pub fn set_more_pending(&mut self, more: bool) {
        self.coder.set_more_pending(more);
    }

    pub fn coder_mut(&mut self) -> &mut ResponseCoder {
        &mut self.coder
    }

    /// Did the client send COM_QUIT?
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Did the backend report an error after which the connection should be
    /// replaced?
    pub fn recycle_requested(&self) -> bool {
        self.recycle
    }

    /// Process one request and return the packets to write, in order.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, packet),
        fields(command = packet.command(), protocol = %packet.protocol())
    )]
    pub async fn process_command(&mut self, cx: &Cx, packet: &Packet) -> Outcome<Vec<Packet>, Error> {
        let from = self.current_state();
        let outcome = match packet.protocol() {
            Protocol::Netstring => self.process_netstring(cx, packet).await,
            Protocol::MySql => self.process_mysql(cx, packet).await,
        };
        let to = self.current_state();
        if from != to {
            tracing::debug!(from = %from, to = %to, "session state changed");
        }
        outcome
    }

    /// Check that the backend connection is alive.
    pub async fn send_db_heartbeat(&mut self, cx: &Cx) -> Outcome<(), Error> {
        match self.backend.ping(cx).await {
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "backend heartbeat failed");
                Outcome::Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Lost,
                    message: format!("heartbeat failed: {e}"),
                    source: Some(Box::new(e)),
                }))
            }
            other => other,
        }
    }

    /// Release everything the session holds on the backend.
    ///
    /// Drops the cursor, closes every statement and rolls back an open
    /// transaction. Recoverable failures are logged and skipped; the first
    /// fatal one is returned after the rest of the cleanup has run.
    pub async fn teardown(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let mut first_fatal: Option<Error> = None;
        let mut note = |e: Error, what: &str| {
            tracing::warn!(error = %e, what, "teardown step failed");
            if e.is_fatal() && first_fatal.is_none() {
                first_fatal = Some(e);
            }
        };

        self.session.cursor = None;

        let mut handles: Vec<B::Statement> = self.session.reset_statement().into_iter().collect();
        handles.extend(self.session.statements.drain().map(|(_, p)| p.handle));
        for handle in handles {
            match self.backend.close_statement(cx, handle).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => note(e, "close statement"),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        if let Some(tx) = self.session.tx.take() {
            tracing::debug!("rolling back open transaction at teardown");
            match self.backend.rollback(cx, tx).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => note(e, "rollback"),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        match first_fatal {
            Some(e) => Outcome::Err(e),
            None => Outcome::Ok(()),
        }
    }
}
