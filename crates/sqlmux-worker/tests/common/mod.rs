//! Mock backend and helpers shared by the processor integration tests.

#![allow(dead_code)]
#![allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use sqlmux_core::{
    Arguments, Backend, ColumnMeta, ConnectionErrorKind, Cursor, Error, ExecResult, QueryErrorKind,
    Row,
};
use sqlmux_wire::{EorCode, Packet, netstring};
use sqlmux_worker::eor::parse_eor;
use sqlmux_worker::{MySqlAdapter, Processor};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Everything the mock saw, plus the canned answers it gives.
#[derive(Debug, Default)]
pub struct MockState {
    pub prepared: Vec<String>,
    pub executed: Vec<(String, Arguments)>,
    pub queried: Vec<(String, Arguments)>,
    pub closed: Vec<String>,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub pings: usize,

    pub result: ExecResult,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub fail_prepare: Option<String>,
    pub fail_execute: Option<String>,
    /// Database error code attached to `fail_execute`
    pub fail_code: Option<u16>,
    pub fail_commit: Option<String>,
    pub connection_lost: bool,
}

#[derive(Debug)]
pub struct MockStatement {
    pub sql: String,
}

#[derive(Debug)]
pub struct MockCursor {
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Row>,
}

#[derive(Debug)]
pub struct MockTransaction;

#[derive(Debug, Clone)]
pub struct MockBackend {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }

    /// Connection-lost error when the mock is "unplugged".
    fn lost(&self) -> Option<Error> {
        let guard = self.state.lock().expect("lock poisoned");
        guard
            .connection_lost
            .then(|| Error::connection(ConnectionErrorKind::Lost, "server has gone away"))
    }
}

fn execution_error(message: String, code: Option<u16>) -> Error {
    match Error::query(QueryErrorKind::Execution, message) {
        Error::Query(mut q) => {
            q.code = code;
            Error::Query(q)
        }
        other => other,
    }
}

impl Cursor for MockCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let next = self.rows.pop_front();
        async move { Outcome::Ok(next) }
    }
}

impl Backend for MockBackend {
    type Statement = MockStatement;
    type Cursor = MockCursor;
    type Transaction = MockTransaction;

    fn prepare(
        &mut self,
        _cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<Self::Statement, Error>> + Send {
        let state = Arc::clone(&self.state);
        let lost = self.lost();
        let sql = sql.to_string();
        async move {
            if let Some(e) = lost {
                return Outcome::Err(e);
            }
            let mut guard = state.lock().expect("lock poisoned");
            guard.prepared.push(sql.clone());
            if let Some(message) = guard.fail_prepare.clone() {
                return Outcome::Err(Error::query(QueryErrorKind::Syntax, message));
            }
            Outcome::Ok(MockStatement { sql })
        }
    }

    fn execute(
        &mut self,
        _cx: &Cx,
        stmt: &Self::Statement,
        args: &Arguments,
    ) -> impl Future<Output = Outcome<ExecResult, Error>> + Send {
        let state = Arc::clone(&self.state);
        let lost = self.lost();
        let call = (stmt.sql.clone(), args.clone());
        async move {
            if let Some(e) = lost {
                return Outcome::Err(e);
            }
            let mut guard = state.lock().expect("lock poisoned");
            guard.executed.push(call);
            if let Some(message) = guard.fail_execute.clone() {
                return Outcome::Err(execution_error(message, guard.fail_code));
            }
            Outcome::Ok(guard.result.clone())
        }
    }

    fn query(
        &mut self,
        _cx: &Cx,
        stmt: &Self::Statement,
        args: &Arguments,
    ) -> impl Future<Output = Outcome<Self::Cursor, Error>> + Send {
        let state = Arc::clone(&self.state);
        let lost = self.lost();
        let call = (stmt.sql.clone(), args.clone());
        async move {
            if let Some(e) = lost {
                return Outcome::Err(e);
            }
            let mut guard = state.lock().expect("lock poisoned");
            guard.queried.push(call);
            if let Some(message) = guard.fail_execute.clone() {
                return Outcome::Err(execution_error(message, guard.fail_code));
            }
            Outcome::Ok(MockCursor {
                columns: guard.columns.clone(),
                rows: guard.rows.iter().cloned().collect(),
            })
        }
    }

    fn close_statement(
        &mut self,
        _cx: &Cx,
        stmt: Self::Statement,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().expect("lock poisoned").closed.push(stmt.sql);
            Outcome::Ok(())
        }
    }

    fn begin(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Transaction, Error>> + Send {
        let state = Arc::clone(&self.state);
        let lost = self.lost();
        async move {
            if let Some(e) = lost {
                return Outcome::Err(e);
            }
            state.lock().expect("lock poisoned").begins += 1;
            Outcome::Ok(MockTransaction)
        }
    }

    fn commit(
        &mut self,
        _cx: &Cx,
        _tx: Self::Transaction,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.commits += 1;
            match guard.fail_commit.clone() {
                Some(message) => Outcome::Err(Error::query(QueryErrorKind::Database, message)),
                None => Outcome::Ok(()),
            }
        }
    }

    fn rollback(
        &mut self,
        _cx: &Cx,
        _tx: Self::Transaction,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().expect("lock poisoned").rollbacks += 1;
            Outcome::Ok(())
        }
    }

    fn ping(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let state = Arc::clone(&self.state);
        let lost = self.lost();
        async move {
            state.lock().expect("lock poisoned").pings += 1;
            match lost {
                Some(e) => Outcome::Err(e),
                None => Outcome::Ok(()),
            }
        }
    }
}

pub type TestProcessor = Processor<MockBackend, MySqlAdapter>;

pub fn processor() -> (TestProcessor, Arc<Mutex<MockState>>) {
    let state = Arc::new(Mutex::new(MockState::default()));
    let processor = Processor::new(MockBackend::new(Arc::clone(&state)), MySqlAdapter::new())
        .expect("processor");
    (processor, state)
}

pub fn block_on<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

/// Send one native command and return the replies.
pub async fn send(p: &mut TestProcessor, cx: &Cx, command: u32, payload: &[u8]) -> Vec<Packet> {
    let packet = netstring::encode(command, payload);
    unwrap_outcome(p.process_command(cx, &packet).await)
}

/// Split an EOR into its code, request id and decoded inner packets.
pub fn open_eor(packet: &Packet) -> (EorCode, u16, Vec<Packet>) {
    assert_eq!(packet.command(), 502, "not an EOR: {packet:?}");
    let (code, id, mut rest) = parse_eor(packet.payload()).expect("well-formed EOR");
    let mut inner = Vec::new();
    while !rest.is_empty() {
        let (p, used) = sqlmux_wire::decode(rest).expect("inner packet");
        inner.push(p);
        rest = &rest[used..];
    }
    (code, id, inner)
}

/// Payloads of the leaves of a composite.
pub fn leaves(packet: &Packet) -> Vec<String> {
    sqlmux_wire::stream::flatten(packet)
        .expect("flatten")
        .iter()
        .map(|p| p.payload_str().into_owned())
        .collect()
}
