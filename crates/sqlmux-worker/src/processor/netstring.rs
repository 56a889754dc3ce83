//! Native netstring command table.

use super::Processor;
use crate::adapter::DatabaseAdapter;
use crate::eor::{response, value};
use crate::session::{BindDirection, BindTable, decode_bind_value, sql_hash};
use asupersync::{Cx, Outcome};
use sqlmux_core::{
    Arguments, Backend, ColumnMeta, Cursor, Error, ExecResult, SessionErrorKind, Value,
};
use sqlmux_wire::netstring::encode_composite;
use sqlmux_wire::{DataType, NetstringCommand, Packet, ResponseCode, stream};

/// Largest precision or scale sent in column info.
const MAX_COLUMN_ATTRIBUTE: i64 = i32::MAX as i64;

enum Executed<C> {
    Rows(C),
    Done(ExecResult),
}

impl<B: Backend, A: DatabaseAdapter> Processor<B, A> {
    pub(super) async fn process_netstring(
        &mut self,
        cx: &Cx,
        packet: &Packet,
    ) -> Outcome<Vec<Packet>, Error> {
        if !packet.is_composite() {
            return self.dispatch_netstring(cx, packet).await;
        }
        let leaves = match stream::flatten(packet) {
            Ok(leaves) => leaves,
            Err(e) => return Outcome::Err(e),
        };
        let mut out = Vec::new();
        for leaf in &leaves {
            match self.dispatch_netstring(cx, leaf).await {
                Outcome::Ok(replies) => out.extend(replies),
                other => return other,
            }
        }
        Outcome::Ok(out)
    }

    async fn dispatch_netstring(&mut self, cx: &Cx, packet: &Packet) -> Outcome<Vec<Packet>, Error> {
        let Some(command) = NetstringCommand::from_code(packet.command()) else {
            tracing::warn!(command = packet.command(), "unknown netstring command ignored");
            return Outcome::Ok(Vec::new());
        };
        tracing::debug!(command = %command, payload_len = packet.len(), "dispatch");

        let payload = packet.payload();
        match command {
            NetstringCommand::Prepare
            | NetstringCommand::PrepareV2
            | NetstringCommand::PrepareSpecial => self.prepare(cx, payload).await,
            NetstringCommand::BindName => Outcome::Ok(self.bind_name(payload, BindDirection::In)),
            NetstringCommand::BindOutName => {
                Outcome::Ok(self.bind_name(payload, BindDirection::Out))
            }
            NetstringCommand::BindType => Outcome::Ok(self.bind_type(payload)),
            NetstringCommand::BindValue => Outcome::Ok(self.bind_value(payload)),
            NetstringCommand::BindNum => {
                self.session.defer_error(Error::session(
                    SessionErrorKind::BatchNotSupported,
                    "Batch not supported",
                ));
                Outcome::Ok(Vec::new())
            }
            NetstringCommand::Execute => self.execute(cx).await,
            NetstringCommand::Fetch => self.fetch(cx).await,
            NetstringCommand::ColsInfo => Outcome::Ok(self.cols_info()),
            NetstringCommand::Commit => self.end_transaction(cx, true).await,
            NetstringCommand::Rollback => self.end_transaction(cx, false).await,
            NetstringCommand::ClientCalCorrelationId => {
                let id = packet.payload_str().into_owned();
                tracing::debug!(correlation_id = %id, "correlation id set");
                self.session.correlation_id = Some(id);
                Outcome::Ok(Vec::new())
            }
            NetstringCommand::ClientInfo => {
                tracing::debug!(info = %packet.payload_str(), "client info");
                Outcome::Ok(vec![response(ResponseCode::Ok, b"")])
            }
            NetstringCommand::Composite => Outcome::Ok(Vec::new()),
            NetstringCommand::Rows
            | NetstringCommand::Cols
            | NetstringCommand::Backtrace
            | NetstringCommand::BindValueMaxSize
            | NetstringCommand::ShardKey
            | NetstringCommand::GetNumShards
            | NetstringCommand::SetShardId
            | NetstringCommand::ControlMsg
            | NetstringCommand::Eor => {
                tracing::debug!(command = %command, "command ignored");
                Outcome::Ok(Vec::new())
            }
        }
    }

    /// Prepare a statement; failures are held for the next execute.
    async fn prepare(&mut self, cx: &Cx, payload: &[u8]) -> Outcome<Vec<Packet>, Error> {
        if self.session.cursor.take().is_some() {
            tracing::debug!("open cursor dropped by prepare");
        }
        if let Some(old) = self.session.reset_statement() {
            if let Err(e) = backend_try!(self, self.backend.close_statement(cx, old).await) {
                tracing::warn!(error = %e, "closing previous statement failed");
            }
        }
        self.session.last_error = None;

        let sql = String::from_utf8_lossy(payload);
        let parsed = self.parser.parse(&sql, self.use_bind_names);
        self.session.sql_hash = sql_hash(&sql);
        self.session.binds = BindTable::from_names(&parsed.bind_names);
        self.session.kind = parsed.kind;
        tracing::debug!(
            sql_hash = self.session.sql_hash,
            binds = parsed.bind_names.len(),
            kind = ?parsed.kind,
            "prepare"
        );

        if self.session.tx.is_none() && parsed.kind.start_trans() {
            match backend_try!(self, self.backend.begin(cx).await) {
                Ok(tx) => self.session.tx = Some(tx),
                Err(e) => {
                    self.session.last_error = Some(e.client_message());
                    return Outcome::Ok(Vec::new());
                }
            }
        }

        match backend_try!(self, self.backend.prepare(cx, &parsed.sql).await) {
            Ok(stmt) => self.session.stmt = Some(stmt),
            Err(e) => {
                tracing::debug!(error = %e, "prepare failed");
                self.session.last_error = Some(e.client_message());
            }
        }
        Outcome::Ok(Vec::new())
    }

    fn bind_name(&mut self, payload: &[u8], direction: BindDirection) -> Vec<Packet> {
        if self.session.stmt.is_none() {
            tracing::debug!("bind name without a prepared statement ignored");
            return Vec::new();
        }
        let name = String::from_utf8_lossy(payload);
        match self.session.binds.get_mut(&name) {
            Some(slot) => {
                slot.direction = direction;
                slot.data_type = DataType::String;
                if direction == BindDirection::Out {
                    slot.value = Value::Null;
                    slot.supplied = true;
                }
                self.session.current_bind = Some(slot.name.clone());
            }
            None => {
                self.session.current_bind = None;
                self.session.defer_error(Error::session(
                    SessionErrorKind::BindNameNotFound,
                    format!("bindname not found in query: {name}"),
                ));
            }
        }
        Vec::new()
    }

    fn bind_type(&mut self, payload: &[u8]) -> Vec<Packet> {
        let Some(name) = self.session.current_bind.clone() else {
            return Vec::new();
        };
        match DataType::parse(payload) {
            Some(data_type) => {
                if let Some(slot) = self.session.binds.get_mut(&name) {
                    slot.data_type = data_type;
                }
            }
            None => self.session.defer_error(Error::session(
                SessionErrorKind::InvalidBindValue,
                format!("invalid bind type: {}", String::from_utf8_lossy(payload)),
            )),
        }
        Vec::new()
    }

    fn bind_value(&mut self, payload: &[u8]) -> Vec<Packet> {
        let Some(name) = self.session.current_bind.clone() else {
            tracing::debug!("bind value without a bind name ignored");
            return Vec::new();
        };
        let Some(data_type) = self.session.binds.get(&name).map(|s| s.data_type) else {
            return Vec::new();
        };
        match decode_bind_value(data_type, payload) {
            Ok(v) => {
                if let Some(slot) = self.session.binds.get_mut(&name) {
                    slot.value = v;
                    slot.supplied = true;
                    if slot.direction == BindDirection::Unset {
                        slot.direction = BindDirection::In;
                    }
                }
            }
            Err(e) => self.session.defer_error(e),
        }
        Vec::new()
    }

    fn arguments(&self) -> sqlmux_core::Result<Arguments> {
        if self.use_bind_names {
            self.session.binds.named_args().map(Arguments::Named)
        } else {
            self.session.binds.positional_values().map(Arguments::Positional)
        }
    }

    /// EOR carrying one error response, with the error recorded on the session.
    fn error_reply(&mut self, code: ResponseCode, message: String) -> Vec<Packet> {
        let reply = response(code, message.as_bytes());
        self.session.last_error = Some(message);
        vec![self.coder.eor(self.session.state(), &[reply])]
    }

    async fn execute(&mut self, cx: &Cx) -> Outcome<Vec<Packet>, Error> {
        if self.session.stmt.is_none() {
            let message = self
                .session
                .last_error
                .clone()
                .unwrap_or_else(|| "execute requested but no statement exists".to_string());
            return Outcome::Ok(self.error_reply(ResponseCode::SqlError, message));
        }
        if let Some(e) = self.session.pending_error.take() {
            return Outcome::Ok(self.error_reply(ResponseCode::SqlError, e.client_message()));
        }
        let args = match self.arguments() {
            Ok(args) => args,
            Err(e) => return Outcome::Ok(self.error_reply(ResponseCode::SqlError, e.client_message())),
        };
        if self.session.cursor.take().is_some() {
            tracing::debug!("previous cursor dropped by execute");
        }

        let kind = self.session.kind;
        let executed = {
            let Some(stmt) = self.session.stmt.as_ref() else {
                return Outcome::Ok(Vec::new());
            };
            if kind.has_result() {
                backend_try!(self, self.backend.query(cx, stmt, &args).await).map(Executed::Rows)
            } else {
                backend_try!(self, self.backend.execute(cx, stmt, &args).await).map(Executed::Done)
            }
        };

        match executed {
            Ok(Executed::Rows(cursor)) => {
                let columns = cursor.columns().len();
                self.session.cursor = Some(cursor);
                let reply = encode_composite(&[value(columns.to_string()), value("0")]);
                Outcome::Ok(vec![self.coder.eor(self.session.state(), &[reply])])
            }
            Ok(Executed::Done(result)) => {
                tracing::debug!(rows_affected = result.rows_affected, "execute");
                let mut parts = vec![value("0"), value(result.rows_affected.to_string())];
                if !result.out_values.is_empty() {
                    parts.push(value("1"));
                    parts.extend(
                        result
                            .out_values
                            .iter()
                            .map(|v| value(v.to_bytes().unwrap_or_default())),
                    );
                }
                let reply = encode_composite(&parts);
                Outcome::Ok(vec![self.coder.eor(self.session.state(), &[reply])])
            }
            Err(e) => {
                tracing::warn!(error = %e, "execute error");
                Outcome::Ok(self.error_reply(ResponseCode::SqlError, e.client_message()))
            }
        }
    }

    /// Render one cell for the client; NULL is the empty payload.
    fn render_cell(&self, column: Option<&ColumnMeta>, cell: &Value) -> Vec<u8> {
        match cell {
            Value::Null => Vec::new(),
            Value::Bytes(b) => b.clone(),
            other => {
                let text = other.to_text().unwrap_or_default();
                let type_name = column.map_or("", |c| c.type_name.as_str());
                self.adapter.process_result(type_name, &text).into_bytes()
            }
        }
    }

    async fn fetch(&mut self, cx: &Cx) -> Outcome<Vec<Packet>, Error> {
        let Some(mut cursor) = self.session.cursor.take() else {
            // A previous error was already reported.
            if self.session.last_error.is_some() {
                return Outcome::Ok(vec![self.coder.eor(self.session.state(), &[])]);
            }
            let reply = response(ResponseCode::Error, b"fetch requested but no statement exists");
            return Outcome::Ok(vec![self.coder.eor(self.session.state(), &[reply])]);
        };

        let columns = cursor.columns().to_vec();
        let mut cells = Vec::new();
        loop {
            match backend_try!(self, cursor.next_row(cx).await) {
                Ok(Some(row)) => {
                    for (i, cell) in row.values().iter().enumerate() {
                        cells.push(value(self.render_cell(columns.get(i), cell)));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "fetch error");
                    return Outcome::Ok(self.error_reply(ResponseCode::SqlError, e.client_message()));
                }
            }
        }

        let mut out = Vec::with_capacity(2);
        if !cells.is_empty() {
            out.push(encode_composite(&cells));
        }
        let done = response(ResponseCode::NoMoreData, b"");
        out.push(self.coder.eor(self.session.state(), &[done]));
        Outcome::Ok(out)
    }

    fn cols_info(&mut self) -> Vec<Packet> {
        let Some(cursor) = self.session.cursor.as_ref() else {
            let reply = response(ResponseCode::Error, b"column info requested but no cursor exists");
            return vec![self.coder.eor(self.session.state(), &[reply])];
        };
        let columns = cursor.columns();
        let mut parts = Vec::with_capacity(1 + columns.len() * 5);
        parts.push(value(columns.len().to_string()));
        for column in columns {
            parts.push(value(&column.name));
            parts.push(value(self.adapter.type_code(&column.type_name).to_string()));
            parts.push(value(column.length.to_string()));
            parts.push(value(column.precision.min(MAX_COLUMN_ATTRIBUTE).to_string()));
            parts.push(value(column.scale.min(MAX_COLUMN_ATTRIBUTE).to_string()));
        }
        let reply = encode_composite(&parts);
        vec![self.coder.eor(self.session.state(), &[reply])]
    }

    async fn end_transaction(&mut self, cx: &Cx, commit: bool) -> Outcome<Vec<Packet>, Error> {
        let verb = if commit { "commit" } else { "rollback" };
        let Some(tx) = self.session.tx.take() else {
            tracing::warn!(verb, "no open transaction");
            let ok = response(ResponseCode::Ok, b"");
            return Outcome::Ok(vec![self.coder.eor(self.session.state(), &[ok])]);
        };
        let result = if commit {
            backend_try!(self, self.backend.commit(cx, tx).await)
        } else {
            backend_try!(self, self.backend.rollback(cx, tx).await)
        };
        match result {
            Ok(()) => {
                let ok = response(ResponseCode::Ok, b"");
                Outcome::Ok(vec![self.coder.eor(self.session.state(), &[ok])])
            }
            Err(e) => {
                tracing::warn!(verb, error = %e, "transaction end failed");
                Outcome::Ok(self.error_reply(ResponseCode::SqlError, e.client_message()))
            }
        }
    }
}
