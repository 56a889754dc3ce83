//! MySQL command table.
//!
//! Text queries run in autocommit mode unless the client opened a
//! transaction with `BEGIN`/`START TRANSACTION`. Preparing a write or a
//! `SELECT ... FOR UPDATE` opens one. Prepared statements are addressed by
//! the numeric id handed out in COM_STMT_PREPARE_OK. Binary
//! result sets are not produced: a row-returning prepared statement answers
//! ERR 1235.

use super::Processor;
use crate::adapter::DatabaseAdapter;
use crate::session::PreparedStatement;
use crate::sql_parser::{StatementKind, classify, count_positional};
use asupersync::{Cx, Outcome};
use sqlmux_core::{Arguments, Backend, ColumnMeta, Cursor, Error, ExecResult};
use sqlmux_wire::mysql::{
    ColumnDefinition, Command, EofPacket, ErrPacket, OkPacket, StmtExecute, StmtPrepareOk,
    server_status, text_resultset,
};
use sqlmux_wire::primitives::ByteReader;
use sqlmux_wire::Packet;

type TextRows = Vec<Vec<Option<Vec<u8>>>>;

enum Reply {
    Ok(ExecResult),
    Rows(Vec<ColumnMeta>, TextRows),
}

impl<B: Backend, A: DatabaseAdapter> Processor<B, A> {
    pub(super) async fn process_mysql(&mut self, cx: &Cx, packet: &Packet) -> Outcome<Vec<Packet>, Error> {
        let payload = packet.payload();
        let seq = packet.sequence_id().wrapping_add(1);
        let Some(command) = payload.first().copied().and_then(Command::from_u8) else {
            tracing::warn!(command = packet.command(), "unknown mysql command");
            return Outcome::Ok(self.mysql_err(seq, ErrPacket::new(ErrPacket::UNKNOWN_COMMAND, "Unknown command")));
        };
        tracing::debug!(command = ?command, payload_len = payload.len(), seq, "dispatch");
        let body = &payload[1..];

        match command {
            Command::Quit => {
                self.quit = true;
                Outcome::Ok(Vec::new())
            }
            Command::Ping => match backend_try!(self, self.backend.ping(cx).await) {
                Ok(()) => Outcome::Ok(self.mysql_ok(seq, ExecResult::default())),
                Err(e) => Outcome::Ok(self.mysql_err(seq, ErrPacket::from_error(&e))),
            },
            Command::InitDb | Command::CreateDb | Command::DropDb => {
                let schema = quote_identifier(&String::from_utf8_lossy(body));
                let sql = match command {
                    Command::CreateDb => format!("CREATE DATABASE {schema};"),
                    Command::DropDb => format!("DROP DATABASE IF EXISTS {schema};"),
                    _ => format!("USE {schema};"),
                };
                self.com_query(cx, &sql, seq).await
            }
            Command::Query => {
                let sql = String::from_utf8_lossy(body);
                self.com_query(cx, &sql, seq).await
            }
            Command::StmtPrepare => {
                let sql = String::from_utf8_lossy(body);
                self.stmt_prepare(cx, &sql, seq).await
            }
            Command::StmtExecute => self.stmt_execute(cx, payload, seq).await,
            Command::StmtClose => {
                if let Some(id) = statement_id(payload) {
                    self.stmt_close(cx, id).await
                } else {
                    tracing::warn!("COM_STMT_CLOSE without a statement id");
                    Outcome::Ok(Vec::new())
                }
            }
            Command::StmtReset => match statement_id(payload) {
                Some(id) if self.session.statements.contains_key(&id) => {
                    Outcome::Ok(self.mysql_ok(seq, ExecResult::default()))
                }
                id => Outcome::Ok(self.unknown_statement(seq, id, "mysqld_stmt_reset")),
            },
            Command::StmtSendLongData => {
                // The protocol defines no response to this command.
                tracing::warn!("COM_STMT_SEND_LONG_DATA is not supported");
                Outcome::Ok(Vec::new())
            }
            Command::StmtFetch => Outcome::Ok(self.mysql_err(
                seq,
                ErrPacket::new(ErrPacket::NOT_SUPPORTED, "cursor fetch is not supported"),
            )),
            other => {
                tracing::warn!(command = ?other, "unsupported mysql command");
                Outcome::Ok(self.mysql_err(seq, ErrPacket::new(ErrPacket::UNKNOWN_COMMAND, "Unknown command")))
            }
        }
    }

    fn status_flags(&self) -> u16 {
        if self.session.in_transaction() {
            server_status::SERVER_STATUS_IN_TRANS
        } else {
            server_status::SERVER_STATUS_AUTOCOMMIT
        }
    }

    /// Wrap the reply packets in one EOR.
    fn mysql_reply(&mut self, packets: &[Packet]) -> Vec<Packet> {
        vec![self.coder.eor(self.session.state(), packets)]
    }

    fn mysql_ok(&mut self, seq: u8, result: ExecResult) -> Vec<Packet> {
        let ok = OkPacket {
            affected_rows: result.rows_affected,
            last_insert_id: result.last_insert_id.unwrap_or(0),
            status_flags: self.status_flags(),
            warnings: 0,
            info: String::new(),
        };
        self.mysql_reply(&[ok.to_packet(seq)])
    }

    fn mysql_err(&mut self, seq: u8, err: ErrPacket) -> Vec<Packet> {
        self.session.last_error = Some(err.error_message.clone());
        self.mysql_reply(&[err.to_packet(seq)])
    }

    fn unknown_statement(&mut self, seq: u8, id: Option<u32>, call: &str) -> Vec<Packet> {
        let shown = id.map_or_else(|| "?".to_string(), |id| id.to_string());
        self.mysql_err(
            seq,
            ErrPacket::new(
                ErrPacket::UNKNOWN_STMT_HANDLER,
                format!("Unknown prepared statement handler ({shown}) given to {call}"),
            ),
        )
    }

    /// Pull every remaining row of a cursor as length-encoded text cells.
    async fn drain_cursor(
        &mut self,
        cx: &Cx,
        mut cursor: B::Cursor,
    ) -> Outcome<Result<Reply, Error>, Error> {
        let columns = cursor.columns().to_vec();
        let mut rows = Vec::new();
        loop {
            match backend_try!(self, cursor.next_row(cx).await) {
                Ok(Some(row)) => rows.push(row.values().iter().map(|v| v.to_bytes()).collect()),
                Ok(None) => return Outcome::Ok(Ok(Reply::Rows(columns, rows))),
                Err(e) => return Outcome::Ok(Err(e)),
            }
        }
    }

    fn render_reply(&mut self, seq: u8, reply: Result<Reply, Error>) -> Vec<Packet> {
        match reply {
            Ok(Reply::Ok(result)) => self.mysql_ok(seq, result),
            Ok(Reply::Rows(columns, rows)) => {
                let defs: Vec<_> = columns.iter().map(ColumnDefinition::from_meta).collect();
                let packets = text_resultset(&defs, &rows, self.status_flags(), seq);
                self.mysql_reply(&packets)
            }
            Err(e) => {
                tracing::warn!(error = %e, "mysql command failed");
                self.mysql_err(seq, ErrPacket::from_error(&e))
            }
        }
    }

    /// Run one text statement.
    async fn com_query(&mut self, cx: &Cx, sql: &str, seq: u8) -> Outcome<Vec<Packet>, Error> {
        let kind = classify(sql);
        match kind {
            StatementKind::Begin => {
                if self.session.tx.is_some() {
                    return Outcome::Ok(self.mysql_ok(seq, ExecResult::default()));
                }
                let reply = backend_try!(self, self.backend.begin(cx).await).map(|tx| {
                    self.session.tx = Some(tx);
                    Reply::Ok(ExecResult::default())
                });
                return Outcome::Ok(self.render_reply(seq, reply));
            }
            StatementKind::Commit | StatementKind::Rollback => {
                let Some(tx) = self.session.tx.take() else {
                    tracing::warn!(kind = ?kind, "no open transaction");
                    return Outcome::Ok(self.mysql_ok(seq, ExecResult::default()));
                };
                let done = if kind == StatementKind::Commit {
                    backend_try!(self, self.backend.commit(cx, tx).await)
                } else {
                    backend_try!(self, self.backend.rollback(cx, tx).await)
                };
                let reply = done.map(|()| Reply::Ok(ExecResult::default()));
                return Outcome::Ok(self.render_reply(seq, reply));
            }
            _ => {}
        }

        let stmt = match backend_try!(self, self.backend.prepare(cx, sql).await) {
            Ok(stmt) => stmt,
            Err(e) => return Outcome::Ok(self.render_reply(seq, Err(e))),
        };
        let args = Arguments::default();
        let reply = if kind.has_result() {
            match backend_try!(self, self.backend.query(cx, &stmt, &args).await) {
                Ok(cursor) => match self.drain_cursor(cx, cursor).await {
                    Outcome::Ok(reply) => reply,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                },
                Err(e) => Err(e),
            }
        } else {
            backend_try!(self, self.backend.execute(cx, &stmt, &args).await).map(Reply::Ok)
        };
        if let Err(e) = backend_try!(self, self.backend.close_statement(cx, stmt).await) {
            tracing::warn!(error = %e, "closing text statement failed");
        }
        Outcome::Ok(self.render_reply(seq, reply))
    }

    async fn stmt_prepare(&mut self, cx: &Cx, sql: &str, seq: u8) -> Outcome<Vec<Packet>, Error> {
        let kind = classify(sql);
        if self.session.tx.is_none() && kind.start_trans() {
            match backend_try!(self, self.backend.begin(cx).await) {
                Ok(tx) => self.session.tx = Some(tx),
                Err(e) => return Outcome::Ok(self.render_reply(seq, Err(e))),
            }
        }
        let handle = match backend_try!(self, self.backend.prepare(cx, sql).await) {
            Ok(handle) => handle,
            Err(e) => return Outcome::Ok(self.render_reply(seq, Err(e))),
        };
        let num_params = count_positional(sql);
        let id = self.session.register_statement(PreparedStatement {
            handle,
            sql: sql.to_string(),
            kind,
            num_params,
            param_types: None,
        });
        tracing::debug!(statement_id = id, num_params, "statement prepared");

        let mut seq = seq;
        let mut next_seq = || {
            let current = seq;
            seq = seq.wrapping_add(1);
            current
        };
        let header = StmtPrepareOk {
            statement_id: id,
            num_columns: 0,
            num_params: u16::try_from(num_params).unwrap_or(u16::MAX),
            warnings: 0,
        };
        let mut packets = vec![header.to_packet(next_seq())];
        if num_params > 0 {
            let param = ColumnDefinition::parameter().to_payload();
            for _ in 0..num_params {
                packets.push(sqlmux_wire::mysql::encode(next_seq(), &param));
            }
            let eof = EofPacket {
                warnings: 0,
                status_flags: self.status_flags(),
            };
            packets.push(eof.to_packet(next_seq()));
        }
        Outcome::Ok(self.mysql_reply(&packets))
    }

    async fn stmt_execute(&mut self, cx: &Cx, payload: &[u8], seq: u8) -> Outcome<Vec<Packet>, Error> {
        let id = match StmtExecute::peek_statement_id(payload) {
            Ok(id) => id,
            Err(e) => return Outcome::Ok(self.render_reply(seq, Err(e))),
        };
        let Some(prepared) = self.session.statements.get_mut(&id) else {
            return Outcome::Ok(self.unknown_statement(seq, Some(id), "mysqld_stmt_execute"));
        };
        let request = match StmtExecute::parse(payload, prepared.num_params, prepared.param_types.as_deref()) {
            Ok(request) => request,
            Err(e) => return Outcome::Ok(self.render_reply(seq, Err(e))),
        };
        if let Some(types) = &request.new_types {
            prepared.param_types = Some(types.clone());
        }
        if prepared.kind.has_result() {
            return Outcome::Ok(self.mysql_err(
                seq,
                ErrPacket::new(ErrPacket::NOT_SUPPORTED, "binary result sets are not supported"),
            ));
        }

        let args = Arguments::Positional(request.values());
        let reply = {
            let Some(prepared) = self.session.statements.get(&id) else {
                return Outcome::Ok(Vec::new());
            };
            backend_try!(self, self.backend.execute(cx, &prepared.handle, &args).await)
        };
        Outcome::Ok(self.render_reply(seq, reply.map(Reply::Ok)))
    }

    /// Close a numbered statement. COM_STMT_CLOSE has no response.
    async fn stmt_close(&mut self, cx: &Cx, id: u32) -> Outcome<Vec<Packet>, Error> {
        let Some(prepared) = self.session.statements.remove(&id) else {
            tracing::warn!(statement_id = id, "close of unknown statement");
            return Outcome::Ok(Vec::new());
        };
        if let Err(e) = backend_try!(self, self.backend.close_statement(cx, prepared.handle).await) {
            tracing::warn!(statement_id = id, error = %e, "closing statement failed");
        }
        Outcome::Ok(Vec::new())
    }
}

/// Back-quote an identifier, doubling any embedded back-quotes.
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Statement id following the command byte.
fn statement_id(payload: &[u8]) -> Option<u32> {
    let mut r = ByteReader::new(payload);
    r.skip(1);
    r.read_u32_le()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("inventory"), "`inventory`");
        assert_eq!(quote_identifier("a`b"), "`a``b`");
        assert_eq!(quote_identifier("x; DROP DATABASE y"), "`x; DROP DATABASE y`");
    }
}
