//! Native netstring command flows against a recording mock backend.

mod common;

use asupersync::Cx;
use common::{block_on, leaves, open_eor, processor, send};
use sqlmux_core::{ArgValue, Arguments, ColumnMeta, ExecResult, NamedArg, Row, Value};
use sqlmux_wire::netstring::encode_composite;
use sqlmux_wire::{EorCode, NetstringCommand, ResponseCode};
use sqlmux_worker::{MySqlAdapter, Processor, WorkerConfig};
use std::sync::Arc;

const PREPARE: u32 = NetstringCommand::Prepare.code();
const BIND_NAME: u32 = NetstringCommand::BindName.code();
const BIND_OUT_NAME: u32 = NetstringCommand::BindOutName.code();
const BIND_TYPE: u32 = NetstringCommand::BindType.code();
const BIND_VALUE: u32 = NetstringCommand::BindValue.code();
const EXECUTE: u32 = NetstringCommand::Execute.code();
const FETCH: u32 = NetstringCommand::Fetch.code();
const COLS_INFO: u32 = NetstringCommand::ColsInfo.code();
const COMMIT: u32 = NetstringCommand::Commit.code();
const ROLLBACK: u32 = NetstringCommand::Rollback.code();

#[test]
fn test_commit_without_transaction_is_ok() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();

        let replies = send(&mut p, &cx, COMMIT, b"").await;
        assert_eq!(replies.len(), 1);
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::Free);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].command(), ResponseCode::Ok.code());
        assert_eq!(state.lock().expect("lock poisoned").commits, 0);
    });
}

#[test]
fn test_dml_opens_transaction_and_reports_rowcount() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();
        state.lock().expect("lock poisoned").result = ExecResult::rows(1);

        assert!(send(&mut p, &cx, PREPARE, b"UPDATE t SET a = :a WHERE id = :id").await.is_empty());
        assert!(send(&mut p, &cx, BIND_NAME, b":a").await.is_empty());
        assert!(send(&mut p, &cx, BIND_VALUE, b"x").await.is_empty());
        assert!(send(&mut p, &cx, BIND_NAME, b"id").await.is_empty());
        assert!(send(&mut p, &cx, BIND_VALUE, b"5").await.is_empty());

        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::InTransaction);
        assert_eq!(leaves(&inner[0]), vec!["0", "1"]);

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.begins, 1);
        assert_eq!(guard.prepared, vec!["UPDATE t SET a = ? WHERE id = ?"]);
        assert_eq!(
            guard.executed[0].1,
            Arguments::Positional(vec![Value::Text("x".into()), Value::Text("5".into())])
        );
        drop(guard);

        let replies = send(&mut p, &cx, COMMIT, b"").await;
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::Free);
        assert_eq!(inner[0].command(), ResponseCode::Ok.code());
        assert_eq!(state.lock().expect("lock poisoned").commits, 1);
    });
}

#[test]
fn test_fetch_without_cursor_is_recoverable() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, _state) = processor();

        let replies = send(&mut p, &cx, FETCH, b"").await;
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::Free);
        assert_eq!(inner[0].command(), ResponseCode::Error.code());
        assert_eq!(inner[0].payload_str(), "fetch requested but no statement exists");
        assert_eq!(p.current_state(), EorCode::Free);
    });
}

#[test]
fn test_undeclared_bind_name_fails_execute() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();

        send(&mut p, &cx, PREPARE, b"DELETE FROM t WHERE id = :id").await;
        send(&mut p, &cx, BIND_NAME, b":nope").await;
        send(&mut p, &cx, BIND_VALUE, b"1").await;

        let slots = p.session().binds().slots();
        assert_eq!(slots.len(), 1);
        assert!(!slots[0].supplied);

        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (_, _, inner) = open_eor(&replies[0]);
        assert_eq!(inner[0].command(), ResponseCode::SqlError.code());
        assert_eq!(inner[0].payload_str(), "bindname not found in query: :nope");
        assert!(state.lock().expect("lock poisoned").executed.is_empty());
        assert_eq!(
            p.session().last_error(),
            Some("bindname not found in query: :nope")
        );
    });
}

#[test]
fn test_missing_bind_value_fails_execute() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, _state) = processor();

        send(&mut p, &cx, PREPARE, b"SELECT * FROM t WHERE id = :id").await;
        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::Free);
        assert_eq!(inner[0].payload_str(), "bindname undefined: :id");
    });
}

#[test]
fn test_request_ids_increase_per_eor() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, _state) = processor();
        p.coder_mut().set_request_id(u16::MAX);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let replies = send(&mut p, &cx, ROLLBACK, b"").await;
            ids.push(open_eor(&replies[0]).1);
        }
        assert_eq!(ids, vec![u16::MAX, 0, 1]);
    });
}

#[test]
fn test_more_pending_reports_more_incoming() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, _state) = processor();
        p.set_more_pending(true);

        let replies = send(&mut p, &cx, COMMIT, b"").await;
        assert_eq!(open_eor(&replies[0]).0, EorCode::MoreIncomingRequests);
    });
}

#[test]
fn test_query_fetch_and_column_info() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();
        {
            let mut guard = state.lock().expect("lock poisoned");
            guard.columns = vec![
                ColumnMeta::new("id", "INT").length(11),
                ColumnMeta::new("created", "DATETIME"),
            ];
            guard.rows = vec![
                Row::new(vec![Value::Int(7), Value::Text("2024-05-17 13:45:09".into())]),
                Row::new(vec![Value::Int(8), Value::Null]),
            ];
        }

        send(&mut p, &cx, PREPARE, b"SELECT id, created FROM t WHERE id > :id").await;
        send(&mut p, &cx, BIND_NAME, b":id").await;
        send(&mut p, &cx, BIND_VALUE, b"0").await;

        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::InCursorNotInTransaction);
        assert_eq!(leaves(&inner[0]), vec!["2", "0"]);
        assert_eq!(state.lock().expect("lock poisoned").begins, 0);

        let replies = send(&mut p, &cx, COLS_INFO, b"").await;
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::InCursorNotInTransaction);
        let info = leaves(&inner[0]);
        assert_eq!(info.len(), 11);
        assert_eq!(info[0], "2");
        assert_eq!(info[1], "id");
        assert_eq!(info[3], "11");
        assert_eq!(info[6], "created");

        let replies = send(&mut p, &cx, FETCH, b"").await;
        assert_eq!(replies.len(), 2);
        assert_eq!(
            leaves(&replies[0]),
            vec!["7", "17-05-2024 13:45:09.000", "8", ""]
        );
        let (code, _, inner) = open_eor(&replies[1]);
        assert_eq!(code, EorCode::Free);
        assert_eq!(inner[0].command(), ResponseCode::NoMoreData.code());
        assert!(!p.session().in_cursor());
    });
}

#[test]
fn test_composite_request_runs_each_leaf() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();
        state.lock().expect("lock poisoned").result = ExecResult::rows(3);

        let batch = encode_composite(&[
            sqlmux_wire::netstring::encode(PREPARE, b"INSERT INTO t VALUES (:v)"),
            sqlmux_wire::netstring::encode(BIND_NAME, b":v"),
            sqlmux_wire::netstring::encode(BIND_TYPE, b"0"),
            sqlmux_wire::netstring::encode(BIND_VALUE, b"hello"),
            sqlmux_wire::netstring::encode(EXECUTE, b""),
        ]);
        let replies = common::unwrap_outcome(p.process_command(&cx, &batch).await);
        assert_eq!(replies.len(), 1);
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::InTransaction);
        assert_eq!(leaves(&inner[0]), vec!["0", "3"]);
    });
}

#[test]
fn test_out_binds_by_name() {
    block_on(async {
        let cx = Cx::for_testing();
        let state = Arc::new(std::sync::Mutex::new(common::MockState::default()));
        let config = WorkerConfig::new().use_bind_names(true);
        let mut p = Processor::with_config(
            common::MockBackend::new(Arc::clone(&state)),
            MySqlAdapter::new(),
            &config,
        )
        .expect("processor");
        state.lock().expect("lock poisoned").result = ExecResult {
            rows_affected: 0,
            last_insert_id: None,
            out_values: vec![Value::Text("42".into())],
        };

        send(&mut p, &cx, PREPARE, b"CALL compute(:a, :result)").await;
        send(&mut p, &cx, BIND_NAME, b":a").await;
        send(&mut p, &cx, BIND_VALUE, b"1").await;
        send(&mut p, &cx, BIND_OUT_NAME, b":result").await;

        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (_, _, inner) = open_eor(&replies[0]);
        assert_eq!(leaves(&inner[0]), vec!["0", "0", "1", "42"]);

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(guard.prepared, vec!["CALL compute(:a, :result)"]);
        assert_eq!(
            guard.executed[0].1,
            Arguments::Named(vec![
                NamedArg {
                    name: "a".into(),
                    value: ArgValue::In(Value::Text("1".into())),
                },
                NamedArg {
                    name: "result".into(),
                    value: ArgValue::Out,
                },
            ])
        );
    });
}

#[test]
fn test_out_bind_rejected_when_positional() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();

        send(&mut p, &cx, PREPARE, b"CALL compute(:result)").await;
        send(&mut p, &cx, BIND_OUT_NAME, b":result").await;
        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (_, _, inner) = open_eor(&replies[0]);
        assert_eq!(inner[0].payload_str(), "outbind not supported");
        assert!(state.lock().expect("lock poisoned").executed.is_empty());
    });
}

#[test]
fn test_prepare_failure_reported_at_execute() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();
        state.lock().expect("lock poisoned").fail_prepare = Some("syntax error near FORM".into());

        assert!(send(&mut p, &cx, PREPARE, b"SELECT * FORM t").await.is_empty());
        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (_, _, inner) = open_eor(&replies[0]);
        assert_eq!(inner[0].command(), ResponseCode::SqlError.code());
        assert_eq!(inner[0].payload_str(), "syntax error near FORM");

        // The error was already reported, so fetch answers with a bare EOR.
        let replies = send(&mut p, &cx, FETCH, b"").await;
        let (_, _, inner) = open_eor(&replies[0]);
        assert!(inner.is_empty());
    });
}

#[test]
fn test_backend_execute_error_keeps_session() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();
        state.lock().expect("lock poisoned").fail_execute = Some("duplicate key".into());

        send(&mut p, &cx, PREPARE, b"INSERT INTO t VALUES (1)").await;
        let replies = send(&mut p, &cx, EXECUTE, b"").await;
        let (code, _, inner) = open_eor(&replies[0]);
        assert_eq!(code, EorCode::InTransaction);
        assert_eq!(inner[0].payload_str(), "duplicate key");

        let replies = send(&mut p, &cx, ROLLBACK, b"").await;
        assert_eq!(open_eor(&replies[0]).0, EorCode::Free);
        assert_eq!(state.lock().expect("lock poisoned").rollbacks, 1);
    });
}

#[test]
fn test_lost_connection_is_fatal() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();
        state.lock().expect("lock poisoned").connection_lost = true;

        let packet = sqlmux_wire::netstring::encode(PREPARE, b"SELECT 1");
        let outcome = p.process_command(&cx, &packet).await;
        assert!(matches!(outcome, asupersync::Outcome::Err(_)));
        assert!(p.recycle_requested());
    });
}

#[test]
fn test_timestamp_bind_value() {
    block_on(async {
        let cx = Cx::for_testing();
        let (mut p, state) = processor();

        send(&mut p, &cx, PREPARE, b"UPDATE t SET at = :at").await;
        send(&mut p, &cx, BIND_NAME, b":at").await;
        send(&mut p, &cx, BIND_TYPE, b"6").await;
        send(&mut p, &cx, BIND_VALUE, b"17-05-2024 13:45:09.250").await;
        send(&mut p, &cx, EXECUTE, b"").await;

        let guard = state.lock().expect("lock poisoned");
        let Arguments::Positional(values) = &guard.executed[0].1 else {
            panic!("expected positional arguments");
        };
        let Value::Timestamp(ts) = &values[0] else {
            panic!("expected a timestamp, got {:?}", values[0]);
        };
        assert_eq!((ts.year, ts.month, ts.day), (2024, 5, 17));
        assert_eq!(ts.millis, 250);
    });
}
