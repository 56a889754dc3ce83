//! Session command processing for the sqlmux proxy worker.
//!
//! A worker owns one client connection and one backend connection. Requests
//! arrive as indicator-tagged packets of either protocol:
//!
//! - native netstring commands (prepare, bind, execute, fetch, commit, ...)
//!   addressing bind variables by name
//! - MySQL command-phase packets (COM_QUERY, COM_STMT_*, ...) addressing
//!   prepared statements by numeric id
//!
//! Every final reply is wrapped in an end-of-response packet carrying the
//! post-command session state and a request id.
//!
//! # Example
//!
//! ```ignore
//! use sqlmux_worker::{MySqlAdapter, Processor, Worker, WorkerConfig};
//!
//! let config = WorkerConfig::new().idle_timeout(Duration::from_secs(300));
//! let processor = Processor::with_config(backend, MySqlAdapter::new(), &config)?;
//! let mut worker = Worker::from_tcp(stream, processor, &config)?;
//! let end = worker.run(&cx).await;
//! ```

pub mod adapter;
pub mod config;
pub mod eor;
pub mod processor;
pub mod session;
pub mod sql_parser;
pub mod worker;

pub use adapter::{DatabaseAdapter, MySqlAdapter};
pub use config::WorkerConfig;
pub use eor::ResponseCoder;
pub use processor::Processor;
pub use session::{BindDirection, BindSlot, BindTable, Session};
pub use sql_parser::{SqlParser, StatementKind};
pub use worker::{SessionEnd, Worker};
