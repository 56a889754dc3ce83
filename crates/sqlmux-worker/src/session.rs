//! Per-connection session state.
//!
//! A [`Session`] lives as long as one client connection. It owns the open
//! transaction and cursor handles, the bind table of the current native
//! statement, and the numbered statements of the MySQL path.

use crate::sql_parser::{StatementKind, bare_name};
use sqlmux_core::{
    ArgValue, Backend, Error, NamedArg, Result, SessionErrorKind, Timestamp, Value,
};
use sqlmux_wire::{DataType, EorCode, mysql::FieldType};
use std::collections::HashMap;

/// Whether a placeholder carries a value in or a result out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindDirection {
    /// Declared by the statement, not yet bound
    #[default]
    Unset,
    In,
    Out,
}

/// One placeholder slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BindSlot {
    /// Placeholder name as written in the SQL, colon included
    pub name: String,
    /// Position of the first occurrence
    pub index: usize,
    pub direction: BindDirection,
    pub data_type: DataType,
    pub value: Value,
    /// Has a value (or an out destination) been given?
    pub supplied: bool,
}

impl BindSlot {
    fn new(name: &str, index: usize) -> Self {
        Self {
            name: name.to_string(),
            index,
            direction: BindDirection::Unset,
            data_type: DataType::String,
            value: Value::Null,
            supplied: false,
        }
    }
}

/// Placeholder slots of the current statement.
///
/// Slots are unique by name; `positions` maps each placeholder occurrence,
/// in SQL order, to its slot. Both are built together and only slot
/// contents change afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindTable {
    slots: Vec<BindSlot>,
    positions: Vec<usize>,
    by_name: HashMap<String, usize>,
}

impl BindTable {
    /// Build a table from placeholder names in order of appearance.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut table = Self::default();
        for (position, name) in names.iter().enumerate() {
            let name = name.as_ref();
            let slot = match table.by_name.get(name) {
                Some(&slot) => slot,
                None => {
                    let slot = table.slots.len();
                    table.slots.push(BindSlot::new(name, position));
                    table.by_name.insert(name.to_string(), slot);
                    slot
                }
            };
            table.positions.push(slot);
        }
        table
    }

    /// Look up a slot, accepting names with or without the leading colon.
    pub fn get(&self, name: &str) -> Option<&BindSlot> {
        self.resolve(name).map(|i| &self.slots[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BindSlot> {
        self.resolve(name).map(|i| &mut self.slots[i])
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        if name.starts_with(':') {
            self.by_name.get(name).copied()
        } else {
            self.by_name.get(&format!(":{name}")).copied()
        }
    }

    pub fn slots(&self) -> &[BindSlot] {
        &self.slots
    }

    /// Number of placeholder occurrences.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn out_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.direction == BindDirection::Out)
            .count()
    }

    /// Values in placeholder order, for a positional backend.
    pub fn positional_values(&self) -> Result<Vec<Value>> {
        self.check_inputs()?;
        if self.out_count() > 0 {
            return Err(Error::session(
                SessionErrorKind::OutBindNotSupported,
                "outbind not supported",
            ));
        }
        Ok(self
            .positions
            .iter()
            .map(|&slot| self.slots[slot].value.clone())
            .collect())
    }

    /// One argument per distinct placeholder, for a by-name backend.
    pub fn named_args(&self) -> Result<Vec<NamedArg>> {
        self.check_inputs()?;
        Ok(self
            .slots
            .iter()
            .map(|slot| NamedArg {
                name: bare_name(&slot.name).to_string(),
                value: match slot.direction {
                    BindDirection::Out => ArgValue::Out,
                    BindDirection::In | BindDirection::Unset => ArgValue::In(slot.value.clone()),
                },
            })
            .collect())
    }

    /// Every input slot has a value.
    fn check_inputs(&self) -> Result<()> {
        match self
            .slots
            .iter()
            .find(|s| s.direction != BindDirection::Out && !s.supplied)
        {
            Some(missing) => Err(Error::session(
                SessionErrorKind::BindValueMissing,
                format!("bindname undefined: {}", missing.name),
            )),
            None => Ok(()),
        }
    }
}

/// Decode a BindValue payload according to the slot's declared type.
///
/// An empty payload is NULL for every type.
pub fn decode_bind_value(data_type: DataType, payload: &[u8]) -> Result<Value> {
    if payload.is_empty() {
        return Ok(Value::Null);
    }
    match data_type {
        DataType::Raw | DataType::Blob => Ok(Value::Bytes(payload.to_vec())),
        DataType::Timestamp | DataType::TimestampTz => {
            let text = std::str::from_utf8(payload).map_err(|_| invalid_timestamp(payload))?;
            parse_timestamp(text, data_type == DataType::TimestampTz)
                .map(Value::Timestamp)
                .ok_or_else(|| invalid_timestamp(payload))
        }
        DataType::String | DataType::Clob => {
            Ok(Value::Text(String::from_utf8_lossy(payload).into_owned()))
        }
    }
}

fn invalid_timestamp(payload: &[u8]) -> Error {
    Error::session(
        SessionErrorKind::InvalidBindValue,
        format!(
            "invalid timestamp bind value: {}",
            String::from_utf8_lossy(payload)
        ),
    )
}

/// Parse `DD-MM-YYYY HH:MM:SS.mmm`, followed by ` ±HH:MM` when `with_zone`.
pub fn parse_timestamp(text: &str, with_zone: bool) -> Option<Timestamp> {
    let mut fields = text.split_whitespace();
    let date = fields.next()?;
    let time = fields.next()?;
    let zone = fields.next();
    if fields.next().is_some() || zone.is_some() != with_zone {
        return None;
    }

    let mut d = date.split('-');
    let day = d.next()?.parse().ok()?;
    let month = d.next()?.parse().ok()?;
    let year = d.next()?.parse().ok()?;
    if d.next().is_some() {
        return None;
    }

    let (hms, millis) = time.split_once('.').unwrap_or((time, "0"));
    let mut t = hms.split(':');
    let hour = t.next()?.parse().ok()?;
    let minute = t.next()?.parse().ok()?;
    let second = t.next()?.parse().ok()?;
    if t.next().is_some() {
        return None;
    }
    let mut ts = Timestamp::new(year, month, day, hour, minute, second).with_millis(millis.parse().ok()?);

    if let Some(zone) = zone {
        let (h, m) = zone.split_once(':')?;
        let negative = h.starts_with('-');
        let hours: i32 = h.trim_start_matches(['+', '-']).parse().ok()?;
        let minutes: i32 = m.parse().ok()?;
        if minutes >= 60 {
            return None;
        }
        let offset = hours * 60 + minutes;
        ts = ts.with_offset_minutes(if negative { -offset } else { offset });
    }
    ts.is_valid().then_some(ts)
}

/// A statement prepared over the MySQL path, addressed by number.
#[derive(Debug)]
pub struct PreparedStatement<S> {
    pub handle: S,
    pub sql: String,
    pub kind: StatementKind,
    pub num_params: usize,
    /// Parameter types from the last execute that declared them
    pub param_types: Option<Vec<(FieldType, bool)>>,
}

/// State of one client session.
pub struct Session<B: Backend> {
    pub(crate) tx: Option<B::Transaction>,
    pub(crate) cursor: Option<B::Cursor>,
    /// Current native-protocol statement
    pub(crate) stmt: Option<B::Statement>,
    pub(crate) kind: StatementKind,
    pub(crate) binds: BindTable,
    pub(crate) current_bind: Option<String>,
    /// Bind-phase error reported at the next execute
    pub(crate) pending_error: Option<Error>,
    pub(crate) last_error: Option<String>,
    pub(crate) statements: HashMap<u32, PreparedStatement<B::Statement>>,
    next_statement_id: u32,
    pub(crate) correlation_id: Option<String>,
    pub(crate) sql_hash: u32,
}

impl<B: Backend> Default for Session<B> {
    fn default() -> Self {
        Self {
            tx: None,
            cursor: None,
            stmt: None,
            kind: StatementKind::Other,
            binds: BindTable::default(),
            current_bind: None,
            pending_error: None,
            last_error: None,
            statements: HashMap::new(),
            next_statement_id: 1,
            correlation_id: None,
            sql_hash: 0,
        }
    }
}

impl<B: Backend> Session<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn in_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    /// Transaction/cursor state code.
    pub fn state(&self) -> EorCode {
        EorCode::for_state(self.in_transaction(), self.in_cursor())
    }

    pub fn binds(&self) -> &BindTable {
        &self.binds
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Hash of the statement text last prepared.
    pub fn sql_hash(&self) -> u32 {
        self.sql_hash
    }

    /// Number of open MySQL-path statements.
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Forget the native statement and its binds; the handle is returned
    /// so the caller can close it.
    pub(crate) fn reset_statement(&mut self) -> Option<B::Statement> {
        self.binds = BindTable::default();
        self.current_bind = None;
        self.pending_error = None;
        self.kind = StatementKind::Other;
        self.stmt.take()
    }

    /// Record the first bind-phase error of the current statement.
    pub(crate) fn defer_error(&mut self, err: Error) {
        tracing::debug!(error = %err, "bind error deferred to execute");
        if self.pending_error.is_none() {
            self.pending_error = Some(err);
        }
    }

    /// Register a MySQL-path statement. Ids start at 1 and are never reused.
    pub(crate) fn register_statement(&mut self, stmt: PreparedStatement<B::Statement>) -> u32 {
        let id = self.next_statement_id;
        self.next_statement_id = self.next_statement_id.wrapping_add(1).max(1);
        self.statements.insert(id, stmt);
        id
    }
}

/// 32-bit FNV-1a of the statement text.
pub fn sql_hash(sql: &str) -> u32 {
    sql.bytes().fold(0x811c_9dc5_u32, |h, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}
