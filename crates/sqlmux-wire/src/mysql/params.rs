//! COM_STMT_EXECUTE request decoding.
//!
//! ```text
//! [0x17] stmt_id u32, flags u8, iteration_count u32,
//! if num_params > 0:
//!     null_bitmap ((num_params + 7) / 8 bytes)
//!     new_params_bound_flag u8
//!     if flag == 1: per param type u8, flag u8 (0x80 = unsigned)
//!     values of each non-NULL param in binary encoding
//! ```

#![allow(clippy::cast_possible_truncation)]

use super::types::FieldType;
use crate::primitives::{ByteReader, StringKind};
use sqlmux_core::{Error, ProtocolError, Result, Timestamp, Value};

/// One decoded parameter of a COM_STMT_EXECUTE.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub field_type: FieldType,
    pub unsigned: bool,
    pub value: Value,
}

/// A decoded COM_STMT_EXECUTE request.
#[derive(Debug, Clone, PartialEq)]
pub struct StmtExecute {
    pub statement_id: u32,
    pub flags: u8,
    pub iteration_count: u32,
    /// Types as declared in this request, if the client re-sent them
    pub new_types: Option<Vec<(FieldType, bool)>>,
    pub params: Vec<BoundParam>,
}

impl StmtExecute {
    /// Read only the statement id, to look up the parameter count before
    /// a full parse.
    pub fn peek_statement_id(payload: &[u8]) -> Result<u32> {
        let mut r = ByteReader::new(payload);
        r.skip(1);
        r.read_u32_le().ok_or_else(|| malformed("missing statement id"))
    }

    /// Parse a full COM_STMT_EXECUTE payload (command byte included).
    ///
    /// `previous_types` are the types bound by an earlier execute of the
    /// same statement, used when the client does not re-send them.
    pub fn parse(
        payload: &[u8],
        num_params: usize,
        previous_types: Option<&[(FieldType, bool)]>,
    ) -> Result<Self> {
        let mut r = ByteReader::new(payload);
        r.skip(1);
        let statement_id = r.read_u32_le().ok_or_else(|| malformed("missing statement id"))?;
        let flags = r.read_u8().ok_or_else(|| malformed("missing flags"))?;
        let iteration_count = r
            .read_u32_le()
            .ok_or_else(|| malformed("missing iteration count"))?;

        if num_params == 0 {
            return Ok(Self {
                statement_id,
                flags,
                iteration_count,
                new_types: None,
                params: Vec::new(),
            });
        }

        let bitmap = r
            .read_bytes(num_params.div_ceil(8))
            .ok_or_else(|| malformed("truncated null bitmap"))?;
        let new_params_bound = r.read_u8().ok_or_else(|| malformed("missing bound flag"))? == 1;

        let new_types = if new_params_bound {
            let mut types = Vec::with_capacity(num_params);
            for _ in 0..num_params {
                let ty = r.read_u8().ok_or_else(|| malformed("truncated parameter types"))?;
                let flag = r.read_u8().ok_or_else(|| malformed("truncated parameter types"))?;
                types.push((FieldType::from_u8(ty), flag & 0x80 != 0));
            }
            Some(types)
        } else {
            None
        };
        let types: Vec<(FieldType, bool)> = match (&new_types, previous_types) {
            (Some(t), _) => t.clone(),
            (None, Some(prev)) if prev.len() == num_params => prev.to_vec(),
            // Without declared types every value is a length-encoded string.
            (None, _) => vec![(FieldType::VarString, false); num_params],
        };

        let mut params = Vec::with_capacity(num_params);
        for (i, &(field_type, unsigned)) in types.iter().enumerate() {
            let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
            let value = if is_null || field_type == FieldType::Null {
                Value::Null
            } else {
                read_binary_value(&mut r, field_type, unsigned)
                    .ok_or_else(|| malformed(&format!("truncated value for parameter {i}")))?
            };
            params.push(BoundParam {
                field_type,
                unsigned,
                value,
            });
        }

        Ok(Self {
            statement_id,
            flags,
            iteration_count,
            new_types,
            params,
        })
    }

    /// Parameter values in placeholder order.
    pub fn values(&self) -> Vec<Value> {
        self.params.iter().map(|p| p.value.clone()).collect()
    }
}

fn malformed(what: &str) -> Error {
    Error::Protocol(ProtocolError {
        message: format!("malformed COM_STMT_EXECUTE: {what}"),
        raw_data: None,
        source: None,
    })
}

/// Decode one binary-protocol value.
fn read_binary_value(r: &mut ByteReader<'_>, field_type: FieldType, unsigned: bool) -> Option<Value> {
    let value = match field_type {
        FieldType::Tiny => {
            let b = r.read_u8()?;
            Value::Int(if unsigned { i64::from(b) } else { i64::from(b as i8) })
        }
        FieldType::Short | FieldType::Year => {
            let v = r.read_u16_le()?;
            Value::Int(if unsigned { i64::from(v) } else { i64::from(v as i16) })
        }
        FieldType::Long | FieldType::Int24 => {
            let v = r.read_u32_le()?;
            Value::Int(if unsigned { i64::from(v) } else { i64::from(v as i32) })
        }
        FieldType::LongLong => {
            let v = r.read_u64_le()?;
            if unsigned {
                i64::try_from(v).map_or_else(|_| Value::Text(v.to_string()), Value::Int)
            } else {
                Value::Int(v as i64)
            }
        }
        FieldType::Float => {
            let bits = r.read_u32_le()?;
            Value::Double(f64::from(f32::from_bits(bits)))
        }
        FieldType::Double => Value::Double(f64::from_bits(r.read_u64_le()?)),
        FieldType::Date | FieldType::DateTime | FieldType::Timestamp | FieldType::NewDate => {
            read_datetime(r)?
        }
        FieldType::Time => read_time(r)?,
        t if t.is_blob() => Value::Bytes(r.read_str(StringKind::LengthEncoded)?.to_vec()),
        _ => Value::Text(String::from_utf8_lossy(r.read_str(StringKind::LengthEncoded)?).into_owned()),
    };
    Some(value)
}

fn read_datetime(r: &mut ByteReader<'_>) -> Option<Value> {
    let len = r.read_u8()?;
    let mut ts = Timestamp::new(0, 0, 0, 0, 0, 0);
    if len >= 4 {
        ts.year = i32::from(r.read_u16_le()?);
        ts.month = u32::from(r.read_u8()?);
        ts.day = u32::from(r.read_u8()?);
    }
    if len >= 7 {
        ts.hour = u32::from(r.read_u8()?);
        ts.minute = u32::from(r.read_u8()?);
        ts.second = u32::from(r.read_u8()?);
    }
    if len >= 11 {
        ts.millis = r.read_u32_le()? / 1000;
    }
    Some(Value::Timestamp(ts))
}

fn read_time(r: &mut ByteReader<'_>) -> Option<Value> {
    let len = r.read_u8()?;
    if len == 0 {
        return Some(Value::Text("00:00:00".to_string()));
    }
    let negative = r.read_u8()? != 0;
    let days = r.read_u32_le()?;
    let hours = u32::from(r.read_u8()?);
    let minutes = r.read_u8()?;
    let seconds = r.read_u8()?;
    let micros = if len >= 12 { Some(r.read_u32_le()?) } else { None };
    let sign = if negative { "-" } else { "" };
    let total_hours = days * 24 + hours;
    let mut text = format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
    if let Some(us) = micros {
        text.push_str(&format!(".{us:06}"));
    }
    Some(Value::Text(text))
}
