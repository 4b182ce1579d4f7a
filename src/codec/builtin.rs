//! Codecs for the built-in types.  Each takes the registry so composite
//! types recurse through the same table they were dispatched from.

use byteorder::{ByteOrder, LittleEndian};
use chrono::DateTime;

use super::decimal::Decimal;
use super::{TypeRegistry, Value, Dict};
use crate::error::{BakedError, FormatError, Result};
use crate::frame::{pack_record, Records};

fn mismatch(expected: &'static str, value: &Value) -> BakedError {
    BakedError::UnsupportedType(format!("{} passed to the {expected} codec", value.kind()))
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> BakedError {
    FormatError::InvalidPayload { kind, reason: reason.into() }.into()
}

pub(super) fn encode_int(_: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Int(i) => Ok(i.to_le_bytes().to_vec()),
        other => Err(mismatch("int", other)),
    }
}

pub(super) fn decode_int(_: &TypeRegistry, payload: &[u8]) -> Result<Value> {
    if payload.len() != 8 {
        return Err(invalid("int", format!("expected 8 bytes, got {}", payload.len())));
    }
    Ok(Value::Int(LittleEndian::read_i64(payload)))
}

pub(super) fn encode_bool(_: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bool(b) => Ok(vec![u8::from(*b)]),
        other => Err(mismatch("bool", other)),
    }
}

pub(super) fn decode_bool(_: &TypeRegistry, payload: &[u8]) -> Result<Value> {
    match payload {
        [b] => Ok(Value::Bool(*b != 0)),
        _ => Err(invalid("bool", format!("expected 1 byte, got {}", payload.len()))),
    }
}

pub(super) fn encode_str(_: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Str(s) => Ok(s.as_bytes().to_vec()),
        other => Err(mismatch("str", other)),
    }
}

pub(super) fn decode_str(_: &TypeRegistry, payload: &[u8]) -> Result<Value> {
    String::from_utf8(payload.to_vec())
        .map(Value::Str)
        .map_err(|_| FormatError::InvalidUtf8("str payload").into())
}

pub(super) fn encode_float(_: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Float(f) => Ok(Decimal::from_f64(*f)?.to_bytes()),
        other => Err(mismatch("float", other)),
    }
}

pub(super) fn decode_float(_: &TypeRegistry, payload: &[u8]) -> Result<Value> {
    Ok(Value::Float(Decimal::from_bytes("float", payload)?.to_f64()?))
}

pub(super) fn encode_datetime(_: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::DateTime(dt) => Ok(Decimal::from_micros(dt.timestamp_micros()).to_bytes()),
        other => Err(mismatch("datetime", other)),
    }
}

pub(super) fn decode_datetime(_: &TypeRegistry, payload: &[u8]) -> Result<Value> {
    let micros = Decimal::from_bytes("datetime", payload)?.to_micros()?;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(Value::DateTime)
        .ok_or_else(|| invalid("datetime", format!("timestamp {micros}us is out of range")))
}

pub(super) fn encode_list(registry: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    let items = match value {
        Value::List(items) => items,
        other => return Err(mismatch("list", other)),
    };
    let mut out = Vec::new();
    for item in items {
        out.extend(pack_record(&registry.encode(item)?));
    }
    Ok(out)
}

pub(super) fn decode_list(registry: &TypeRegistry, payload: &[u8]) -> Result<Value> {
    Records::new(payload)
        .map(|record| registry.decode(record?))
        .collect::<Result<Vec<_>>>()
        .map(Value::List)
}

pub(super) fn encode_dict(registry: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    let dict = match value {
        Value::Dict(dict) => dict,
        other => return Err(mismatch("dict", other)),
    };
    let mut out = Vec::new();
    for (key, item) in dict.iter() {
        out.extend(pack_record(key.as_bytes()));
        out.extend(pack_record(&registry.encode(item)?));
    }
    Ok(out)
}

pub(super) fn decode_dict(registry: &TypeRegistry, payload: &[u8]) -> Result<Value> {
    let mut dict = Dict::new();
    let mut records = Records::new(payload);
    while let Some(key) = records.next() {
        let key = std::str::from_utf8(key?).map_err(|_| FormatError::InvalidUtf8("dict key"))?;
        let item = records.next().ok_or_else(|| invalid("dict", format!("key '{key}' has no value")))?;
        dict.insert(key, registry.decode(item?)?);
    }
    Ok(Value::Dict(dict))
}
