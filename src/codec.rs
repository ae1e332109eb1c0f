// ABOUTME: Wire-level primitives shared by the frame envelope and method codecs
// ABOUTME: Short/long strings, field tables, and the CodecError type they can fail with

use crate::table::{Table, Value};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Failures that can occur while encoding or decoding the wire-level
/// primitives (short strings, long strings, field tables) or a method body
/// built from them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("buffer ended while decoding {context}")]
    UnexpectedEof { context: &'static str },

    #[error("invalid field-table type tag {tag:#x}")]
    UnknownFieldType { tag: u8 },

    #[error("string field exceeded its declared length")]
    StringTooLong,

    #[error("field validation failed for {field}: {reason}")]
    FieldValidation {
        field: &'static str,
        reason: String,
    },
}

fn need(buf: &impl Buf, n: usize, context: &'static str) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::UnexpectedEof { context })
    } else {
        Ok(())
    }
}

pub fn encode_short_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    if s.len() > u8::MAX as usize {
        return Err(CodecError::StringTooLong);
    }
    buf.put_u8(s.len() as u8);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn decode_short_string(buf: &mut impl Buf) -> Result<String, CodecError> {
    need(buf, 1, "short-string length")?;
    let len = buf.get_u8() as usize;
    need(buf, len, "short-string body")?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| CodecError::FieldValidation {
        field: "short-string",
        reason: "not valid utf-8".into(),
    })
}

pub fn encode_long_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn decode_long_string(buf: &mut impl Buf) -> Result<String, CodecError> {
    need(buf, 4, "long-string length")?;
    let len = buf.get_u32() as usize;
    need(buf, len, "long-string body")?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| CodecError::FieldValidation {
        field: "long-string",
        reason: "not valid utf-8".into(),
    })
}

pub fn encode_long_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), CodecError> {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
    Ok(())
}

pub fn decode_long_bytes(buf: &mut impl Buf) -> Result<Vec<u8>, CodecError> {
    need(buf, 4, "long-bytes length")?;
    let len = buf.get_u32() as usize;
    need(buf, len, "long-bytes body")?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn encode_value(buf: &mut BytesMut, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Bool(b) => {
            buf.put_u8(b't');
            buf.put_u8(*b as u8);
        }
        Value::I32(i) => {
            buf.put_u8(b'I');
            buf.put_i32(*i);
        }
        Value::I64(i) => {
            buf.put_u8(b'l');
            buf.put_i64(*i);
        }
        Value::LongString(s) => {
            buf.put_u8(b'S');
            encode_long_string(buf, s)?;
        }
        Value::Table(t) => {
            buf.put_u8(b'F');
            encode_table(buf, t)?;
        }
        Value::Array(items) => {
            buf.put_u8(b'A');
            let mut body = BytesMut::new();
            for item in items {
                encode_value(&mut body, item)?;
            }
            buf.put_u32(body.len() as u32);
            buf.put_slice(&body);
        }
        Value::Void => {
            buf.put_u8(b'V');
        }
    }
    Ok(())
}

fn decode_value(buf: &mut impl Buf) -> Result<Value, CodecError> {
    need(buf, 1, "field-value type tag")?;
    let tag = buf.get_u8();
    match tag {
        b't' => {
            need(buf, 1, "boolean field")?;
            Ok(Value::Bool(buf.get_u8() != 0))
        }
        b'I' => {
            need(buf, 4, "i32 field")?;
            Ok(Value::I32(buf.get_i32()))
        }
        b'l' => {
            need(buf, 8, "i64 field")?;
            Ok(Value::I64(buf.get_i64()))
        }
        b'S' => Ok(Value::LongString(decode_long_string(buf)?)),
        b'F' => Ok(Value::Table(decode_table(buf)?)),
        b'A' => {
            need(buf, 4, "array length")?;
            let len = buf.get_u32() as usize;
            need(buf, len, "array body")?;
            let mut body = buf.copy_to_bytes(len);
            let mut items = Vec::new();
            while body.has_remaining() {
                items.push(decode_value(&mut body)?);
            }
            Ok(Value::Array(items))
        }
        b'V' => Ok(Value::Void),
        other => Err(CodecError::UnknownFieldType { tag: other }),
    }
}

pub fn encode_table(buf: &mut BytesMut, table: &Table) -> Result<(), CodecError> {
    let mut body = BytesMut::new();
    for (key, value) in table.iter() {
        encode_short_string(&mut body, key)?;
        encode_value(&mut body, value)?;
    }
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(())
}

pub fn decode_table(buf: &mut impl Buf) -> Result<Table, CodecError> {
    need(buf, 4, "table length")?;
    let len = buf.get_u32() as usize;
    need(buf, len, "table body")?;
    let mut body = buf.copy_to_bytes(len);
    let mut table = Table::new();
    while body.has_remaining() {
        let key = decode_short_string(&mut body)?;
        let value = decode_value(&mut body)?;
        table.insert(key, value);
    }
    Ok(table)
}
