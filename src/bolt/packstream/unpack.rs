//! PackStream unpacker (deserializer).

use bytes::Buf;
use std::collections::HashMap;

use super::catalog::StructCatalog;
use super::marker::*;
use super::value::{Structure, Value};
use super::PackStreamError;

/// Incremental reader over a byte slice holding one or more packed values.
///
/// The unpacker tracks its position so a caller can decode one message while
/// the next is still arriving; truncated input surfaces as
/// [`PackStreamError::UnexpectedEof`] rather than a partial value.
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
    catalog: StructCatalog,
}

impl<'a> Unpacker<'a> {
    /// Unpacker over `data`, validating structures against `catalog`.
    pub fn new(data: &'a [u8], catalog: StructCatalog) -> Self {
        Self { data, pos: 0, catalog }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Whether the input is exhausted.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unpack the next value.
    pub fn unpack(&mut self) -> Result<Value, PackStreamError> {
        let marker = self.take_u8()?;
        match marker {
            0x00..=0x7F | 0xF0..=0xFF => Ok(Value::Integer(tiny_int_value(marker))),
            0x80..=0x8F => self.take_string(tiny_size(marker)),
            0x90..=0x9F => self.take_list(tiny_size(marker)),
            0xA0..=0xAF => self.take_map(tiny_size(marker)),
            0xB0..=0xBF => self.take_structure(tiny_size(marker)),

            NULL => Ok(Value::Null),
            TRUE => Ok(Value::Boolean(true)),
            FALSE => Ok(Value::Boolean(false)),
            FLOAT_64 => Ok(Value::Float(self.take_f64()?)),

            INT_8 => Ok(Value::Integer(self.take_i8()? as i64)),
            INT_16 => Ok(Value::Integer(self.take_i16()? as i64)),
            INT_32 => Ok(Value::Integer(self.take_i32()? as i64)),
            INT_64 => Ok(Value::Integer(self.take_i64()?)),

            BYTES_8 => {
                let len = self.take_u8()? as usize;
                self.take_bytes_value(len)
            }
            BYTES_16 => {
                let len = self.take_u16()? as usize;
                self.take_bytes_value(len)
            }
            BYTES_32 => {
                let len = self.take_u32()? as usize;
                self.take_bytes_value(len)
            }

            STRING_8 => {
                let len = self.take_u8()? as usize;
                self.take_string(len)
            }
            STRING_16 => {
                let len = self.take_u16()? as usize;
                self.take_string(len)
            }
            STRING_32 => {
                let len = self.take_u32()? as usize;
                self.take_string(len)
            }

            LIST_8 => {
                let len = self.take_u8()? as usize;
                self.take_list(len)
            }
            LIST_16 => {
                let len = self.take_u16()? as usize;
                self.take_list(len)
            }
            LIST_32 => {
                let len = self.take_u32()? as usize;
                self.take_list(len)
            }

            MAP_8 => {
                let len = self.take_u8()? as usize;
                self.take_map(len)
            }
            MAP_16 => {
                let len = self.take_u16()? as usize;
                self.take_map(len)
            }
            MAP_32 => {
                let len = self.take_u32()? as usize;
                self.take_map(len)
            }

            STRUCT_8 => {
                let len = self.take_u8()? as usize;
                self.take_structure(len)
            }
            STRUCT_16 => {
                let len = self.take_u16()? as usize;
                self.take_structure(len)
            }

            other => Err(PackStreamError::UnknownMarker(other)),
        }
    }

    /// Read a structure header (marker + tag) without unpacking the fields.
    ///
    /// Used by the message layer, which owns the envelope structure and
    /// unpacks its fields one by one. The tag is not catalog-checked here;
    /// message tags live outside the value-type catalog.
    pub fn unpack_struct_header(&mut self) -> Result<(u8, usize), PackStreamError> {
        let marker = self.take_u8()?;
        let arity = match marker {
            0xB0..=0xBF => tiny_size(marker),
            STRUCT_8 => self.take_u8()? as usize,
            STRUCT_16 => self.take_u16()? as usize,
            other => return Err(PackStreamError::UnknownMarker(other)),
        };
        let tag = self.take_u8()?;
        Ok((tag, arity))
    }

    fn take_string(&mut self, len: usize) -> Result<Value, PackStreamError> {
        let bytes = self.take_slice(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?;
        Ok(Value::String(s.to_string()))
    }

    fn take_bytes_value(&mut self, len: usize) -> Result<Value, PackStreamError> {
        Ok(Value::Bytes(self.take_slice(len)?.to_vec()))
    }

    fn take_list(&mut self, len: usize) -> Result<Value, PackStreamError> {
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.unpack()?);
        }
        Ok(Value::List(items))
    }

    fn take_map(&mut self, len: usize) -> Result<Value, PackStreamError> {
        let mut map = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = match self.unpack()? {
                Value::String(s) => s,
                other => return Err(PackStreamError::InvalidMapKey(other.type_name())),
            };
            let value = self.unpack()?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn take_structure(&mut self, arity: usize) -> Result<Value, PackStreamError> {
        let tag = self.take_u8()?;
        self.catalog.check(tag, arity)?;
        let mut fields = Vec::with_capacity(arity.min(64));
        for _ in 0..arity {
            fields.push(self.unpack()?);
        }
        Ok(Value::Structure(Structure::new(tag, fields)))
    }

    fn take_u8(&mut self) -> Result<u8, PackStreamError> {
        let byte = *self.data.get(self.pos).ok_or(PackStreamError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn take_i8(&mut self) -> Result<i8, PackStreamError> {
        Ok(self.take_u8()? as i8)
    }

    fn take_u16(&mut self) -> Result<u16, PackStreamError> {
        Ok(self.take_slice(2).map(|mut s| s.get_u16())?)
    }

    fn take_i16(&mut self) -> Result<i16, PackStreamError> {
        Ok(self.take_slice(2).map(|mut s| s.get_i16())?)
    }

    fn take_u32(&mut self) -> Result<u32, PackStreamError> {
        Ok(self.take_slice(4).map(|mut s| s.get_u32())?)
    }

    fn take_i32(&mut self) -> Result<i32, PackStreamError> {
        Ok(self.take_slice(4).map(|mut s| s.get_i32())?)
    }

    fn take_i64(&mut self) -> Result<i64, PackStreamError> {
        Ok(self.take_slice(8).map(|mut s| s.get_i64())?)
    }

    fn take_f64(&mut self) -> Result<f64, PackStreamError> {
        Ok(self.take_slice(8).map(|mut s| s.get_f64())?)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], PackStreamError> {
        if self.remaining() < len {
            return Err(PackStreamError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

/// Unpack a single value from a complete buffer.
pub fn unpack(data: &[u8], catalog: StructCatalog) -> Result<Value, PackStreamError> {
    Unpacker::new(data, catalog).unpack()
}
