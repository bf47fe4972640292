//! PackStream packer (serializer).

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use super::marker::*;
use super::value::{Structure, Value};
use super::PackStreamError;

/// Serializes values into a growable byte buffer.
///
/// Numeric values always take the shortest admissible wire form: an integer
/// that fits a tiny int is one byte, one that fits `i8` is two, and so on.
pub struct Packer {
    buf: BytesMut,
}

impl Packer {
    /// Packer with a default-sized buffer.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Packer with a pre-sized buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Length of the output.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the packer, yielding the output buffer.
    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    /// Pack any value.
    pub fn pack(&mut self, value: &Value) -> Result<(), PackStreamError> {
        match value {
            Value::Null => {
                self.buf.put_u8(NULL);
                Ok(())
            }
            Value::Boolean(b) => {
                self.buf.put_u8(if *b { TRUE } else { FALSE });
                Ok(())
            }
            Value::Integer(i) => {
                self.pack_int(*i);
                Ok(())
            }
            Value::Float(f) => {
                self.buf.put_u8(FLOAT_64);
                self.buf.put_f64(*f);
                Ok(())
            }
            Value::Bytes(b) => self.pack_bytes(b),
            Value::String(s) => self.pack_string(s),
            Value::List(l) => self.pack_list(l),
            Value::Map(m) => self.pack_map(m),
            Value::Structure(s) => self.pack_structure(s),
        }
    }

    /// Pack an integer in its shortest wire form.
    pub fn pack_int(&mut self, value: i64) {
        if fits_tiny_int(value) {
            self.buf.put_u8(value as u8);
        } else if i8::try_from(value).is_ok() {
            self.buf.put_u8(INT_8);
            self.buf.put_i8(value as i8);
        } else if i16::try_from(value).is_ok() {
            self.buf.put_u8(INT_16);
            self.buf.put_i16(value as i16);
        } else if i32::try_from(value).is_ok() {
            self.buf.put_u8(INT_32);
            self.buf.put_i32(value as i32);
        } else {
            self.buf.put_u8(INT_64);
            self.buf.put_i64(value);
        }
    }

    /// Pack a byte array.
    pub fn pack_bytes(&mut self, value: &[u8]) -> Result<(), PackStreamError> {
        self.size_prefix(value.len(), None, BYTES_8, BYTES_16, Some(BYTES_32), "bytes")?;
        self.buf.put_slice(value);
        Ok(())
    }

    /// Pack a UTF-8 string.
    pub fn pack_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        let bytes = value.as_bytes();
        self.size_prefix(
            bytes.len(),
            Some(TINY_STRING),
            STRING_8,
            STRING_16,
            Some(STRING_32),
            "string",
        )?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Pack a list of values.
    pub fn pack_list(&mut self, values: &[Value]) -> Result<(), PackStreamError> {
        self.size_prefix(
            values.len(),
            Some(TINY_LIST),
            LIST_8,
            LIST_16,
            Some(LIST_32),
            "list",
        )?;
        for v in values {
            self.pack(v)?;
        }
        Ok(())
    }

    /// Pack a string-keyed map.
    pub fn pack_map(&mut self, map: &HashMap<String, Value>) -> Result<(), PackStreamError> {
        self.size_prefix(map.len(), Some(TINY_MAP), MAP_8, MAP_16, Some(MAP_32), "map")?;
        for (k, v) in map {
            self.pack_string(k)?;
            self.pack(v)?;
        }
        Ok(())
    }

    /// Pack a tagged structure. The field-count prefix always matches the
    /// actual field count by construction.
    pub fn pack_structure(&mut self, s: &Structure) -> Result<(), PackStreamError> {
        self.size_prefix(
            s.fields.len(),
            Some(TINY_STRUCT),
            STRUCT_8,
            STRUCT_16,
            None,
            "structure",
        )?;
        self.buf.put_u8(s.tag);
        for field in &s.fields {
            self.pack(field)?;
        }
        Ok(())
    }

    /// Write the marker + size prefix for a sized value, choosing the
    /// smallest representation. `tiny` and `marker32` are absent for kinds
    /// without those forms.
    fn size_prefix(
        &mut self,
        len: usize,
        tiny: Option<u8>,
        marker8: u8,
        marker16: u8,
        marker32: Option<u8>,
        kind: &'static str,
    ) -> Result<(), PackStreamError> {
        match (tiny, marker32) {
            _ if tiny.is_some() && len <= TINY_SIZE_MAX => {
                self.buf.put_u8(tiny.unwrap() | len as u8);
            }
            _ if len <= u8::MAX as usize => {
                self.buf.put_u8(marker8);
                self.buf.put_u8(len as u8);
            }
            _ if len <= u16::MAX as usize => {
                self.buf.put_u8(marker16);
                self.buf.put_u16(len as u16);
            }
            (_, Some(m32)) if len <= u32::MAX as usize => {
                self.buf.put_u8(m32);
                self.buf.put_u32(len as u32);
            }
            _ => return Err(PackStreamError::ValueTooLarge { kind, size: len }),
        }
        Ok(())
    }
}

impl Default for Packer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack a single value into a fresh buffer.
pub fn pack(value: &Value) -> Result<BytesMut, PackStreamError> {
    let mut packer = Packer::new();
    packer.pack(value)?;
    Ok(packer.into_bytes())
}
