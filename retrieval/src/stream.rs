//! Binary stream primitives for moving query objects between nodes.
//!
//! Multi-byte numbers are big-endian. Lengths are variable-length integers
//! (seven bits per byte, low bits first, high bit set on all but the last
//! byte). Strings are a length followed by UTF-8 bytes. Optional values are a
//! presence byte followed by the value when present.

use bytes::{Buf, BufMut};

use crate::error::QueryError;

/// Writing side of the stream format.
pub trait StreamWrite: BufMut {
    fn write_vint(&mut self, mut value: u32) {
        while value & !0x7f != 0 {
            self.put_u8(((value & 0x7f) | 0x80) as u8);
            value >>= 7;
        }
        self.put_u8(value as u8);
    }

    fn write_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn write_string(&mut self, value: &str) {
        self.write_vint(value.len() as u32);
        self.put_slice(value.as_bytes());
    }

    fn write_optional_string(&mut self, value: Option<&str>) {
        self.write_bool(value.is_some());
        if let Some(value) = value {
            self.write_string(value);
        }
    }

    fn write_float(&mut self, value: f32) {
        self.put_f32(value);
    }

    fn write_optional_float(&mut self, value: Option<f32>) {
        self.write_bool(value.is_some());
        if let Some(value) = value {
            self.put_f32(value);
        }
    }

    fn write_float_array(&mut self, values: &[f32]) {
        self.write_vint(values.len() as u32);
        for value in values {
            self.put_f32(*value);
        }
    }

    fn write_string_array(&mut self, values: &[String]) {
        self.write_vint(values.len() as u32);
        for value in values {
            self.write_string(value);
        }
    }
}

impl<B: BufMut + ?Sized> StreamWrite for B {}

/// Reading side of the stream format.
pub trait StreamRead: Buf {
    fn ensure(&self, len: usize, what: &'static str) -> Result<(), QueryError> {
        if self.remaining() < len {
            return Err(QueryError::UnexpectedEof(what));
        }
        Ok(())
    }

    fn read_vint(&mut self) -> Result<u32, QueryError> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            self.ensure(1, "vint")?;
            let byte = self.get_u8();
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(QueryError::InvalidData("vint is too long".to_string()))
    }

    fn read_bool(&mut self) -> Result<bool, QueryError> {
        self.ensure(1, "bool")?;
        match self.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(QueryError::InvalidData(format!(
                "unexpected boolean byte {other}"
            ))),
        }
    }

    fn read_u32(&mut self) -> Result<u32, QueryError> {
        self.ensure(4, "int")?;
        Ok(self.get_u32())
    }

    fn read_string(&mut self) -> Result<String, QueryError> {
        let len = self.read_vint()? as usize;
        self.ensure(len, "string")?;
        let mut bytes = vec![0; len];
        self.copy_to_slice(&mut bytes);
        String::from_utf8(bytes).map_err(|e| QueryError::InvalidData(e.to_string()))
    }

    fn read_optional_string(&mut self) -> Result<Option<String>, QueryError> {
        if self.read_bool()? {
            self.read_string().map(Some)
        } else {
            Ok(None)
        }
    }

    fn read_float(&mut self) -> Result<f32, QueryError> {
        self.ensure(4, "float")?;
        Ok(self.get_f32())
    }

    fn read_optional_float(&mut self) -> Result<Option<f32>, QueryError> {
        if self.read_bool()? {
            self.read_float().map(Some)
        } else {
            Ok(None)
        }
    }

    fn read_float_array(&mut self) -> Result<Vec<f32>, QueryError> {
        let len = self.read_vint()? as usize;
        self.ensure(len.saturating_mul(4), "float array")?;
        Ok((0..len).map(|_| self.get_f32()).collect())
    }

    fn read_string_array(&mut self) -> Result<Vec<String>, QueryError> {
        let len = self.read_vint()? as usize;
        (0..len).map(|_| self.read_string()).collect()
    }
}

impl<B: Buf + ?Sized> StreamRead for B {}
