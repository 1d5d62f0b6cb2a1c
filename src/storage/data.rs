//! Positioned byte buffer used to encode pages, index rows and values.
//!
//! All fixed-width integers are big-endian. Signed variable-length integers
//! are zig-zag mapped and written in 7-bit groups, least significant first,
//! with the high bit of each byte set when another byte follows.

use crate::access::value::Value;
use crate::storage::error::{StorageError, StorageResult};
use byteorder::{BigEndian, ByteOrder};

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT32: u8 = 3;
const TAG_INT64: u8 = 4;
const TAG_DOUBLE: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_BYTES: u8 = 7;

#[derive(Debug, Clone, Default)]
pub struct Data {
    bytes: Vec<u8>,
    pos: usize,
}

impl Data {
    /// A zero-filled buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            pos: 0,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn reserve(&mut self, n: usize) -> &mut [u8] {
        let end = self.pos + n;
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        let start = self.pos;
        self.pos = end;
        &mut self.bytes[start..end]
    }

    fn take(&mut self, n: usize) -> StorageResult<&[u8]> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(StorageError::FileCorrupted(format!(
                "read of {} bytes at {} past end of {} byte buffer",
                n,
                self.pos,
                self.bytes.len()
            )));
        }
        let start = self.pos;
        self.pos = end;
        Ok(&self.bytes[start..end])
    }

    pub fn write_u8(&mut self, v: u8) {
        self.reserve(1)[0] = v;
    }

    pub fn read_u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn write_u16(&mut self, v: u16) {
        BigEndian::write_u16(self.reserve(2), v);
    }

    pub fn read_u16(&mut self) -> StorageResult<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn write_u32(&mut self, v: u32) {
        BigEndian::write_u32(self.reserve(4), v);
    }

    pub fn read_u32(&mut self) -> StorageResult<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn write_i32(&mut self, v: i32) {
        BigEndian::write_i32(self.reserve(4), v);
    }

    pub fn read_i32(&mut self) -> StorageResult<i32> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn write_bytes(&mut self, src: &[u8]) {
        self.reserve(src.len()).copy_from_slice(src);
    }

    pub fn read_bytes(&mut self, n: usize) -> StorageResult<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    pub fn write_var_long(&mut self, v: i64) {
        let mut x = zigzag(v);
        while x >= 0x80 {
            self.write_u8((x as u8 & 0x7f) | 0x80);
            x >>= 7;
        }
        self.write_u8(x as u8);
    }

    pub fn read_var_long(&mut self) -> StorageResult<i64> {
        let mut x: u64 = 0;
        let mut shift = 0;
        loop {
            let b = self.read_u8()?;
            if shift > 63 {
                return Err(StorageError::FileCorrupted(
                    "variable length integer too long".to_string(),
                ));
            }
            x |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(unzigzag(x));
            }
            shift += 7;
        }
    }

    /// Number of bytes `write_var_long` produces for `v`.
    pub fn var_long_len(v: i64) -> usize {
        let mut x = zigzag(v);
        let mut len = 1;
        while x >= 0x80 {
            x >>= 7;
            len += 1;
        }
        len
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.write_u8(TAG_NULL),
            Value::Boolean(false) => self.write_u8(TAG_FALSE),
            Value::Boolean(true) => self.write_u8(TAG_TRUE),
            Value::Int32(v) => {
                self.write_u8(TAG_INT32);
                self.write_i32(*v);
            }
            Value::Int64(v) => {
                self.write_u8(TAG_INT64);
                self.write_var_long(*v);
            }
            Value::Double(v) => {
                self.write_u8(TAG_DOUBLE);
                BigEndian::write_f64(self.reserve(8), *v);
            }
            Value::String(s) => {
                self.write_u8(TAG_STRING);
                self.write_var_long(s.len() as i64);
                self.write_bytes(s.as_bytes());
            }
            Value::Bytes(b) => {
                self.write_u8(TAG_BYTES);
                self.write_var_long(b.len() as i64);
                self.write_bytes(b);
            }
        }
    }

    pub fn read_value(&mut self) -> StorageResult<Value> {
        let tag = self.read_u8()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Boolean(false),
            TAG_TRUE => Value::Boolean(true),
            TAG_INT32 => Value::Int32(self.read_i32()?),
            TAG_INT64 => Value::Int64(self.read_var_long()?),
            TAG_DOUBLE => Value::Double(BigEndian::read_f64(self.take(8)?)),
            TAG_STRING => {
                let len = self.read_length()?;
                let bytes = self.read_bytes(len)?;
                Value::String(String::from_utf8(bytes).map_err(|e| {
                    StorageError::FileCorrupted(format!("invalid utf-8 in string value: {}", e))
                })?)
            }
            TAG_BYTES => {
                let len = self.read_length()?;
                Value::Bytes(self.read_bytes(len)?)
            }
            _ => {
                return Err(StorageError::FileCorrupted(format!(
                    "unknown value tag {}",
                    tag
                )))
            }
        };
        Ok(value)
    }

    fn read_length(&mut self) -> StorageResult<usize> {
        let len = self.read_var_long()?;
        usize::try_from(len)
            .map_err(|_| StorageError::FileCorrupted(format!("negative length {}", len)))
    }

    /// Number of bytes `write_value` produces for `value`.
    pub fn value_len(value: &Value) -> usize {
        1 + match value {
            Value::Null | Value::Boolean(_) => 0,
            Value::Int32(_) => 4,
            Value::Int64(v) => Self::var_long_len(*v),
            Value::Double(_) => 8,
            Value::String(s) => Self::var_long_len(s.len() as i64) + s.len(),
            Value::Bytes(b) => Self::var_long_len(b.len() as i64) + b.len(),
        }
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(x: u64) -> i64 {
    ((x >> 1) as i64) ^ -((x & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_long_lengths() {
        assert_eq!(Data::var_long_len(0), 1);
        assert_eq!(Data::var_long_len(63), 1);
        assert_eq!(Data::var_long_len(64), 2);
        assert_eq!(Data::var_long_len(-64), 1);
        assert_eq!(Data::var_long_len(i64::MAX), 10);
        assert_eq!(Data::var_long_len(i64::MIN), 10);
    }

    #[test]
    fn test_var_long_boundaries() -> StorageResult<()> {
        let values = [0, 1, -1, 63, 64, -65, 8191, 8192, i64::MAX, i64::MIN];
        let mut data = Data::new(0);
        for v in values {
            let before = data.pos();
            data.write_var_long(v);
            assert_eq!(data.pos() - before, Data::var_long_len(v), "len of {}", v);
        }
        data.set_pos(0);
        for v in values {
            assert_eq!(data.read_var_long()?, v);
        }
        Ok(())
    }

    #[test]
    fn test_value_round_trip() -> StorageResult<()> {
        let values = vec![
            Value::Null,
            Value::Boolean(true),
            Value::Boolean(false),
            Value::Int32(-7),
            Value::Int32(i32::MAX),
            Value::Int64(1 << 40),
            Value::Int64(i64::MIN),
            Value::Double(3.25),
            Value::Double(-0.0),
            Value::Double(f64::INFINITY),
            Value::Double(f64::NEG_INFINITY),
            Value::String("héllo 世界".into()),
            Value::String(String::new()),
            Value::Bytes(vec![1; 200]),
            Value::Bytes(vec![]),
        ];
        let mut data = Data::new(0);
        for value in &values {
            let before = data.pos();
            data.write_value(value);
            assert_eq!(data.pos() - before, Data::value_len(value), "{:?}", value);
        }
        let end = data.pos();

        data.set_pos(0);
        for value in &values {
            let read = data.read_value()?;
            match (value, &read) {
                // -0.0 == 0.0, so compare the bits
                (Value::Double(a), Value::Double(b)) => assert_eq!(a.to_bits(), b.to_bits()),
                _ => assert_eq!(&read, value),
            }
        }
        assert_eq!(data.pos(), end);
        Ok(())
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let mut data = Data::from_bytes(vec![TAG_INT32, 0, 1]);
        let err = data.read_value().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_unknown_tag() {
        let mut data = Data::from_bytes(vec![99]);
        assert!(data.read_value().is_err());
    }

    #[test]
    fn test_fixed_width_big_endian() -> StorageResult<()> {
        let mut data = Data::new(8);
        data.write_u16(0x0102);
        data.write_u32(0x0304_0506);
        assert_eq!(&data.bytes()[..6], &[1, 2, 3, 4, 5, 6]);
        data.set_pos(0);
        assert_eq!(data.read_u16()?, 0x0102);
        assert_eq!(data.read_u32()?, 0x0304_0506);
        Ok(())
    }
}
