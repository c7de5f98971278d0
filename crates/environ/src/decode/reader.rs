//! A cursor over the raw bytes of a module.

use crate::error::{WasmError, WasmResult};
use crate::operators::MemArg;
use crate::types::ValType;

/// A forward-only reader over a byte slice, tracking its absolute offset
/// within the original module for error reporting.
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Offset of `bytes[0]` within the whole module.
    base: usize,
}

impl<'a> BinaryReader<'a> {
    /// Creates a reader over `bytes`, which begin at absolute module
    /// offset `base`.
    pub fn new(bytes: &'a [u8], base: usize) -> BinaryReader<'a> {
        BinaryReader { bytes, pos: 0, base }
    }

    /// The absolute module offset of the next byte to be read.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// Whether the reader has consumed all of its bytes.
    pub fn done(&self) -> bool {
        self.pos == self.bytes.len()
    }

    /// How many bytes remain.
    pub fn bytes_remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn eof(&self) -> WasmError {
        WasmError::invalid("unexpected end of section or function", self.offset())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> WasmResult<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> WasmResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.eof())?;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| self.eof())?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads an unsigned LEB128 value no wider than 32 bits.
    pub fn read_var_u32(&mut self) -> WasmResult<u32> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift == 28 && byte >> 4 != 0 {
                return Err(WasmError::invalid("integer too large", self.offset() - 1));
            }
            result |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 32 {
                return Err(WasmError::invalid("integer too large", self.offset() - 1));
            }
        }
    }

    /// Reads an unsigned LEB128 value no wider than 64 bits.
    pub fn read_var_u64(&mut self) -> WasmResult<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte >> 1 != 0 {
                return Err(WasmError::invalid("integer too large", self.offset() - 1));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(WasmError::invalid("integer too large", self.offset() - 1));
            }
        }
    }

    /// Reads a signed LEB128 value no wider than 33 bits (used by block
    /// types), returned widened to i64.
    pub fn read_var_s33(&mut self) -> WasmResult<i64> {
        let mut result: i64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
            if shift >= 35 {
                return Err(WasmError::invalid("integer too large", self.offset() - 1));
            }
        }
    }

    /// Reads a signed LEB128 value no wider than 32 bits.
    pub fn read_var_i32(&mut self) -> WasmResult<i32> {
        let mut result: i32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= (i32::from(byte & 0x7f)) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 32 && byte & 0x40 != 0 {
                    result |= -1i32 << shift;
                }
                return Ok(result);
            }
            if shift >= 35 {
                return Err(WasmError::invalid("integer too large", self.offset() - 1));
            }
        }
    }

    /// Reads a signed LEB128 value no wider than 64 bits.
    pub fn read_var_i64(&mut self) -> WasmResult<i64> {
        let mut result: i64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= (i64::from(byte & 0x7f)) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
            if shift >= 70 {
                return Err(WasmError::invalid("integer too large", self.offset() - 1));
            }
        }
    }

    /// Reads a little-endian `f32`, returned as raw bits.
    pub fn read_f32(&mut self) -> WasmResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    /// Reads a little-endian `f64`, returned as raw bits.
    pub fn read_f64(&mut self) -> WasmResult<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Reads a length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> WasmResult<&'a str> {
        let len = self.read_var_u32()? as usize;
        let offset = self.offset();
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| WasmError::invalid("invalid UTF-8 name", offset))
    }

    /// Reads a value type byte.
    pub fn read_val_type(&mut self) -> WasmResult<ValType> {
        let offset = self.offset();
        match self.read_u8()? {
            0x7f => Ok(ValType::I32),
            0x7e => Ok(ValType::I64),
            0x7d => Ok(ValType::F32),
            0x7c => Ok(ValType::F64),
            0x7b => Ok(ValType::V128),
            0x70 => Ok(ValType::FuncRef),
            0x6f => Ok(ValType::ExternRef),
            b => Err(WasmError::invalid(
                format!("invalid value type {b:#04x}"),
                offset,
            )),
        }
    }

    /// Reads the flags+min+max encoding shared by memory and table limits.
    /// Returns `(min, max, shared)`.
    pub fn read_limits(&mut self) -> WasmResult<(u64, Option<u64>, bool)> {
        let offset = self.offset();
        match self.read_u8()? {
            0x00 => Ok((self.read_var_u64()?, None, false)),
            0x01 => {
                let min = self.read_var_u64()?;
                let max = self.read_var_u64()?;
                Ok((min, Some(max), false))
            }
            0x03 => {
                let min = self.read_var_u64()?;
                let max = self.read_var_u64()?;
                Ok((min, Some(max), true))
            }
            b => Err(WasmError::invalid(
                format!("invalid limits flags {b:#04x}"),
                offset,
            )),
        }
    }

    /// Reads the alignment+offset immediate of a memory access.
    pub fn read_memarg(&mut self) -> WasmResult<MemArg> {
        let align = self.read_var_u32()?;
        let offset_pos = self.offset();
        let offset = self.read_var_u64()?;
        let offset = u32::try_from(offset)
            .map_err(|_| WasmError::invalid("memory offset too large", offset_pos))?;
        Ok(MemArg { offset, align })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leb_u32() {
        let mut r = BinaryReader::new(&[0xe5, 0x8e, 0x26], 0);
        assert_eq!(r.read_var_u32().unwrap(), 624485);
        assert!(r.done());

        // Five bytes with high bits set past 32 bits of payload.
        let mut r = BinaryReader::new(&[0xff, 0xff, 0xff, 0xff, 0x7f], 0);
        assert!(r.read_var_u32().is_err());

        let mut r = BinaryReader::new(&[0xff, 0xff, 0xff, 0xff, 0x0f], 0);
        assert_eq!(r.read_var_u32().unwrap(), u32::MAX);
    }

    #[test]
    fn leb_i32() {
        let mut r = BinaryReader::new(&[0x7f], 0);
        assert_eq!(r.read_var_i32().unwrap(), -1);
        let mut r = BinaryReader::new(&[0x80, 0x7f], 0);
        assert_eq!(r.read_var_i32().unwrap(), -128);
        let mut r = BinaryReader::new(&[0x3f], 0);
        assert_eq!(r.read_var_i32().unwrap(), 63);
    }

    #[test]
    fn truncated_input_reports_offset() {
        let mut r = BinaryReader::new(&[0x80], 16);
        match r.read_var_u32() {
            Err(WasmError::InvalidWebAssembly { offset, .. }) => assert_eq!(offset, 17),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn names_must_be_utf8() {
        let mut r = BinaryReader::new(&[0x02, 0xff, 0xfe], 0);
        assert!(r.read_name().is_err());
    }
}
