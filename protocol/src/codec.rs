//! Cursor-based reader and writer for the client's packed binary layouts.
//!
//! Every multi-byte value is little-endian. Booleans occupy exactly one byte.
//! Reads are bounds checked and fail with [`CodecError::Truncated`] instead of
//! running past the end of the received buffer.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::framing::LengthPrefix;
use crate::types::Vector3;

/// Fixed-size value that can be copied to and from the wire.
pub trait WirePrimitive: Copy {
    const SIZE: usize;

    fn decode(bytes: &[u8]) -> Self;

    fn encode(self, out: &mut BytesMut);
}

macro_rules! wire_primitive {
    ($ty:ty, $size:expr, $read:expr, $write:ident) => {
        impl WirePrimitive for $ty {
            const SIZE: usize = $size;

            fn decode(bytes: &[u8]) -> Self {
                $read(bytes)
            }

            fn encode(self, out: &mut BytesMut) {
                out.$write(self);
            }
        }
    };
}

wire_primitive!(u8, 1, |b: &[u8]| b[0], put_u8);
wire_primitive!(i8, 1, |b: &[u8]| b[0] as i8, put_i8);
wire_primitive!(u16, 2, LittleEndian::read_u16, put_u16_le);
wire_primitive!(i16, 2, LittleEndian::read_i16, put_i16_le);
wire_primitive!(u32, 4, LittleEndian::read_u32, put_u32_le);
wire_primitive!(i32, 4, LittleEndian::read_i32, put_i32_le);
wire_primitive!(u64, 8, LittleEndian::read_u64, put_u64_le);
wire_primitive!(i64, 8, LittleEndian::read_i64, put_i64_le);
wire_primitive!(f32, 4, LittleEndian::read_f32, put_f32_le);
wire_primitive!(f64, 8, LittleEndian::read_f64, put_f64_le);

impl WirePrimitive for bool {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn encode(self, out: &mut BytesMut) {
        out.put_u8(self as u8);
    }
}

impl WirePrimitive for Vector3 {
    const SIZE: usize = 12;

    fn decode(bytes: &[u8]) -> Self {
        Vector3::new(
            LittleEndian::read_f32(&bytes[0..4]),
            LittleEndian::read_f32(&bytes[4..8]),
            LittleEndian::read_f32(&bytes[8..12]),
        )
    }

    fn encode(self, out: &mut BytesMut) {
        out.put_f32_le(self.x);
        out.put_f32_le(self.y);
        out.put_f32_le(self.z);
    }
}

/// Width of the length prefix in front of an ASCII string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPrefix {
    Byte,
    Short,
}

impl StringPrefix {
    fn max_len(self) -> usize {
        match self {
            StringPrefix::Byte => u8::MAX as usize,
            StringPrefix::Short => u16::MAX as usize,
        }
    }
}

/// Reads typed values from a received payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }

        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub fn read<T: WirePrimitive>(&mut self) -> Result<T> {
        self.take(T::SIZE).map(T::decode)
    }

    pub fn read_array<T: WirePrimitive + Default, const N: usize>(&mut self) -> Result<[T; N]> {
        let mut values = [T::default(); N];
        for value in values.iter_mut() {
            *value = self.read()?;
        }
        Ok(values)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Everything from the cursor to the end of the payload.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.buffer[self.position..];
        self.position = self.buffer.len();
        slice
    }

    pub fn read_ascii_string(&mut self) -> Result<String> {
        self.read_ascii_string_with(StringPrefix::Byte)
    }

    pub fn read_ascii_string_with(&mut self, prefix: StringPrefix) -> Result<String> {
        let len = match prefix {
            StringPrefix::Byte => self.read::<u8>()? as usize,
            StringPrefix::Short => self.read::<u16>()? as usize,
        };
        let bytes = self.take(len)?;
        Ok(bytes.iter().map(|&b| ascii_char(b)).collect())
    }

    /// 1-byte character count followed by one 4-byte code point per character.
    pub fn read_utf32_string(&mut self) -> Result<String> {
        let chars = self.read::<u8>()? as usize;
        let bytes = self.take(chars * 4)?;
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let code = LittleEndian::read_u32(chunk);
                char::from_u32(code).ok_or(CodecError::InvalidString(code))
            })
            .collect()
    }

    /// Exactly `len` bytes, trailing zero padding stripped.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(bytes[..end].iter().map(|&b| ascii_char(b)).collect())
    }
}

fn ascii_char(byte: u8) -> char {
    if byte.is_ascii() {
        byte as char
    } else {
        '?'
    }
}

/// Builds an outgoing payload, optionally inside a length-prefixed frame.
///
/// When framed, the prefix is reserved up front and backpatched with the
/// payload length in [`PacketWriter::finish`]. The prefix never counts itself.
#[derive(Debug)]
pub struct PacketWriter {
    buffer: BytesMut,
    prefix: Option<LengthPrefix>,
}

impl PacketWriter {
    /// Unframed payload, used for UDP datagrams.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            prefix: None,
        }
    }

    pub fn framed(prefix: LengthPrefix) -> Self {
        let mut buffer = BytesMut::with_capacity(256);
        buffer.put_bytes(0, prefix.size());
        Self {
            buffer,
            prefix: Some(prefix),
        }
    }

    /// Bytes written so far, excluding a reserved length prefix.
    pub fn payload_len(&self) -> usize {
        self.buffer.len() - self.prefix.map_or(0, LengthPrefix::size)
    }

    pub fn write<T: WirePrimitive>(&mut self, value: T) {
        value.encode(&mut self.buffer);
    }

    pub fn write_array<T: WirePrimitive>(&mut self, values: &[T]) {
        for value in values {
            value.encode(&mut self.buffer);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    pub fn write_ascii_string(&mut self, value: &str) {
        self.write_ascii_string_with(value, StringPrefix::Byte);
    }

    /// Non-ASCII characters become `?`; input longer than the prefix allows is cut.
    pub fn write_ascii_string_with(&mut self, value: &str, prefix: StringPrefix) {
        let bytes: Vec<u8> = value
            .chars()
            .take(prefix.max_len())
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect();

        match prefix {
            StringPrefix::Byte => self.buffer.put_u8(bytes.len() as u8),
            StringPrefix::Short => self.buffer.put_u16_le(bytes.len() as u16),
        }
        self.buffer.put_slice(&bytes);
    }

    pub fn write_utf32_string(&mut self, value: &str) {
        let chars: Vec<char> = value.chars().take(u8::MAX as usize).collect();
        self.buffer.put_u8(chars.len() as u8);
        for c in chars {
            self.buffer.put_u32_le(c as u32);
        }
    }

    /// Writes exactly `len` bytes, zero padded or cut as needed.
    pub fn write_fixed_string(&mut self, value: &str, len: usize) {
        let mut written = 0;
        for c in value.chars().take(len) {
            self.buffer.put_u8(if c.is_ascii() { c as u8 } else { b'?' });
            written += 1;
        }
        self.buffer.put_bytes(0, len - written);
    }

    /// Backpatches the length prefix (if any) and returns the finished bytes.
    pub fn finish(mut self) -> Result<Bytes> {
        if let Some(prefix) = self.prefix {
            let len = self.buffer.len() - prefix.size();
            if len > prefix.max_payload() {
                return Err(CodecError::FrameTooLarge {
                    size: len,
                    max: prefix.max_payload(),
                });
            }
            prefix.patch(&mut self.buffer[..prefix.size()], len);
        }
        Ok(self.buffer.freeze())
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_primitives_are_little_endian() {
        let mut writer = PacketWriter::new();
        writer.write(0x1234u16);
        writer.write(-2i32);
        writer.write(true);
        writer.write(1.5f32);
        let bytes = writer.finish().unwrap();

        assert_eq!(&bytes[..2], &[0x34, 0x12]);
        assert_eq!(&bytes[2..6], &[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(bytes[6], 1);
        assert_eq!(bytes.len(), 2 + 4 + 1 + 4);

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read::<u16>().unwrap(), 0x1234);
        assert_eq!(reader.read::<i32>().unwrap(), -2);
        assert!(reader.read::<bool>().unwrap());
        assert_approx_eq!(reader.read::<f32>().unwrap(), 1.5);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_bool_reads_any_nonzero_as_true() {
        let mut reader = PacketReader::new(&[0, 7]);
        assert!(!reader.read::<bool>().unwrap());
        assert!(reader.read::<bool>().unwrap());
    }

    #[test]
    fn test_read_past_end_is_truncation_error() {
        let mut reader = PacketReader::new(&[1, 2, 3]);
        let err = reader.read::<u32>().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Truncated {
                needed: 4,
                remaining: 3
            }
        ));
        // Failed read leaves the cursor alone
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_ascii_string_prefixes() {
        let mut writer = PacketWriter::new();
        writer.write_ascii_string("car_a");
        writer.write_ascii_string_with("long", StringPrefix::Short);
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[6..8], &[4, 0]);

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_ascii_string().unwrap(), "car_a");
        assert_eq!(
            reader.read_ascii_string_with(StringPrefix::Short).unwrap(),
            "long"
        );
    }

    #[test]
    fn test_ascii_string_boundary_lengths() {
        for len in [0usize, 1, 255] {
            let value = "a".repeat(len);
            let mut writer = PacketWriter::new();
            writer.write_ascii_string(&value);
            let bytes = writer.finish().unwrap();
            assert_eq!(bytes.len(), len + 1);

            let mut reader = PacketReader::new(&bytes);
            assert_eq!(reader.read_ascii_string().unwrap(), value);
        }
    }

    #[test]
    fn test_ascii_string_over_limit_is_cut() {
        let mut writer = PacketWriter::new();
        writer.write_ascii_string(&"b".repeat(300));
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes[0], 255);
        assert_eq!(bytes.len(), 256);
    }

    #[test]
    fn test_utf32_prefix_counts_characters() {
        let mut writer = PacketWriter::new();
        writer.write_utf32_string("Zoë");
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes[0], 3);
        assert_eq!(bytes.len(), 1 + 3 * 4);
        assert_eq!(&bytes[9..13], &[0xEB, 0, 0, 0]);

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_utf32_string().unwrap(), "Zoë");
    }

    #[test]
    fn test_utf32_boundary_lengths() {
        for len in [0usize, 1, 255] {
            let value = "ж".repeat(len);
            let mut writer = PacketWriter::new();
            writer.write_utf32_string(&value);
            let bytes = writer.finish().unwrap();
            assert_eq!(bytes.len(), 1 + len * 4);

            let mut reader = PacketReader::new(&bytes);
            assert_eq!(reader.read_utf32_string().unwrap(), value);
        }
    }

    #[test]
    fn test_utf32_invalid_code_point() {
        let bytes = [1u8, 0x00, 0xD8, 0x00, 0x00];
        let mut reader = PacketReader::new(&bytes);
        assert!(matches!(
            reader.read_utf32_string(),
            Err(CodecError::InvalidString(0xD800))
        ));
    }

    #[test]
    fn test_fixed_string_padding() {
        let mut writer = PacketWriter::new();
        writer.write_fixed_string("abc", 8);
        writer.write_fixed_string("toolongvalue", 4);
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..8], b"abc\0\0\0\0\0");
        assert_eq!(&bytes[8..], b"tool");

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_fixed_string(8).unwrap(), "abc");
        assert_eq!(reader.read_fixed_string(4).unwrap(), "tool");
    }

    #[test]
    fn test_fixed_arrays() {
        let mut writer = PacketWriter::new();
        writer.write_array(&[1u8, 2, 3, 4]);
        writer.write_array(&[0.5f32, -0.5]);
        let bytes = writer.finish().unwrap();

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_array::<u8, 4>().unwrap(), [1, 2, 3, 4]);
        let floats = reader.read_array::<f32, 2>().unwrap();
        assert_approx_eq!(floats[0], 0.5);
        assert_approx_eq!(floats[1], -0.5);
    }

    #[test]
    fn test_framed_writer_backpatches_length() {
        let mut writer = PacketWriter::framed(LengthPrefix::U16);
        writer.write(0x46u8);
        writer.write_ascii_string("hello");
        assert_eq!(writer.payload_len(), 7);
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes.len(), 7 + 2);
        assert_eq!(&bytes[..2], &[7, 0]);
    }

    #[test]
    fn test_framed_writer_u32_prefix() {
        let mut writer = PacketWriter::framed(LengthPrefix::U32);
        writer.write(1i32);
        writer.write(2i32);
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes.len(), 8 + 4);
        assert_eq!(&bytes[..4], &[8, 0, 0, 0]);
    }

    #[test]
    fn test_framed_writer_rejects_oversized_payload() {
        let mut writer = PacketWriter::framed(LengthPrefix::U16);
        writer.write_bytes(&vec![0u8; u16::MAX as usize + 1]);
        assert!(matches!(
            writer.finish(),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }
}
