// ============================================================================
// Binary Codec
// ============================================================================
//
// Canonical on-disk encodings for the consolidated store. All integers are
// little-endian and fixed width. Strings carry a 7-bit variable-length byte
// count followed by UTF-8; opaque payloads carry an i32 byte count. GUIDs are
// written as 16 bytes in the mixed-endian field layout (`Uuid::to_bytes_le`).
//
// ============================================================================

pub mod store_body;
pub mod store_key;

pub use store_body::{
    ConsolidatedStoreBody, InboundStableParameters, OutboundStableParameters, StreamMessageBody,
    StreamMetadataBody, StreamNameBody,
};
pub use store_key::{
    ConsolidatedStoreKey, MetadataKind, StoreKind, StreamMessageKey, StreamMetadataKey,
    StreamNameKey,
};

use crate::core::{Result, StreamError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

const MAX_VARINT_BYTES: usize = 5;

pub trait BinaryEncode {
    fn encode(&self, writer: &mut BinaryWriter);

    fn to_bytes(&self) -> Bytes {
        let mut writer = BinaryWriter::new();
        self.encode(&mut writer);
        writer.finish()
    }
}

pub trait BinaryDecode: Sized {
    fn decode(reader: &mut BinaryReader<'_>) -> Result<Self>;

    /// Decode a complete buffer; trailing bytes are an error.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        let value = Self::decode(&mut reader)?;
        reader.expect_end()?;
        Ok(value)
    }
}

#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_guid(&mut self, value: &Uuid) {
        self.buf.put_slice(&value.to_bytes_le());
    }

    pub fn write_string(&mut self, value: &str) {
        let mut len = value.len() as u32;
        while len >= 0x80 {
            self.buf.put_u8((len as u8) | 0x80);
            len >>= 7;
        }
        self.buf.put_u8(len as u8);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_i32_le(value.len() as i32);
        self.buf.put_slice(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

pub struct BinaryReader<'a> {
    buf: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn require(&self, needed: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(StreamError::Codec(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                needed,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.require(1, "bool")?;
        match self.buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StreamError::Codec(format!("invalid bool byte {}", other))),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.require(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.require(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_guid(&mut self) -> Result<Uuid> {
        self.require(16, "guid")?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes_le(raw))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let mut len: u32 = 0;
        let mut shift = 0;
        for index in 0..MAX_VARINT_BYTES {
            self.require(1, "string length")?;
            let byte = self.buf.get_u8();
            len |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            if index == MAX_VARINT_BYTES - 1 {
                return Err(StreamError::Codec("string length prefix too long".into()));
            }
            shift += 7;
        }

        let len = len as usize;
        self.require(len, "string")?;
        let raw = self.buf[..len].to_vec();
        self.buf.advance(len);
        String::from_utf8(raw).map_err(|e| StreamError::Codec(format!("invalid utf-8: {}", e)))
    }

    pub fn read_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(StreamError::Codec(format!("negative payload length {}", len)));
        }
        let len = len as usize;
        self.require(len, "payload")?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn expect_end(&self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(StreamError::Codec(format!(
                "{} trailing bytes after value",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
