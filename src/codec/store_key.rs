// ============================================================================
// Consolidated Store Keys
// ============================================================================
//
// All persisted stream state lives in one ordered store. Every key carries
// its store kind first so that a range scan over one kind never reads
// another. Within a kind:
//
//   Metadata  -> (stream id, metadata kind)
//   Message   -> (stream id, sequence number)
//   Name      -> (stream name, partner key)
//
// ============================================================================

use super::{BinaryDecode, BinaryEncode, BinaryReader, BinaryWriter};
use crate::core::{Result, SequenceNumber, StreamId, diagnostics};
use crate::partition::PartitionKey;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKind {
    Metadata,
    Message,
    Name,
}

impl StoreKind {
    pub fn code(&self) -> i32 {
        match self {
            StoreKind::Metadata => 1001,
            StoreKind::Message => 2001,
            StoreKind::Name => 3001,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1001 => Ok(StoreKind::Metadata),
            2001 => Ok(StoreKind::Message),
            3001 => Ok(StoreKind::Name),
            other => Err(diagnostics::violation(
                "StoreKind.FromCode",
                format!("unknown store kind {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataKind {
    OutboundStableParameters,
    InboundStableParameters,
    ReceiveSequenceNumber,
    SendSequenceNumber,
    DeleteSequenceNumber,
}

impl MetadataKind {
    pub fn code(&self) -> i32 {
        match self {
            MetadataKind::OutboundStableParameters => 1,
            MetadataKind::InboundStableParameters => 2,
            MetadataKind::ReceiveSequenceNumber => 3,
            MetadataKind::SendSequenceNumber => 4,
            MetadataKind::DeleteSequenceNumber => 5,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(MetadataKind::OutboundStableParameters),
            2 => Ok(MetadataKind::InboundStableParameters),
            3 => Ok(MetadataKind::ReceiveSequenceNumber),
            4 => Ok(MetadataKind::SendSequenceNumber),
            5 => Ok(MetadataKind::DeleteSequenceNumber),
            other => Err(diagnostics::violation(
                "MetadataKind.FromCode",
                format!("unknown metadata kind {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamMetadataKey {
    pub stream_id: StreamId,
    pub kind: MetadataKind,
}

impl StreamMetadataKey {
    pub fn new(stream_id: StreamId, kind: MetadataKind) -> Self {
        Self { stream_id, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamMessageKey {
    pub stream_id: StreamId,
    pub sequence_number: SequenceNumber,
}

impl StreamMessageKey {
    pub fn new(stream_id: StreamId, sequence_number: SequenceNumber) -> Self {
        Self {
            stream_id,
            sequence_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamNameKey {
    pub stream_name: String,
    pub partner: PartitionKey,
}

impl StreamNameKey {
    pub fn new(stream_name: impl Into<String>, partner: PartitionKey) -> Self {
        Self {
            stream_name: stream_name.into(),
            partner,
        }
    }
}

impl Ord for StreamNameKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stream_name
            .as_bytes()
            .cmp(other.stream_name.as_bytes())
            .then_with(|| self.partner.cmp(&other.partner))
    }
}

impl PartialOrd for StreamNameKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConsolidatedStoreKey {
    Metadata(StreamMetadataKey),
    Message(StreamMessageKey),
    Name(StreamNameKey),
}

impl ConsolidatedStoreKey {
    pub fn metadata(stream_id: StreamId, kind: MetadataKind) -> Self {
        ConsolidatedStoreKey::Metadata(StreamMetadataKey::new(stream_id, kind))
    }

    pub fn message(stream_id: StreamId, sequence_number: SequenceNumber) -> Self {
        ConsolidatedStoreKey::Message(StreamMessageKey::new(stream_id, sequence_number))
    }

    pub fn name(stream_name: impl Into<String>, partner: PartitionKey) -> Self {
        ConsolidatedStoreKey::Name(StreamNameKey::new(stream_name, partner))
    }

    pub fn store_kind(&self) -> StoreKind {
        match self {
            ConsolidatedStoreKey::Metadata(_) => StoreKind::Metadata,
            ConsolidatedStoreKey::Message(_) => StoreKind::Message,
            ConsolidatedStoreKey::Name(_) => StoreKind::Name,
        }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            ConsolidatedStoreKey::Metadata(key) => Some(key.stream_id),
            ConsolidatedStoreKey::Message(key) => Some(key.stream_id),
            ConsolidatedStoreKey::Name(_) => None,
        }
    }
}

impl Ord for ConsolidatedStoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use ConsolidatedStoreKey::*;
        match (self, other) {
            (Metadata(a), Metadata(b)) => a.cmp(b),
            (Message(a), Message(b)) => a.cmp(b),
            (Name(a), Name(b)) => a.cmp(b),
            _ => self.store_kind().code().cmp(&other.store_kind().code()),
        }
    }
}

impl PartialOrd for ConsolidatedStoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ConsolidatedStoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolidatedStoreKey::Metadata(key) => {
                write!(f, "Metadata({}, {:?})", key.stream_id, key.kind)
            }
            ConsolidatedStoreKey::Message(key) => {
                write!(f, "Message({}, {})", key.stream_id, key.sequence_number)
            }
            ConsolidatedStoreKey::Name(key) => {
                write!(f, "Name({}, {})", key.stream_name, key.partner)
            }
        }
    }
}

impl BinaryEncode for ConsolidatedStoreKey {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_i32(self.store_kind().code());
        match self {
            ConsolidatedStoreKey::Message(key) => {
                writer.write_i64(key.sequence_number);
                writer.write_guid(key.stream_id.as_uuid());
            }
            ConsolidatedStoreKey::Metadata(key) => {
                writer.write_guid(key.stream_id.as_uuid());
                writer.write_i32(key.kind.code());
            }
            ConsolidatedStoreKey::Name(key) => {
                writer.write_string(&key.stream_name);
                key.partner.encode(writer);
            }
        }
    }
}

impl BinaryDecode for ConsolidatedStoreKey {
    fn decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let key = match StoreKind::from_code(reader.read_i32()?)? {
            StoreKind::Message => {
                let sequence_number = reader.read_i64()?;
                let stream_id = StreamId(reader.read_guid()?);
                ConsolidatedStoreKey::message(stream_id, sequence_number)
            }
            StoreKind::Metadata => {
                let stream_id = StreamId(reader.read_guid()?);
                let kind = MetadataKind::from_code(reader.read_i32()?)?;
                ConsolidatedStoreKey::metadata(stream_id, kind)
            }
            StoreKind::Name => {
                let stream_name = reader.read_string()?;
                let partner = PartitionKey::decode(reader)?;
                ConsolidatedStoreKey::name(stream_name, partner)
            }
        };
        Ok(key)
    }
}
