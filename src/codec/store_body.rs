use super::store_key::{MetadataKind, StoreKind};
use super::{BinaryDecode, BinaryEncode, BinaryReader, BinaryWriter};
use crate::core::{
    CloseSequenceNumber, INITIAL_LAST_SEQUENCE_NUMBER, PersistentStreamState, Result,
    SequenceNumber, StreamError, StreamId,
};
use crate::partition::PartitionKey;
use bytes::Bytes;

/// Durable description of an outbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundStableParameters {
    pub stream_name: String,
    pub partner: PartitionKey,
    pub state: PersistentStreamState,
    pub close_sequence_number: SequenceNumber,
    pub message_quota: i32,
}

impl OutboundStableParameters {
    pub fn new(stream_name: impl Into<String>, partner: PartitionKey, message_quota: i32) -> Self {
        Self {
            stream_name: stream_name.into(),
            partner,
            state: PersistentStreamState::Initialized,
            close_sequence_number: INITIAL_LAST_SEQUENCE_NUMBER,
            message_quota,
        }
    }

    pub fn close_cell(&self) -> CloseSequenceNumber {
        CloseSequenceNumber::with_value(self.close_sequence_number)
    }
}

/// Durable description of an inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundStableParameters {
    pub stream_name: String,
    pub partner: PartitionKey,
    pub state: PersistentStreamState,
    pub close_sequence_number: SequenceNumber,
}

impl InboundStableParameters {
    pub fn new(stream_name: impl Into<String>, partner: PartitionKey) -> Self {
        Self {
            stream_name: stream_name.into(),
            partner,
            state: PersistentStreamState::Initialized,
            close_sequence_number: INITIAL_LAST_SEQUENCE_NUMBER,
        }
    }

    pub fn close_cell(&self) -> CloseSequenceNumber {
        CloseSequenceNumber::with_value(self.close_sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMetadataBody {
    Outbound(OutboundStableParameters),
    Inbound(InboundStableParameters),
    ReceiveSequenceNumber(SequenceNumber),
    SendSequenceNumber(SequenceNumber),
    DeleteSequenceNumber(SequenceNumber),
}

impl StreamMetadataBody {
    pub fn kind(&self) -> MetadataKind {
        match self {
            StreamMetadataBody::Outbound(_) => MetadataKind::OutboundStableParameters,
            StreamMetadataBody::Inbound(_) => MetadataKind::InboundStableParameters,
            StreamMetadataBody::ReceiveSequenceNumber(_) => MetadataKind::ReceiveSequenceNumber,
            StreamMetadataBody::SendSequenceNumber(_) => MetadataKind::SendSequenceNumber,
            StreamMetadataBody::DeleteSequenceNumber(_) => MetadataKind::DeleteSequenceNumber,
        }
    }

    /// The counter carried by sequence-number bodies
    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        match self {
            StreamMetadataBody::ReceiveSequenceNumber(n)
            | StreamMetadataBody::SendSequenceNumber(n)
            | StreamMetadataBody::DeleteSequenceNumber(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessageBody {
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamNameBody {
    pub stream_id: StreamId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidatedStoreBody {
    Metadata(StreamMetadataBody),
    Message(StreamMessageBody),
    Name(StreamNameBody),
}

impl ConsolidatedStoreBody {
    pub fn store_kind(&self) -> StoreKind {
        match self {
            ConsolidatedStoreBody::Metadata(_) => StoreKind::Metadata,
            ConsolidatedStoreBody::Message(_) => StoreKind::Message,
            ConsolidatedStoreBody::Name(_) => StoreKind::Name,
        }
    }

    pub fn as_metadata(&self) -> Option<&StreamMetadataBody> {
        match self {
            ConsolidatedStoreBody::Metadata(body) => Some(body),
            _ => None,
        }
    }

    /// Encode a possibly absent body; absence is a single `false` flag.
    pub fn encode_optional(body: Option<&ConsolidatedStoreBody>) -> Bytes {
        let mut writer = BinaryWriter::new();
        match body {
            Some(body) => body.encode(&mut writer),
            None => writer.write_bool(false),
        }
        writer.finish()
    }

    pub fn decode_optional(bytes: &[u8]) -> Result<Option<ConsolidatedStoreBody>> {
        let mut reader = BinaryReader::new(bytes);
        let body = if reader.read_bool()? {
            Some(Self::decode_present(&mut reader)?)
        } else {
            None
        };
        reader.expect_end()?;
        Ok(body)
    }

    fn decode_present(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let body = match StoreKind::from_code(reader.read_i32()?)? {
            StoreKind::Metadata => ConsolidatedStoreBody::Metadata(decode_metadata(reader)?),
            StoreKind::Message => ConsolidatedStoreBody::Message(StreamMessageBody {
                payload: reader.read_bytes()?,
            }),
            StoreKind::Name => ConsolidatedStoreBody::Name(StreamNameBody {
                stream_id: StreamId(reader.read_guid()?),
            }),
        };
        Ok(body)
    }
}

impl From<StreamMetadataBody> for ConsolidatedStoreBody {
    fn from(body: StreamMetadataBody) -> Self {
        ConsolidatedStoreBody::Metadata(body)
    }
}

fn encode_metadata(body: &StreamMetadataBody, writer: &mut BinaryWriter) {
    writer.write_i32(body.kind().code());
    match body {
        StreamMetadataBody::Outbound(params) => {
            writer.write_string(&params.stream_name);
            params.partner.encode(writer);
            writer.write_i32(params.state.code());
            writer.write_i64(params.close_sequence_number);
            writer.write_i32(params.message_quota);
        }
        StreamMetadataBody::Inbound(params) => {
            writer.write_string(&params.stream_name);
            params.partner.encode(writer);
            writer.write_i32(params.state.code());
            writer.write_i64(params.close_sequence_number);
        }
        StreamMetadataBody::ReceiveSequenceNumber(n)
        | StreamMetadataBody::SendSequenceNumber(n)
        | StreamMetadataBody::DeleteSequenceNumber(n) => writer.write_i64(*n),
    }
}

fn decode_metadata(reader: &mut BinaryReader<'_>) -> Result<StreamMetadataBody> {
    let body = match MetadataKind::from_code(reader.read_i32()?)? {
        MetadataKind::OutboundStableParameters => {
            StreamMetadataBody::Outbound(OutboundStableParameters {
                stream_name: reader.read_string()?,
                partner: PartitionKey::decode(reader)?,
                state: PersistentStreamState::from_code(reader.read_i32()?)?,
                close_sequence_number: reader.read_i64()?,
                message_quota: reader.read_i32()?,
            })
        }
        MetadataKind::InboundStableParameters => {
            StreamMetadataBody::Inbound(InboundStableParameters {
                stream_name: reader.read_string()?,
                partner: PartitionKey::decode(reader)?,
                state: PersistentStreamState::from_code(reader.read_i32()?)?,
                close_sequence_number: reader.read_i64()?,
            })
        }
        MetadataKind::ReceiveSequenceNumber => {
            StreamMetadataBody::ReceiveSequenceNumber(reader.read_i64()?)
        }
        MetadataKind::SendSequenceNumber => {
            StreamMetadataBody::SendSequenceNumber(reader.read_i64()?)
        }
        MetadataKind::DeleteSequenceNumber => {
            StreamMetadataBody::DeleteSequenceNumber(reader.read_i64()?)
        }
    };
    Ok(body)
}

impl BinaryEncode for ConsolidatedStoreBody {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_bool(true);
        writer.write_i32(self.store_kind().code());
        match self {
            ConsolidatedStoreBody::Metadata(body) => encode_metadata(body, writer),
            ConsolidatedStoreBody::Message(body) => writer.write_bytes(&body.payload),
            ConsolidatedStoreBody::Name(body) => writer.write_guid(body.stream_id.as_uuid()),
        }
    }
}

impl BinaryDecode for ConsolidatedStoreBody {
    /// Decodes a present body; an absent flag is a codec error here.
    fn decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        if !reader.read_bool()? {
            return Err(StreamError::Codec("expected a present store body".into()));
        }
        Self::decode_present(reader)
    }
}
