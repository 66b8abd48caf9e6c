use crate::core::{
    PROTOCOL_RESPONSE_SEQUENCE_NUMBER, RECOVERY_PROMPT_SEQUENCE_NUMBER, SequenceNumber, StreamId,
};
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessageKind {
    Payload(Bytes),
    CloseStream,
}

/// One inbound stream message as handed over by the session driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub stream_id: StreamId,
    pub sequence_number: SequenceNumber,
    pub kind: WireMessageKind,
}

impl WireMessage {
    pub fn payload(
        stream_id: StreamId,
        sequence_number: SequenceNumber,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            stream_id,
            sequence_number,
            kind: WireMessageKind::Payload(payload.into()),
        }
    }

    pub fn close(stream_id: StreamId, sequence_number: SequenceNumber) -> Self {
        Self {
            stream_id,
            sequence_number,
            kind: WireMessageKind::CloseStream,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self.kind, WireMessageKind::CloseStream)
    }

    pub fn payload_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            WireMessageKind::Payload(bytes) => Some(bytes),
            WireMessageKind::CloseStream => None,
        }
    }

    /// Protocol responses and recovery prompts are not part of the ordering
    pub fn is_control(&self) -> bool {
        self.sequence_number == PROTOCOL_RESPONSE_SEQUENCE_NUMBER
            || self.sequence_number == RECOVERY_PROMPT_SEQUENCE_NUMBER
    }
}
