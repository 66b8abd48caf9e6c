use crate::codec::OutboundStableParameters;
use crate::core::{CloseSequenceNumber, PersistentStreamState, StreamId};
use crate::partition::PartitionKey;

/// Send side of one stream as rebuilt from its stable parameters.
///
/// Session drivers own message transmission; this record carries the
/// identity, lifecycle state and close number they coordinate on.
pub struct OutboundStream {
    id: StreamId,
    name: String,
    partner: PartitionKey,
    message_quota: i32,
    close_sequence_number: CloseSequenceNumber,
    state: PersistentStreamState,
}

impl OutboundStream {
    pub fn new(id: StreamId, params: &OutboundStableParameters) -> Self {
        Self {
            id,
            name: params.stream_name.clone(),
            partner: params.partner.clone(),
            message_quota: params.message_quota,
            close_sequence_number: params.close_cell(),
            state: params.state,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partner(&self) -> &PartitionKey {
        &self.partner
    }

    pub fn message_quota(&self) -> i32 {
        self.message_quota
    }

    pub fn close_sequence_number(&self) -> &CloseSequenceNumber {
        &self.close_sequence_number
    }

    pub fn state(&self) -> PersistentStreamState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagnostics::{InvariantPolicy, install_policy};

    #[test]
    fn test_rebuilt_from_parameters() {
        install_policy(InvariantPolicy::Propagate);
        let partner = PartitionKey::numbered("fabric:/app/target", 0, 99).unwrap();
        let mut params = OutboundStableParameters::new("fabric:/streams/orders", partner, 32);
        params.state = PersistentStreamState::Closing;
        params.close_sequence_number = 9;

        let stream = OutboundStream::new(StreamId::new(), &params);
        assert_eq!(stream.state(), PersistentStreamState::Closing);
        assert_eq!(stream.close_sequence_number().get(), Some(9));
        assert!(stream.close_sequence_number().set(10).unwrap_err().is_fatal());
        assert_eq!(stream.message_quota(), 32);
    }
}
