pub mod config;
pub mod diagnostics;
pub mod error;
pub mod types;
pub mod uri;

pub use config::StreamConfig;
pub use diagnostics::InvariantPolicy;
pub use error::{Result, StreamError};
pub use types::{
    CloseSequenceNumber, FIRST_MESSAGE_SEQUENCE_NUMBER, INITIAL_LAST_SEQUENCE_NUMBER,
    PROTOCOL_RESPONSE_SEQUENCE_NUMBER, PersistentStreamState, ProtocolResponse,
    RECOVERY_PROMPT_SEQUENCE_NUMBER, RoleEpoch, SequenceNumber, StreamId,
};
