pub mod resources;
pub mod router;

pub use resources::{ProtocolCompletion, RuntimeResources};
pub use router::{InboundStreamCallback, PrefixCallbackRouter};
