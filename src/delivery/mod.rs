pub mod inbound;
pub mod message;
pub mod outbound;
pub mod waiter;

pub use inbound::InboundStream;
pub use message::{WireMessage, WireMessageKind};
pub use outbound::OutboundStream;
pub use waiter::{DeliveryTarget, DeliveryWaiter};
