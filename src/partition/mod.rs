pub mod info;
pub mod key;

pub use info::PartitionInfo;
pub use key::{PartitionKey, PartitionSelector};
