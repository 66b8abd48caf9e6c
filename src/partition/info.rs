use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Physical location of a partition's current primary and the era it was
/// published under. Ordered by endpoint, then era.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionInfo {
    endpoint: String,
    era: Uuid,
}

impl PartitionInfo {
    pub fn new(endpoint: impl Into<String>, era: Uuid) -> Self {
        Self {
            endpoint: endpoint.into(),
            era,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn era(&self) -> Uuid {
        self.era
    }

    /// Same endpoint but a different incarnation of the primary
    pub fn is_restart_of(&self, other: &PartitionInfo) -> bool {
        self.endpoint == other.endpoint && self.era != other.era
    }
}

impl fmt::Display for PartitionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.endpoint, self.era)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_endpoint_then_era() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let a_high = PartitionInfo::new("tcp://a:1", high);
        let a_low = PartitionInfo::new("tcp://a:1", low);
        let b_low = PartitionInfo::new("tcp://b:1", low);

        let mut infos = vec![b_low.clone(), a_high.clone(), a_low.clone()];
        infos.sort();
        assert_eq!(infos, vec![a_low.clone(), a_high.clone(), b_low.clone()]);
        assert!(a_high.is_restart_of(&a_low));
        assert!(!b_low.is_restart_of(&a_low));
    }
}
