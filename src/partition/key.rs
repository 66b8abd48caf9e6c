use crate::codec::{BinaryDecode, BinaryEncode, BinaryReader, BinaryWriter};
use crate::core::{Result, StreamError, diagnostics, uri};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How the target partition is selected inside its service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionSelector {
    Singleton,
    Numbered { low_key: i64, high_key: i64 },
    Named(String),
}

impl PartitionSelector {
    pub fn kind_code(&self) -> i32 {
        match self {
            PartitionSelector::Singleton => 1,
            PartitionSelector::Numbered { .. } => 2,
            PartitionSelector::Named(_) => 3,
        }
    }
}

/// Identity of a target partition.
///
/// Ordered by selector kind, then service instance (ordinal), then the
/// selector payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    service_instance: String,
    selector: PartitionSelector,
}

impl PartitionKey {
    pub fn singleton(service_instance: &str) -> Result<Self> {
        Self::new(service_instance, PartitionSelector::Singleton)
    }

    pub fn numbered(service_instance: &str, low_key: i64, high_key: i64) -> Result<Self> {
        Self::new(
            service_instance,
            PartitionSelector::Numbered { low_key, high_key },
        )
    }

    pub fn named(service_instance: &str, name: &str) -> Result<Self> {
        Self::new(service_instance, PartitionSelector::Named(name.to_string()))
    }

    pub fn new(service_instance: &str, selector: PartitionSelector) -> Result<Self> {
        if !uri::is_absolute_uri(service_instance) {
            return Err(StreamError::InvalidArgument(format!(
                "service instance '{}' is not an absolute URI",
                service_instance
            )));
        }

        if let PartitionSelector::Numbered { low_key, high_key } = selector {
            if low_key > high_key {
                return Err(StreamError::InvalidArgument(format!(
                    "partition range [{}, {}] is empty",
                    low_key, high_key
                )));
            }
        }

        Ok(Self {
            service_instance: service_instance.to_string(),
            selector,
        })
    }

    pub fn service_instance(&self) -> &str {
        &self.service_instance
    }

    pub fn selector(&self) -> &PartitionSelector {
        &self.selector
    }
}

impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.selector
            .kind_code()
            .cmp(&other.selector.kind_code())
            .then_with(|| self.service_instance.cmp(&other.service_instance))
            .then_with(|| match (&self.selector, &other.selector) {
                (
                    PartitionSelector::Numbered { low_key, high_key },
                    PartitionSelector::Numbered {
                        low_key: other_low,
                        high_key: other_high,
                    },
                ) => (low_key, high_key).cmp(&(other_low, other_high)),
                (PartitionSelector::Named(name), PartitionSelector::Named(other_name)) => {
                    name.as_bytes().cmp(other_name.as_bytes())
                }
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            PartitionSelector::Singleton => write!(f, "{}", self.service_instance),
            PartitionSelector::Numbered { low_key, high_key } => {
                write!(f, "{}[{}..{}]", self.service_instance, low_key, high_key)
            }
            PartitionSelector::Named(name) => write!(f, "{}[{}]", self.service_instance, name),
        }
    }
}

impl BinaryEncode for PartitionKey {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_i32(self.selector.kind_code());
        writer.write_string(&self.service_instance);
        match &self.selector {
            PartitionSelector::Singleton => {}
            PartitionSelector::Numbered { low_key, high_key } => {
                writer.write_i64(*low_key);
                writer.write_i64(*high_key);
            }
            PartitionSelector::Named(name) => writer.write_string(name),
        }
    }
}

impl BinaryDecode for PartitionKey {
    fn decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let kind = reader.read_i32()?;
        let service_instance = reader.read_string()?;
        let selector = match kind {
            1 => PartitionSelector::Singleton,
            2 => PartitionSelector::Numbered {
                low_key: reader.read_i64()?,
                high_key: reader.read_i64()?,
            },
            3 => PartitionSelector::Named(reader.read_string()?),
            other => {
                return Err(diagnostics::violation(
                    "PartitionKey.Decode",
                    format!("unknown partition kind {}", other),
                ));
            }
        };

        Self::new(&service_instance, selector).map_err(|e| StreamError::Codec(e.to_string()))
    }
}
