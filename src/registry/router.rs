use crate::core::{Result, StreamError, StreamId, uri};
use crate::partition::PartitionKey;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Decides whether an inbound stream requested by a partner is accepted
#[async_trait]
pub trait InboundStreamCallback: Send + Sync {
    async fn inbound_stream_requested(
        &self,
        stream_name: &str,
        partner: &PartitionKey,
        stream_id: StreamId,
    ) -> bool;
}

struct RouteTable {
    /// Longest prefix first; equal lengths by ordinal
    routes: Vec<(String, Arc<dyn InboundStreamCallback>)>,
    default: Option<Arc<dyn InboundStreamCallback>>,
}

/// Dispatch table from stream-name prefixes to acceptance callbacks.
///
/// Matching is a literal string prefix test, so `/ab` also matches `/abc`.
pub struct PrefixCallbackRouter {
    table: Mutex<RouteTable>,
}

fn route_order(a: &str, b: &str) -> Ordering {
    b.len().cmp(&a.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

impl PrefixCallbackRouter {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(RouteTable {
                routes: Vec::new(),
                default: None,
            }),
        }
    }

    pub fn add_prefix(&self, prefix: &str, callback: Arc<dyn InboundStreamCallback>) -> Result<()> {
        if !uri::is_absolute_uri(prefix) {
            return Err(StreamError::InvalidPrefix(prefix.to_string()));
        }

        let mut table = self.table.lock()?;
        match table
            .routes
            .binary_search_by(|(existing, _)| route_order(existing, prefix))
        {
            Ok(_) => Err(StreamError::DuplicatePrefix(prefix.to_string())),
            Err(position) => {
                table.routes.insert(position, (prefix.to_string(), callback));
                debug!(prefix, "inbound callback registered");
                Ok(())
            }
        }
    }

    /// Install the fallback callback. Installing the same callback again is
    /// accepted; a different one is `DefaultCallbackConflict`.
    pub fn set_default(&self, callback: Arc<dyn InboundStreamCallback>) -> Result<()> {
        let mut table = self.table.lock()?;
        match &table.default {
            Some(existing) if !Arc::ptr_eq(existing, &callback) => {
                Err(StreamError::DefaultCallbackConflict)
            }
            _ => {
                table.default = Some(callback);
                Ok(())
            }
        }
    }

    pub fn has_default(&self) -> Result<bool> {
        Ok(self.table.lock()?.default.is_some())
    }

    pub fn lookup(&self, stream_name: &str) -> Result<Option<Arc<dyn InboundStreamCallback>>> {
        let table = self.table.lock()?;
        let matched = table
            .routes
            .iter()
            .find(|(prefix, _)| stream_name.starts_with(prefix.as_str()))
            .map(|(_, callback)| Arc::clone(callback));
        Ok(matched.or_else(|| table.default.clone()))
    }

    pub fn prefixes(&self) -> Result<Vec<String>> {
        Ok(self
            .table
            .lock()?
            .routes
            .iter()
            .map(|(prefix, _)| prefix.clone())
            .collect())
    }

    pub fn clear(&self) -> Result<()> {
        let mut table = self.table.lock()?;
        table.routes.clear();
        table.default = None;
        Ok(())
    }
}

impl Default for PrefixCallbackRouter {
    fn default() -> Self {
        Self::new()
    }
}
