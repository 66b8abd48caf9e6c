// ============================================================================
// Delivery Waiter
// ============================================================================
//
// One outstanding receive: stream, expected sequence number and the
// transaction that consumes it. Exactly one of the following resolves it:
//
//   delivery  -> the payload or close message (after validation)
//   timeout   -> Timeout, only if the waiter could still be evicted
//   txn close -> ObjectClosed
//   role loss -> NotPrimary
//
// Eviction from the stream slot is the claim: whoever removes the waiter
// from its stream owns its resolution.
//
// ============================================================================

use super::message::{WireMessage, WireMessageKind};
use crate::core::{CloseSequenceNumber, Result, SequenceNumber, StreamError, StreamId, diagnostics};
use crate::sync::{Completion, WaitTimeout, wait_with_delay};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::sync::Weak;
use tracing::{debug, warn};

/// The stream side a waiter reports back to
#[async_trait]
pub trait DeliveryTarget: Send + Sync {
    fn stream_id(&self) -> StreamId;

    fn close_sequence_number(&self) -> &CloseSequenceNumber;

    /// Record `close` as the close sequence number and mark the inbound side
    /// closed, inside `txn`.
    async fn persist_close(&self, txn: TransactionId, close: SequenceNumber) -> Result<()>;

    /// Remove the waiter registered for `txn` if it still expects `expected`
    fn evict_waiter(&self, expected: SequenceNumber, txn: TransactionId) -> Result<bool>;
}

pub struct DeliveryWaiter {
    expected: SequenceNumber,
    txn: TransactionId,
    target: Weak<dyn DeliveryTarget>,
    result: Completion<WireMessage>,
}

impl DeliveryWaiter {
    pub fn new(expected: SequenceNumber, txn: TransactionId, target: Weak<dyn DeliveryTarget>) -> Self {
        Self {
            expected,
            txn,
            target,
            result: Completion::new(),
        }
    }

    pub fn expected(&self) -> SequenceNumber {
        self.expected
    }

    pub fn transaction(&self) -> TransactionId {
        self.txn
    }

    pub fn completion(&self) -> &Completion<WireMessage> {
        &self.result
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_resolved()
    }

    pub async fn wait(&self) -> Result<WireMessage> {
        self.result.wait().await
    }

    pub async fn deliver(&self, msg: WireMessage) -> Result<()> {
        match msg.kind {
            WireMessageKind::CloseStream => self.deliver_close(msg).await,
            WireMessageKind::Payload(_) => self.deliver_payload(msg),
        }
    }

    pub async fn deliver_close(&self, msg: WireMessage) -> Result<()> {
        let Some(target) = self.target.upgrade() else {
            self.reject(StreamError::ObjectClosed);
            return Ok(());
        };

        if let Some(prior) = target.close_sequence_number().get() {
            if prior != msg.sequence_number {
                return Err(diagnostics::violation(
                    "DeliveryWaiter.DeliverClose",
                    format!(
                        "stream {} closed at {} received close at {}",
                        target.stream_id(),
                        prior,
                        msg.sequence_number
                    ),
                ));
            }
        }

        match target.persist_close(self.txn, msg.sequence_number).await {
            Ok(()) => {}
            Err(
                err @ (StreamError::ObjectClosed | StreamError::NotPrimary | StreamError::NotReadable),
            ) => {
                debug!(stream = %target.stream_id(), txn = %self.txn, %err, "close not recorded");
                self.reject(err);
                return Ok(());
            }
            Err(err) => {
                return Err(diagnostics::violation(
                    "DeliveryWaiter.DeliverClose",
                    format!("unexpected failure recording close: {}", err),
                ));
            }
        }

        target.close_sequence_number().set(msg.sequence_number)?;
        self.resolve(msg);
        Ok(())
    }

    pub fn deliver_payload(&self, msg: WireMessage) -> Result<()> {
        if let Some(target) = self.target.upgrade() {
            if let Some(close) = target.close_sequence_number().get() {
                if msg.sequence_number >= close {
                    return Err(diagnostics::violation(
                        "DeliveryWaiter.DeliverPayload",
                        format!(
                            "stream {} got payload {} at or after close {}",
                            target.stream_id(),
                            msg.sequence_number,
                            close
                        ),
                    ));
                }
            }
        }

        self.resolve(msg);
        Ok(())
    }

    /// Race the result against `timeout`. When the timeout wins and the
    /// waiter can still be evicted from its stream, resolve with `Timeout`.
    /// A failed eviction resolves with that failure.
    pub async fn on_timeout(&self, timeout: WaitTimeout) {
        if wait_with_delay(timeout, self.result.wait()).await.is_some() {
            return;
        }

        match self.target.upgrade() {
            Some(target) => match target.evict_waiter(self.expected, self.txn) {
                Ok(true) => {
                    debug!(stream = %target.stream_id(), expected = self.expected, "receive timed out");
                    self.result.try_set_error(StreamError::Timeout);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(stream = %target.stream_id(), expected = self.expected, %err, "eviction failed");
                    self.result.try_set_error(err);
                }
            },
            None => {
                self.result.try_set_error(StreamError::ObjectClosed);
            }
        }
    }

    pub fn on_transaction_closed(&self, txn: TransactionId) -> Result<()> {
        diagnostics::ensure(txn == self.txn, "DeliveryWaiter.TransactionClosed", || {
            format!("waiter of {} closed by {}", self.txn, txn)
        })?;
        self.reject(StreamError::ObjectClosed);
        Ok(())
    }

    /// Resolve with a close message whose state is already committed
    pub fn discharge(&self, close: WireMessage) {
        self.resolve(close);
    }

    pub fn reject(&self, err: StreamError) {
        if !self.result.try_set_error(err) {
            warn!(txn = %self.txn, expected = self.expected, "waiter already resolved");
        }
    }

    fn resolve(&self, msg: WireMessage) {
        if !self.result.try_set_value(msg) {
            warn!(txn = %self.txn, expected = self.expected, "waiter already resolved");
        }
    }
}
