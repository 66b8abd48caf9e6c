// ============================================================================
// Store Transactions
// ============================================================================
//
// Identity and lifecycle of the transactions handed out by a consolidated
// store. Stream waiters and per-transaction registrations are keyed by
// `TransactionId`.
//
// ============================================================================

pub mod state;

pub use state::{RoleLostHook, Transaction, TransactionId, TransactionState, WriteSet};
