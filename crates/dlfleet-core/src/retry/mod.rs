//! Retry and backoff policy for items.
//!
//! Classifies item failures (spawn errors, tool failures, ambiguous exits) and
//! decides exponential backoff so every slot shares one consistent policy.
//! Control signals (stall, time limit, abort) are never retried here.

mod classify;
mod policy;

pub use classify::{classify, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
