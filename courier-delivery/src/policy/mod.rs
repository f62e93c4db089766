//! Delivery policies kept separate from the worker loop so they can be tested
//! as plain functions.
//!
//! - [`RetryPolicy`]: turns an attempt outcome into a [`RetryDecision`]

pub mod retry;

pub use retry::{RetryDecision, RetryPolicy};
