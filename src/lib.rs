//! Rategate - Shared-State Request Admission Control
//!
//! This crate decides, per client key, whether a request may proceed. Bucket
//! state lives in an external store (Redis) so that any number of stateless
//! service instances enforce one consistent limit per key. Two algorithms are
//! provided, a leaky bucket and a token bucket, and a manager switches
//! between them at runtime.
//!
//! Updates to a key are a read followed by a write with no lock held in
//! between, so concurrent requests for the same key may briefly over-admit.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
