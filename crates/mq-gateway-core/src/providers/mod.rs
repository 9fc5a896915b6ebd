//! Queue transport implementations.
//!
//! This module contains concrete implementations of the
//! [`QueueTransport`](crate::transport::QueueTransport) trait.

pub mod memory;

pub use memory::{InMemoryTransport, TransportOperation};
