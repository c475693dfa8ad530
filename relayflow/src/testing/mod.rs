//! Testing utilities for relayflow destinations.
//!
//! This module provides:
//! - In-memory clients for every transport seam
//! - Assertions over delivery outcomes

mod assertions;
mod mocks;

pub use assertions::{
    assert_outcome_retryable, assert_outcome_status, assert_outcome_succeeded,
    assert_outcome_terminal,
};
pub use mocks::{MemoryBucket, MemoryCollection, MemorySql, MemoryTopic, RecordingTransport};
