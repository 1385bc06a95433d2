//! Shared helpers for channel-aware sample buffer math and lock-free scalars.

pub mod atomic;
pub mod samples;
