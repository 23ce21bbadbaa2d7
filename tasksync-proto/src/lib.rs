//! Shared protocol definitions for the `TaskSync` hub and write path.

pub mod codec;
pub mod comment;
pub mod hub;
pub mod task;
