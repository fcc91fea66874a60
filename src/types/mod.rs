//! Core types for Cadence.

pub mod message;
pub mod stream;

pub use message::*;
pub use stream::*;
