//! Utility modules: retry backoff, deadlines.

pub mod retry;
pub mod timeout;
