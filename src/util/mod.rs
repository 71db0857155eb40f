//! Utility modules: retry and timeout.

pub mod retry;
pub mod timeout;
