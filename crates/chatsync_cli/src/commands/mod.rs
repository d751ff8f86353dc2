//! CLI command implementations.

pub mod serve;
pub mod token;
pub mod watermarks;
