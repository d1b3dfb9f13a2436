//! Shared Utilities
//!
//! Common utilities used across all layers.

pub mod error;
pub mod snowflake;
pub mod validation;

pub use error::{AppError, ChatError};
