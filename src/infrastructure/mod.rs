//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Database repositories (PostgreSQL)
//! - The message broker (Redis pub/sub or in-process)
//! - Prometheus metrics

pub mod broker;
pub mod database;
pub mod metrics;
pub mod repositories;
