//! HTTP Layer
//!
//! REST handlers and the router.

pub mod handlers;
pub mod routes;
