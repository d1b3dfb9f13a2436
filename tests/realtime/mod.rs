//! Real-time delivery tests
//!
//! Connections are driven through `serve_connection` over in-memory
//! channels, so no socket or external service is needed.

mod delivery_tests;
