//! Presentation Layer
//!
//! REST routes for accounts and rooms, middleware, and the WebSocket
//! real-time layer.

pub mod http;
pub mod middleware;
pub mod websocket;
