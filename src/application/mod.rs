//! Application Layer
//!
//! Auth and room services consumed by the HTTP handlers and the WebSocket
//! handshake, plus request/response DTOs.

pub mod dto;
pub mod services;
