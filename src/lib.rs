//! # Chat Relay Library
//!
//! A real-time chat backend that can run as several instances behind a load
//! balancer:
//! - WebSocket connections joined to one or more chat rooms
//! - One broker topic per room, so every instance serving a room sees the
//!   same messages in the same order
//! - PostgreSQL for users, rooms, and chat history
//! - Redis pub/sub (or an in-process broker) for fan-out
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Core entities and repository traits
//! - **Application Layer**: Auth and room services, DTOs
//! - **Infrastructure Layer**: Database, broker, and metrics implementations
//! - **Presentation Layer**: HTTP handlers and the real-time layer
//!
//! ## Module Structure
//!
//! ```text
//! chat_relay/
//! +-- config/         Configuration management
//! +-- domain/         Domain entities and repository traits
//! +-- application/    Application services and DTOs
//! +-- infrastructure/ Database, broker, and metrics
//! +-- presentation/   HTTP routes, middleware, and WebSocket handling
//! +-- shared/         Common utilities (errors, snowflake IDs)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
