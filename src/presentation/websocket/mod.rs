//! Real-time Layer
//!
//! WebSocket connections, the process-local connection registry, and the
//! per-room sessions bridging the registry to the message broker.
//!
//! ```text
//! client <-> handler (read loop + writer) --publish--> RoomSessionManager --> Broker
//!                 ^                                                            |
//!                 +---- ConnectionRegistry::broadcast_local <-- callback <-----+
//! ```

pub mod connection;
pub mod handler;
pub mod messages;
pub mod registry;
pub mod room_session;

pub use connection::{ConnectionHandle, QueueError};
pub use handler::{
    authorize_connection, parse_room_ids, serve_connection, ws_handler, ConnectQuery,
    ConnectionContext, ConnectionLimits,
};
pub use messages::{codes, ClientFrame, ErrorFrame, HistoryFrame, ReadyFrame, ServerFrame};
pub use registry::ConnectionRegistry;
pub use room_session::{PublishOutcome, RoomSessionManager, SessionStatus};
