//! WebSocket Connection Handler
//!
//! Authenticates and authorizes a connection before the upgrade, then runs
//! two tasks per client: the inbound read loop (this task) and an outbound
//! writer, linked by a bounded queue and a shared cancellation token.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connection::ConnectionHandle;
use super::messages::{codes, ClientFrame, HistoryFrame, ReadyFrame, ServerFrame};
use super::room_session::RoomSessionManager;
use crate::application::services::{AuthService, RoomService};
use crate::config::WebSocketSettings;
use crate::domain::{Chat, HistoryQuery};
use crate::infrastructure::metrics;
use crate::shared::error::{AppError, ChatError};
use crate::shared::snowflake::SnowflakeGenerator;
use crate::startup::AppState;

/// How long the writer may keep flushing queued frames after the read loop
/// has ended.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Query string of the upgrade request: `?token=<jwt>&rooms=1,2`
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
    pub rooms: Option<String>,
}

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub outbound_buffer: usize,
    pub max_body_length: usize,
    pub history_limit: i64,
}

impl From<&WebSocketSettings> for ConnectionLimits {
    fn from(settings: &WebSocketSettings) -> Self {
        Self {
            outbound_buffer: settings.outbound_buffer.max(1),
            max_body_length: settings.max_body_length,
            history_limit: settings.history_limit,
        }
    }
}

/// Everything a connection needs once it is authorized.
pub struct ConnectionContext {
    pub user_id: i64,
    pub rooms: Vec<i64>,
    pub sessions: Arc<RoomSessionManager>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub limits: ConnectionLimits,
    /// Server shutdown token; each connection runs on a child of it
    pub shutdown: CancellationToken,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, AppError> {
    let rooms = parse_room_ids(query.rooms.as_deref().unwrap_or_default())?;
    let user_id = authorize_connection(
        state.auth.as_ref(),
        state.rooms.as_ref(),
        query.token.as_deref(),
        &rooms,
    )
    .await?;

    let ctx = ConnectionContext {
        user_id,
        rooms,
        sessions: state.sessions.clone(),
        snowflake: state.snowflake.clone(),
        limits: ConnectionLimits::from(&state.settings.websocket),
        shutdown: state.shutdown.clone(),
    };

    Ok(ws
        .max_message_size(state.settings.websocket.max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            serve_connection(sink, stream, ctx).await;
        }))
}

/// Parse a comma separated list of room ids. Duplicates are dropped, order
/// is kept.
pub fn parse_room_ids(raw: &str) -> Result<Vec<i64>, AppError> {
    let mut seen = HashSet::new();
    let mut rooms = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let room_id = part
            .parse::<i64>()
            .map_err(|_| AppError::BadRequest(format!("Invalid room id: {}", part)))?;
        if seen.insert(room_id) {
            rooms.push(room_id);
        }
    }
    if rooms.is_empty() {
        return Err(AppError::BadRequest("At least one room is required".into()));
    }
    Ok(rooms)
}

/// Verify the token and membership of every requested room.
///
/// Runs before the upgrade, so a rejected client never reaches the registry.
pub async fn authorize_connection(
    auth: &dyn AuthService,
    rooms: &dyn RoomService,
    token: Option<&str>,
    room_ids: &[i64],
) -> Result<i64, ChatError> {
    let token = token.ok_or(ChatError::Unauthenticated)?;
    let user_id = auth.validate_token(token).map_err(ChatError::from)?;

    for &room_id in room_ids {
        if let Err(e) = rooms.check_membership(user_id, room_id).await {
            debug!(user_id, room_id, error = %e, "Connection rejected");
            return Err(e.into());
        }
    }
    Ok(user_id)
}

/// Why a connection ended.
#[derive(Debug)]
enum Termination {
    ClientClosed,
    Cancelled,
    ReadError(String),
    ProtocolViolation(String),
    JoinFailed(ChatError),
}

/// Rooms this connection has joined. Leaves them all when released, or in
/// the background if dropped without release.
struct RoomMemberships {
    sessions: Arc<RoomSessionManager>,
    connection_id: Uuid,
    rooms: Vec<i64>,
}

impl RoomMemberships {
    fn new(sessions: Arc<RoomSessionManager>, connection_id: Uuid) -> Self {
        Self {
            sessions,
            connection_id,
            rooms: Vec::new(),
        }
    }

    fn contains(&self, room_id: i64) -> bool {
        self.rooms.contains(&room_id)
    }

    async fn release(mut self) {
        for room_id in std::mem::take(&mut self.rooms) {
            self.sessions.leave(room_id, self.connection_id).await;
        }
    }
}

impl Drop for RoomMemberships {
    fn drop(&mut self) {
        if self.rooms.is_empty() {
            return;
        }
        let rooms = std::mem::take(&mut self.rooms);
        let sessions = self.sessions.clone();
        let connection_id = self.connection_id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                for room_id in rooms {
                    sessions.leave(room_id, connection_id).await;
                }
            });
        }
    }
}

/// Drive one authorized connection until it terminates.
///
/// Generic over the socket halves so it can run on anything that carries
/// websocket messages.
pub async fn serve_connection<W, R>(sink: W, mut stream: R, ctx: ConnectionContext)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    let cancel = ctx.shutdown.child_token();
    let (outbound, rx) = mpsc::channel(ctx.limits.outbound_buffer);
    let connection = ConnectionHandle::new(ctx.user_id, outbound.clone(), cancel.clone());
    let connection_id = connection.id();
    let user_id = ctx.user_id;

    metrics::WEBSOCKET_CONNECTIONS_ACTIVE.inc();
    info!(user_id, connection_id = %connection_id, rooms = ?ctx.rooms, "Client connected");

    let mut writer = tokio::spawn(write_loop(sink, rx, cancel.clone(), connection_id));

    let ready = ServerFrame::Ready(ReadyFrame {
        user_id,
        rooms: ctx.rooms.clone(),
    });
    let mut memberships = RoomMemberships::new(ctx.sessions.clone(), connection_id);

    let termination = if !send_frame(&outbound, ready, &cancel).await {
        Termination::Cancelled
    } else {
        match join_rooms(&ctx, &connection, &mut memberships).await {
            Ok(()) => {
                send_history(&ctx, &outbound, &cancel).await;
                read_loop(&ctx, &mut stream, &outbound, &cancel, &memberships).await
            }
            Err(e) => {
                let _ = connection.try_deliver(ServerFrame::from(&e));
                Termination::JoinFailed(e)
            }
        }
    };

    memberships.release().await;
    drop(connection);
    drop(outbound);

    // Senders are gone; the writer exits once the queue is flushed.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        // A stalled socket never drains.
        writer.abort();
        let _ = writer.await;
    }
    cancel.cancel();
    metrics::WEBSOCKET_CONNECTIONS_ACTIVE.dec();

    match termination {
        Termination::ClientClosed => {
            debug!(user_id, connection_id = %connection_id, reason = %ChatError::ConnectionClosed, "Client disconnected");
        }
        Termination::Cancelled => {
            info!(user_id, connection_id = %connection_id, "Connection cancelled");
        }
        Termination::ReadError(e) => {
            debug!(user_id, connection_id = %connection_id, error = %e, "WebSocket read error");
        }
        Termination::ProtocolViolation(reason) => {
            warn!(user_id, connection_id = %connection_id, reason = %reason, "Protocol violation, connection closed");
        }
        Termination::JoinFailed(e) => {
            warn!(user_id, connection_id = %connection_id, error = %e, "Failed to join rooms");
        }
    }
}

async fn join_rooms(
    ctx: &ConnectionContext,
    connection: &ConnectionHandle,
    memberships: &mut RoomMemberships,
) -> Result<(), ChatError> {
    for &room_id in &ctx.rooms {
        ctx.sessions.join(room_id, connection).await?;
        memberships.rooms.push(room_id);
    }
    Ok(())
}

async fn send_history(
    ctx: &ConnectionContext,
    outbound: &mpsc::Sender<ServerFrame>,
    cancel: &CancellationToken,
) {
    if ctx.limits.history_limit <= 0 {
        return;
    }
    for &room_id in &ctx.rooms {
        match ctx
            .sessions
            .load_history(room_id, HistoryQuery::latest(ctx.limits.history_limit))
            .await
        {
            Ok(messages) => {
                let frame = ServerFrame::History(HistoryFrame { room_id, messages });
                if !send_frame(outbound, frame, cancel).await {
                    return;
                }
            }
            Err(e) => {
                warn!(room_id, error = %e, "Failed to load history");
                if !send_frame(outbound, ServerFrame::from(&e), cancel).await {
                    return;
                }
            }
        }
    }
}

async fn read_loop<R>(
    ctx: &ConnectionContext,
    stream: &mut R,
    outbound: &mpsc::Sender<ServerFrame>,
    cancel: &CancellationToken,
    memberships: &RoomMemberships,
) -> Termination
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Termination::Cancelled,
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => handle_chat(ctx, memberships, frame).await,
                    Err(e) => {
                        let reason = format!("Malformed frame: {}", e);
                        send_frame(outbound, ServerFrame::error(codes::PROTOCOL_VIOLATION, &reason), cancel).await;
                        return Termination::ProtocolViolation(reason);
                    }
                };
                if let Some(reply) = reply {
                    if !send_frame(outbound, reply, cancel).await {
                        return Termination::Cancelled;
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                let reason = "Binary frames are not supported".to_string();
                send_frame(outbound, ServerFrame::error(codes::PROTOCOL_VIOLATION, &reason), cancel).await;
                return Termination::ProtocolViolation(reason);
            }
            Some(Ok(Message::Close(_))) | None => return Termination::ClientClosed,
            Some(Ok(_)) => {} // ping/pong handled by axum
            Some(Err(e)) => return Termination::ReadError(e.to_string()),
        }
    }
}

/// Validate and publish one chat. Returns the frame to send back to the
/// sender, if any. Successful chats come back through the broker.
async fn handle_chat(
    ctx: &ConnectionContext,
    memberships: &RoomMemberships,
    frame: ClientFrame,
) -> Option<ServerFrame> {
    if !memberships.contains(frame.room_id) {
        return Some(ServerFrame::error(
            codes::ROOM_NOT_JOINED,
            format!("Room {} is not joined on this connection", frame.room_id),
        ));
    }

    let body = frame.body.trim();
    if body.is_empty() {
        return Some(ServerFrame::error(codes::INVALID_MESSAGE, "Message body is empty"));
    }
    if body.chars().count() > ctx.limits.max_body_length {
        return Some(ServerFrame::error(
            codes::INVALID_MESSAGE,
            format!("Message body exceeds {} characters", ctx.limits.max_body_length),
        ));
    }

    let chat = Chat::new(ctx.snowflake.generate(), frame.room_id, ctx.user_id, body);
    match ctx.sessions.publish(&chat).await {
        Ok(outcome) if outcome.persisted => None,
        Ok(_) => Some(ServerFrame::from(&ChatError::Persistence(format!(
            "Chat {} was delivered but not saved",
            chat.id
        )))),
        Err(e) => Some(ServerFrame::from(&e)),
    }
}

/// Queue a frame for this connection's writer. Returns `false` once the
/// connection is cancelled or the writer is gone.
async fn send_frame(
    outbound: &mpsc::Sender<ServerFrame>,
    frame: ServerFrame,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = outbound.send(frame) => sent.is_ok(),
    }
}

async fn write_loop<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<ServerFrame>,
    cancel: CancellationToken,
    connection_id: Uuid,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display + Send,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "Failed to serialize frame");
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sink.send(Message::Text(text.into())) => sent,
        };
        if let Err(e) = sent {
            debug!(connection_id = %connection_id, error = %e, "WebSocket write failed");
            cancel.cancel();
            break;
        }
    }
    let _ = sink.close().await;
}
