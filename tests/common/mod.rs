//! Common Test Utilities
//!
//! In-memory collaborators, an application builder, and a scripted
//! WebSocket client driving the real connection handler.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ws::Message,
    http::{Request, StatusCode},
    Router,
};
use futures::channel::mpsc::{channel, unbounded, Receiver, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use chat_relay::application::services::{AuthServiceImpl, RoomServiceImpl};
use chat_relay::config::Settings;
use chat_relay::domain::{
    Chat, ChatRepository, ChatRoom, ChatRoomRepository, HistoryQuery, User, UserRepository,
};
use chat_relay::infrastructure::broker::MemoryBroker;
use chat_relay::presentation::websocket::{
    authorize_connection, serve_connection, ConnectionContext, ConnectionLimits, ServerFrame,
};
use chat_relay::shared::error::{AppError, ChatError};
use chat_relay::shared::snowflake::SnowflakeGenerator;
use chat_relay::startup::{build_router, AppState};

/// How long a test waits for an expected frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a test waits to conclude that no frame is coming.
pub const SILENCE: Duration = Duration::from_millis(150);

/// Frames the client socket buffers before the server's writes stall.
pub const SOCKET_BUFFER: usize = 64;

// ============================================================================
// In-memory repositories
// ============================================================================

#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<Vec<User>>,
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().iter().find(|u| u.email == email).cloned())
    }

    async fn create(&self, user: &User) -> Result<User, AppError> {
        self.users.lock().push(user.clone());
        Ok(user.clone())
    }

    async fn exists(&self, email: &str, username: &str) -> Result<bool, AppError> {
        Ok(self
            .users
            .lock()
            .iter()
            .any(|u| u.email == email || u.username == username))
    }
}

#[derive(Default)]
pub struct InMemoryRooms {
    rooms: Mutex<HashMap<i64, ChatRoom>>,
}

#[async_trait]
impl ChatRoomRepository for InMemoryRooms {
    async fn find_by_id(&self, id: i64) -> Result<Option<ChatRoom>, AppError> {
        Ok(self.rooms.lock().get(&id).cloned())
    }

    async fn find_by_member(&self, user_id: i64) -> Result<Vec<ChatRoom>, AppError> {
        let mut rooms: Vec<_> = self
            .rooms
            .lock()
            .values()
            .filter(|r| r.is_member(user_id))
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn create(&self, room: &ChatRoom) -> Result<ChatRoom, AppError> {
        self.rooms.lock().insert(room.id, room.clone());
        Ok(room.clone())
    }

    async fn add_member(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .get_mut(&room_id)
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", room_id)))?;
        if room.is_member(user_id) {
            return Ok(false);
        }
        room.member_ids.push(user_id);
        Ok(true)
    }

    async fn membership(&self, room_id: i64, user_id: i64) -> Result<Option<bool>, AppError> {
        Ok(self.rooms.lock().get(&room_id).map(|r| r.is_member(user_id)))
    }
}

/// Chat store whose writes can be switched to fail.
#[derive(Default)]
pub struct InMemoryChats {
    chats: Mutex<Vec<Chat>>,
    failing: AtomicBool,
}

impl InMemoryChats {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stored(&self, room_id: i64) -> Vec<Chat> {
        self.chats
            .lock()
            .iter()
            .filter(|c| c.room_id == room_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChats {
    async fn append(&self, chat: &Chat) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Internal("chat store unavailable".into()));
        }
        self.chats.lock().push(chat.clone());
        Ok(())
    }

    async fn load_history(&self, room_id: i64, query: HistoryQuery) -> Result<Vec<Chat>, AppError> {
        let mut chats: Vec<Chat> = self
            .chats
            .lock()
            .iter()
            .filter(|c| c.room_id == room_id && query.before.map_or(true, |b| c.id < b))
            .cloned()
            .collect();
        chats.sort_by_key(|c| c.id);
        let skip = chats.len().saturating_sub(query.effective_limit() as usize);
        Ok(chats.split_off(skip))
    }
}

// ============================================================================
// Application builders
// ============================================================================

/// Storage and broker shared by every instance of a simulated deployment.
#[derive(Clone)]
pub struct SharedBackend {
    pub users: Arc<InMemoryUsers>,
    pub rooms: Arc<InMemoryRooms>,
    pub chats: Arc<InMemoryChats>,
    pub broker: Arc<MemoryBroker>,
}

impl SharedBackend {
    pub fn new() -> Self {
        Self {
            users: Arc::new(InMemoryUsers::default()),
            rooms: Arc::new(InMemoryRooms::default()),
            chats: Arc::new(InMemoryChats::default()),
            broker: Arc::new(MemoryBroker::new(256)),
        }
    }

    /// Build one server instance on the shared backend.
    pub fn instance(&self, machine_id: u64) -> TestApp {
        self.instance_with(machine_id, |_| {})
    }

    /// Build one server instance with adjusted settings.
    pub fn instance_with(&self, machine_id: u64, configure: impl FnOnce(&mut Settings)) -> TestApp {
        let mut settings = Settings::for_tests();
        settings.websocket.history_limit = 20;
        configure(&mut settings);

        let db = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy(&settings.database.url)
            .expect("lazy pool");

        let snowflake = Arc::new(SnowflakeGenerator::new(machine_id, 0));
        let auth = Arc::new(AuthServiceImpl::new(
            self.users.clone(),
            snowflake.clone(),
            settings.jwt.clone(),
        ));
        let rooms = Arc::new(RoomServiceImpl::new(
            self.rooms.clone(),
            self.chats.clone(),
            snowflake.clone(),
        ));

        let state = AppState::new(
            settings,
            db,
            self.broker.clone(),
            self.chats.clone(),
            auth,
            rooms,
            snowflake,
        );

        TestApp {
            router: build_router(state.clone()),
            state,
            backend: self.clone(),
        }
    }
}

/// Test application
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backend: SharedBackend,
}

impl TestApp {
    /// A single instance on a fresh backend
    pub fn new() -> Self {
        SharedBackend::new().instance(1)
    }

    /// A single instance with adjusted settings
    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        SharedBackend::new().instance_with(1, configure)
    }

    /// Register a user, returning its id and access token.
    pub async fn signup(&self, username: &str) -> (i64, String) {
        let (user, token) = self
            .state
            .auth
            .signup(username, &format!("{}@example.com", username), "password123")
            .await
            .expect("signup");
        (user.id, token.access_token)
    }

    /// Create a room owned by `owner_id` with the given extra members.
    pub async fn create_room(&self, owner_id: i64, members: &[i64]) -> i64 {
        let room = self
            .state
            .rooms
            .create_room(owner_id, "general")
            .await
            .expect("create room");
        for &user_id in members {
            self.state
                .rooms
                .add_member(room.id, owner_id, user_id)
                .await
                .expect("add member");
        }
        room.id
    }

    /// Authorize and open a connection, waiting until every room is joined.
    pub async fn connect(&self, token: &str, rooms: &[i64]) -> Result<TestClient, ChatError> {
        let client = self.open(token, rooms, SOCKET_BUFFER).await?;
        Self::await_joined(client, rooms).await
    }

    /// Like `connect`, but the client socket holds a single frame, so the
    /// server's writes stall as soon as the test stops reading.
    pub async fn connect_stalling(&self, token: &str, rooms: &[i64]) -> Result<TestClient, ChatError> {
        let client = self.open(token, rooms, 0).await?;
        Self::await_joined(client, rooms).await
    }

    /// Authorize and open a connection without consuming any frame.
    pub async fn connect_raw(&self, token: &str, rooms: &[i64]) -> Result<TestClient, ChatError> {
        self.open(token, rooms, SOCKET_BUFFER).await
    }

    async fn await_joined(mut client: TestClient, rooms: &[i64]) -> Result<TestClient, ChatError> {
        match client.next_frame().await {
            ServerFrame::Ready(_) => {}
            other => panic!("expected ready frame, got {:?}", other),
        }
        for _ in rooms {
            match client.next_frame().await {
                ServerFrame::History(_) => {}
                other => panic!("expected history frame, got {:?}", other),
            }
        }
        Ok(client)
    }

    async fn open(
        &self,
        token: &str,
        rooms: &[i64],
        socket_buffer: usize,
    ) -> Result<TestClient, ChatError> {
        let user_id = authorize_connection(
            self.state.auth.as_ref(),
            self.state.rooms.as_ref(),
            Some(token),
            rooms,
        )
        .await?;

        let (inbound, stream) = unbounded::<Result<Message, axum::Error>>();
        let (sink, outbound) = channel::<Message>(socket_buffer);
        let ctx = ConnectionContext {
            user_id,
            rooms: rooms.to_vec(),
            sessions: self.state.sessions.clone(),
            snowflake: self.state.snowflake.clone(),
            limits: ConnectionLimits::from(&self.state.settings.websocket),
            shutdown: self.state.shutdown.clone(),
        };
        let task = tokio::spawn(serve_connection(sink, stream, ctx));

        Ok(TestClient {
            user_id,
            inbound: Some(inbound),
            outbound,
            task,
        })
    }

    /// Send a request through the full middleware stack
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.request(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn get_auth(&self, uri: &str, token: &str) -> (StatusCode, serde_json::Value) {
        self.request(
            Request::get(uri)
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.request(
            Request::post(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_json_auth(
        &self,
        uri: &str,
        body: serde_json::Value,
        token: &str,
    ) -> (StatusCode, serde_json::Value) {
        self.request(
            Request::post(uri)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

// ============================================================================
// Scripted WebSocket client
// ============================================================================

/// Client side of a connection served by `serve_connection`.
pub struct TestClient {
    pub user_id: i64,
    inbound: Option<UnboundedSender<Result<Message, axum::Error>>>,
    outbound: Receiver<Message>,
    task: JoinHandle<()>,
}

impl TestClient {
    pub fn send_text(&self, text: &str) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.unbounded_send(Ok(Message::Text(text.to_string().into())));
        }
    }

    pub fn send_chat(&self, room_id: i64, body: &str) {
        self.send_text(&serde_json::json!({ "roomId": room_id.to_string(), "body": body }).to_string());
    }

    /// Drop the receiving half of the socket; the server's next write fails.
    pub fn drop_outbound(&mut self) {
        let (_, closed) = channel::<Message>(0);
        self.outbound = closed;
    }

    /// Next server frame; panics on timeout or a closed connection.
    pub async fn next_frame(&mut self) -> ServerFrame {
        self.try_next_frame(FRAME_TIMEOUT)
            .await
            .expect("expected a frame")
    }

    /// Next server frame within `wait`, `None` on timeout or close.
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<ServerFrame> {
        loop {
            match tokio::time::timeout(wait, self.outbound.next()).await {
                Ok(Some(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).expect("valid frame"));
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Next chat body, skipping nothing: any other frame fails the test.
    pub async fn next_chat(&mut self) -> Chat {
        match self.next_frame().await {
            ServerFrame::Message(chat) => chat,
            other => panic!("expected message frame, got {:?}", other),
        }
    }

    /// Assert that no frame arrives for a short while.
    pub async fn assert_silent(&mut self) {
        if let Some(frame) = self.try_next_frame(SILENCE).await {
            panic!("expected no frame, got {:?}", frame);
        }
    }

    /// Close the client side and wait for the handler to finish.
    pub async fn close(mut self) {
        self.inbound.take();
        tokio::time::timeout(FRAME_TIMEOUT, &mut self.task)
            .await
            .expect("handler did not stop")
            .expect("handler panicked");
    }

    /// Wait for the handler to finish on its own.
    pub async fn wait_closed(mut self) {
        tokio::time::timeout(FRAME_TIMEOUT, &mut self.task)
            .await
            .expect("handler did not stop")
            .expect("handler panicked");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Poll until `condition` holds or the frame timeout elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
