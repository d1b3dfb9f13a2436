//! Application Startup
//!
//! Application building, server initialization, and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AuthService, AuthServiceImpl, RoomService, RoomServiceImpl};
use crate::config::Settings;
use crate::domain::ChatRepository;
use crate::infrastructure::broker::{self, Broker};
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    PgChatRepository, PgChatRoomRepository, PgUserRepository,
};
use crate::presentation::http::handlers::health;
use crate::presentation::http::routes;
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{ConnectionRegistry, RoomSessionManager};
use crate::shared::snowflake::SnowflakeGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub broker: Arc<dyn Broker>,
    pub sessions: Arc<RoomSessionManager>,
    pub auth: Arc<dyn AuthService>,
    pub rooms: Arc<dyn RoomService>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub settings: Arc<Settings>,
    /// Cancelled on shutdown; every connection runs on a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the real-time core around the given collaborators.
    pub fn new(
        settings: Settings,
        db: PgPool,
        broker: Arc<dyn Broker>,
        chats: Arc<dyn ChatRepository>,
        auth: Arc<dyn AuthService>,
        rooms: Arc<dyn RoomService>,
        snowflake: Arc<SnowflakeGenerator>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let sessions = Arc::new(RoomSessionManager::new(broker.clone(), chats, registry));

        Self {
            db,
            broker,
            sessions,
            auth,
            rooms,
            snowflake,
            settings: Arc::new(settings),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the state on PostgreSQL repositories.
    pub fn with_postgres(settings: Settings, db: PgPool, broker: Arc<dyn Broker>) -> Self {
        let snowflake = Arc::new(SnowflakeGenerator::new(
            settings.snowflake.machine_id as u64,
            settings.snowflake.node_id as u64,
        ));

        let users = Arc::new(PgUserRepository::new(db.clone()));
        let room_repo = Arc::new(PgChatRoomRepository::new(db.clone()));
        let chats = Arc::new(PgChatRepository::new(db.clone()));

        let auth = Arc::new(AuthServiceImpl::new(
            users,
            snowflake.clone(),
            settings.jwt.clone(),
        ));
        let rooms = Arc::new(RoomServiceImpl::new(
            room_repo,
            chats.clone(),
            snowflake.clone(),
        ));

        Self::new(settings, db, broker, chats, auth, rooms, snowflake)
    }
}

/// Build the router with its middleware stack.
pub fn build_router(state: AppState) -> Router {
    let cors = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(logging::create_trace_layer())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");

        if settings.database.run_migrations {
            database::run_migrations(&db).await?;
            tracing::info!("Database migrations applied");
        }

        // Broker access is mandatory; fail fast.
        let broker = broker::create_broker(&settings.broker, &settings.redis).await?;

        let addr = settings.server.socket_addr()?;
        let state = AppState::with_postgres(settings, db, broker);
        let router = build_router(state.clone());

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            state,
        })
    }

    /// Run the server until a shutdown signal arrives, then close every
    /// connection, room subscription, and the broker.
    pub async fn run_until_stopped(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = shutdown.cancelled() => {}
                }
                tracing::info!("Shutdown signal received");
                // Ends every open connection so the server can drain.
                shutdown.cancel();
            })
            .await?;

        self.state.sessions.shutdown().await;
        self.state.broker.close().await;
        self.state.db.close().await;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
