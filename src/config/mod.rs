//! # Configuration Module
//!
//! Layered settings, later sources win:
//! - `config/default.toml`
//! - `config/{RUN_ENV}.toml` (optional)
//! - `APP__SECTION__KEY` environment variables, after `.env` is loaded
//! - `DATABASE_URL`, `REDIS_URL`, `JWT_SECRET`, `SERVER_HOST`, `PORT`, `CORS_DEBUG`
//!
//! ```rust,ignore
//! let settings = chat_relay::config::Settings::load()?;
//! ```

mod settings;

pub use settings::*;
