//! CORS Middleware Configuration

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::CorsSettings;

/// Create CORS layer from settings.
///
/// Only `Authorization` and `Content-Type` request headers are allowed. With
/// `debug` set, any origin is accepted and preflights are logged.
pub fn create_cors_layer(settings: &CorsSettings) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if settings.debug {
        tracing::debug!("CORS debug mode enabled, allowing any origin");
        return base.allow_origin(AllowOrigin::predicate(|origin, parts| {
            tracing::debug!(origin = ?origin, method = %parts.method, uri = %parts.uri, "CORS request");
            true
        }));
    }

    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins)
    }
}
