//! API routes

pub mod chat;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// Multipart framing allowance on top of the attachment size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public API routes (no auth required) - under /api/v1
    // Attachment keys are content hashes; image URLs are embedded in messages as-is
    let public_api_routes =
        Router::new().route("/chat/attachments/:key", get(chat::get_attachment));

    let upload_limit = state.config.max_attachment_bytes + MULTIPART_OVERHEAD_BYTES;

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        .route("/chat/threads", get(chat::list_threads))
        .route("/chat/unread", get(chat::unread_count))
        .route("/chat/threads/:thread_id", delete(chat::delete_thread))
        .route("/chat/threads/:thread_id/messages", get(chat::list_messages))
        .route("/chat/threads/:thread_id/read", post(chat::mark_read))
        .route(
            "/chat/threads/:thread_id/attachments",
            post(chat::upload_attachment).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/chat/presence/:user_id", get(chat::get_presence))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // WebSocket routes (auth handled in handler via query parameter or first frame)
    let websocket_routes = Router::new().route("/ws/chat", get(ws_handler));

    // Combine API routes under /api/v1 prefix
    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes)
        .merge(websocket_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
