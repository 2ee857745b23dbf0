//! SupportChat API Library
//!
//! This crate contains the server components for realtime customer support chat.

pub mod attachments;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod presence;
pub mod registry;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
