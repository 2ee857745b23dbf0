//! WebSocket support for realtime chat
//!
//! Provides the realtime side of customer support chat:
//! - Authenticated connections (query token or `authenticate` handshake frame)
//! - One joined thread room per connection
//! - Message delivery and thread summary fan-out
//! - User presence (online/offline, last seen)
//!
//! # Architecture
//!
//! - **Connection**: Represents an authenticated WebSocket connection
//! - **Room**: Thread-based pub/sub for broadcasting events
//! - **State**: Live connections and rooms
//! - **Hub**: Chat operations; the only writer of messages
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe event definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod hub;
pub mod room;
pub mod state;

pub use connection::{Connection, ConnectionState};
pub use events::{ClientEvent, ServerEvent};
pub use handler::ws_handler;
pub use hub::{ChatHub, HubSettings};
pub use state::WebSocketState;
