//! Authentication for SupportChat
//!
//! Token issuance is external; the chat core only verifies credentials and derives
//! an [`Identity`] (user id + role) from them.

pub mod jwt;
pub mod middleware;

use supportchat_shared::{ChatError, Identity};

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{bearer_token, require_auth, AuthUser};

/// Credential verification boundary
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, ChatError>;
}
