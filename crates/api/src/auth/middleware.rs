//! Bearer-token authentication middleware

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use supportchat_shared::{Identity, Role};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Authenticated caller, inserted as a request extension by [`require_auth`]
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            role: self.role,
        }
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.user_id, "Non-admin attempted admin chat access");
            Err(ApiError::Forbidden)
        }
    }
}

impl From<Identity> for AuthUser {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id,
            role: identity.role,
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid bearer token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let identity = state
        .verifier
        .verify(token)
        .map_err(|_| ApiError::InvalidToken)?;

    request.extensions_mut().insert(AuthUser::from(identity));
    Ok(next.run(request).await)
}
