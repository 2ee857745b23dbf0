//! Shared application state

use std::sync::Arc;

use crate::attachments::{AttachmentHandler, AttachmentStore};
use crate::auth::{JwtManager, TokenVerifier};
use crate::config::Config;
use crate::store::ChatStore;
use crate::websocket::{ChatHub, HubSettings};

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<ChatHub>,
    pub attachments: Arc<AttachmentHandler>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Wire the chat core over the given stores, verifying tokens with the configured secret
    pub fn new(
        config: Config,
        store: Arc<dyn ChatStore>,
        assets: Arc<dyn AttachmentStore>,
    ) -> Self {
        let verifier = Arc::new(JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours));
        Self::with_verifier(config, store, assets, verifier)
    }

    pub fn with_verifier(
        config: Config,
        store: Arc<dyn ChatStore>,
        assets: Arc<dyn AttachmentStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let hub = ChatHub::new(
            store,
            HubSettings {
                max_message_chars: config.max_message_chars,
            },
        );
        let attachments = AttachmentHandler::new(
            assets,
            config.public_url.clone(),
            config.max_attachment_bytes,
            config.upload_timeout,
        );

        Self {
            config: Arc::new(config),
            hub: Arc::new(hub),
            attachments: Arc::new(attachments),
            verifier,
        }
    }
}
