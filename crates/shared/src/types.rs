//! Chat domain types shared across SupportChat

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Preview shown in thread listings for messages that only carry an image
pub const IMAGE_PREVIEW_TEXT: &str = "[Image]";

// =============================================================================
// Identity
// =============================================================================

/// Role of an authenticated identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Verified identity behind a connection or request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Customers may only touch their own thread; admins may touch any thread
    pub fn can_access(&self, thread: &Thread) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Customer => thread.customer_id == self.user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

// =============================================================================
// Thread
// =============================================================================

/// Conversation channel between one customer and the admin pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub last_message_text: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    pub unread_for_admin: i32,
    pub unread_for_customer: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Thread {
    /// Fresh thread with empty preview and zero counters
    pub fn new(customer_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            last_message_text: None,
            last_message_at: None,
            unread_for_admin: 0,
            unread_for_customer: 0,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Timestamp used to rank threads: last message, else creation
    pub fn activity_at(&self) -> OffsetDateTime {
        self.last_message_at.unwrap_or(self.created_at)
    }

    pub fn unread_for(&self, side: Role) -> i32 {
        match side {
            Role::Admin => self.unread_for_admin,
            Role::Customer => self.unread_for_customer,
        }
    }

    /// Apply a summary update in place (preview + unread delta)
    pub fn apply_summary(&mut self, update: &SummaryUpdate) {
        self.last_message_text = Some(update.last_text.clone());
        self.last_message_at = Some(update.last_at);
        self.unread_for_admin += update.unread.for_admin;
        self.unread_for_customer += update.unread.for_customer;
    }
}

// =============================================================================
// Message
// =============================================================================

/// Which side of the conversation wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Customer,
    Admin,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Admin => "admin",
        }
    }
}

impl From<Role> for SenderType {
    fn from(role: Role) -> Self {
        match role {
            Role::Customer => SenderType::Customer,
            Role::Admin => SenderType::Admin,
        }
    }
}

impl FromStr for SenderType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(SenderType::Customer),
            "admin" => Ok(SenderType::Admin),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Immutable chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_type: SenderType,
    pub sender_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Text used for the thread preview
    pub fn preview(&self) -> String {
        match &self.text {
            Some(text) if !text.is_empty() => text.clone(),
            _ => IMAGE_PREVIEW_TEXT.to_string(),
        }
    }
}

/// Message about to be written; id and timestamp are assigned by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub thread_id: Uuid,
    pub sender_type: SenderType,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

impl NewMessage {
    pub fn text(thread_id: Uuid, sender: Identity, text: impl Into<String>) -> Self {
        Self {
            thread_id,
            sender_type: sender.role.into(),
            sender_id: sender.user_id,
            text: Some(text.into()),
            image_url: None,
        }
    }

    pub fn image(thread_id: Uuid, sender: Identity, image_url: impl Into<String>) -> Self {
        Self {
            thread_id,
            sender_type: sender.role.into(),
            sender_id: sender.user_id,
            text: None,
            image_url: Some(image_url.into()),
        }
    }

    /// Materialise with a server-assigned id and timestamp
    pub fn into_message(self, created_at: OffsetDateTime) -> Message {
        Message {
            id: Uuid::new_v4(),
            thread_id: self.thread_id,
            sender_type: self.sender_type,
            sender_id: self.sender_id,
            text: self.text,
            image_url: self.image_url,
            created_at,
        }
    }
}

// =============================================================================
// Summary bookkeeping
// =============================================================================

/// Increment applied to a thread's unread counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadDelta {
    pub for_admin: i32,
    pub for_customer: i32,
}

/// Denormalized preview + counter change written with each message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryUpdate {
    pub last_text: String,
    pub last_at: OffsetDateTime,
    pub unread: UnreadDelta,
}

// =============================================================================
// Listing
// =============================================================================

/// Thread listing filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadFilter {
    /// Restrict to one customer
    pub customer_id: Option<Uuid>,
    /// Keep only the most recently active thread per customer
    pub canonical_only: bool,
}

impl ThreadFilter {
    pub fn canonical() -> Self {
        Self {
            customer_id: None,
            canonical_only: true,
        }
    }

    pub fn for_customer(customer_id: Uuid) -> Self {
        Self {
            customer_id: Some(customer_id),
            canonical_only: false,
        }
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub const MAX_SIZE: u32 = 100;

    /// Page with number >= 1 and size clamped to [1, MAX_SIZE]
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.number as usize - 1) * self.size as usize
    }

    pub fn limit(&self) -> usize {
        self.size as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}
