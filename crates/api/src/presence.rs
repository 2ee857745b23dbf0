//! Presence tracking
//!
//! Process-local online/offline + last-seen bookkeeping. Nothing here is persisted: a restart
//! forgets everyone until they reconnect, and no delivery decision ever reads this state.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Presence of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen_at: Option<OffsetDateTime>,
    pub ip_address: Option<String>,
    /// Live connections of this user (multi-device)
    pub connections: usize,
}

/// Serializable presence entry
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserPresence {
    pub user_id: Uuid,
    pub online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen_at: Option<OffsetDateTime>,
}

/// Thread-safe in-memory presence tracker
#[derive(Default)]
pub struct PresenceTracker {
    records: RwLock<HashMap<Uuid, PresenceRecord>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection; returns true if the user just came online
    pub fn connect(&self, user_id: Uuid, ip_address: Option<String>) -> bool {
        let Ok(mut records) = self.records.write() else {
            return false;
        };
        let record = records.entry(user_id).or_insert(PresenceRecord {
            online: false,
            last_seen_at: None,
            ip_address: None,
            connections: 0,
        });

        let came_online = !record.online;
        record.online = true;
        record.last_seen_at = None;
        record.connections += 1;
        if ip_address.is_some() {
            record.ip_address = ip_address;
        }
        came_online
    }

    /// Drop a connection; returns the last-seen timestamp if the user just went offline
    pub fn disconnect(&self, user_id: Uuid) -> Option<OffsetDateTime> {
        let mut records = self.records.write().ok()?;
        let record = records.get_mut(&user_id)?;

        record.connections = record.connections.saturating_sub(1);
        if record.connections > 0 || !record.online {
            return None;
        }

        let now = OffsetDateTime::now_utc();
        record.online = false;
        record.last_seen_at = Some(now);
        Some(now)
    }

    pub fn is_online(&self, user_id: &Uuid) -> bool {
        self.get(user_id).map(|r| r.online).unwrap_or(false)
    }

    pub fn last_seen_at(&self, user_id: &Uuid) -> Option<OffsetDateTime> {
        self.get(user_id).and_then(|r| r.last_seen_at)
    }

    pub fn get(&self, user_id: &Uuid) -> Option<PresenceRecord> {
        self.records.read().ok()?.get(user_id).cloned()
    }

    /// Presence entry for one user ("unknown" users are reported offline)
    pub fn presence_of(&self, user_id: Uuid) -> UserPresence {
        let record = self.get(&user_id);
        UserPresence {
            user_id,
            online: record.as_ref().map(|r| r.online).unwrap_or(false),
            last_seen_at: record.and_then(|r| r.last_seen_at),
        }
    }

    /// Forget users that have been offline for longer than `retention`; returns how many
    pub fn prune_offline(&self, retention: Duration) -> usize {
        let Some(cutoff) = time::Duration::try_from(retention)
            .ok()
            .and_then(|retention| OffsetDateTime::now_utc().checked_sub(retention))
        else {
            return 0;
        };
        let Ok(mut records) = self.records.write() else {
            return 0;
        };

        let before = records.len();
        records.retain(|_, r| r.online || r.last_seen_at.map_or(true, |seen| seen > cutoff));
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All known users, online ones first
    pub fn snapshot(&self) -> Vec<UserPresence> {
        let Ok(records) = self.records.read() else {
            return Vec::new();
        };
        let mut users: Vec<UserPresence> = records
            .iter()
            .map(|(user_id, r)| UserPresence {
                user_id: *user_id,
                online: r.online,
                last_seen_at: r.last_seen_at,
            })
            .collect();
        users.sort_by(|a, b| b.online.cmp(&a.online).then(b.last_seen_at.cmp(&a.last_seen_at)));
        users
    }
}
