//! Presence tracking
//!
//! The relay broadcasts the complete list of connected users on every change,
//! so the tracker never merges: each roster replaces the previous set.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One entry of a `roster-update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
}

impl PresenceRecord {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Default)]
struct PresenceSet {
    online: HashMap<UserId, PresenceRecord>,
    updated_at: Option<DateTime<Utc>>,
}

/// In-memory presence set shared between the relay subscription and readers
#[derive(Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<RwLock<PresenceSet>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole presence set with `roster`
    pub fn apply_roster(&self, roster: &[PresenceRecord]) {
        let online: HashMap<UserId, PresenceRecord> = roster
            .iter()
            .map(|record| (record.user_id.clone(), record.clone()))
            .collect();
        debug!("Roster update: {} user(s) online", online.len());

        let mut set = self.inner.write();
        set.online = online;
        set.updated_at = Some(Utc::now());
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.inner.read().online.contains_key(user_id)
    }

    /// Online users, sorted by id
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.inner.read().online.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.inner.read().online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().online.is_empty()
    }

    /// When the last roster arrived
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().updated_at
    }

    /// Forget everyone; presence is unknown without a relay connection
    pub fn clear(&self) {
        let mut set = self.inner.write();
        set.online.clear();
        set.updated_at = Some(Utc::now());
    }
}
