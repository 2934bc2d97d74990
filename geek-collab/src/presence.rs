//! Presence records synthesized by the room loop.
//!
//! Clients never author presence. The room computes a [`PresenceSnapshot`]
//! from its membership at the moment of a register/unregister and fans it
//! out, so every member sees the same listing in the same order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One member as it appears in a `presence-update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    /// Display name
    pub user: String,
    /// Connection id assigned by the hub
    pub user_id: String,
    /// Authenticated account id, when the connection carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    /// Always `true` for live members; the editor UI keys its badge off it.
    #[serde(default)]
    pub is_online: bool,
}

impl MemberInfo {
    pub fn new(conn_id: Uuid, user: impl Into<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            user_id: conn_id.to_string(),
            account_id: None,
            joined_at,
            is_online: true,
        }
    }

    pub fn with_account(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self
    }
}

/// Membership listing plus count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub clients: Vec<MemberInfo>,
    pub client_count: usize,
}

impl PresenceSnapshot {
    /// Build a snapshot ordered by join time, ties broken by connection id.
    pub fn from_members<'a>(members: impl IntoIterator<Item = &'a MemberInfo>) -> Self {
        let mut clients: Vec<MemberInfo> = members.into_iter().cloned().collect();
        clients.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        let client_count = clients.len();
        Self { clients, client_count }
    }

    pub fn names(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.user.as_str()).collect()
    }

    pub fn contains(&self, conn_id: Uuid) -> bool {
        let id = conn_id.to_string();
        self.clients.iter().any(|c| c.user_id == id)
    }
}

pub fn joined_notice(user: &str) -> String {
    format!("{user} joined the room")
}

pub fn left_notice(user: &str) -> String {
    format!("{user} left the room")
}
