//! Process-wide map from room id to live room loop.
//!
//! The lock guards the map only. It is held for a lookup, insert or remove
//! and never across a room operation, so a busy room cannot stall joins to
//! other rooms.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::room::{self, RoomHandle};

/// Default bound on queued commands per room.
pub const DEFAULT_ROOM_QUEUE: usize = 1024;

struct RegistryInner {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    next_generation: AtomicU64,
    queue_capacity: usize,
}

/// Room manager: creates a room on first join, forgets it once empty.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

/// Lets a room loop remove itself without keeping the registry alive.
pub(crate) struct RetireHandle {
    inner: Weak<RegistryInner>,
}

impl RoomRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                queue_capacity,
            }),
        }
    }

    /// Existing live room for `room_id`, or a freshly started one.
    pub async fn resolve(&self, room_id: &str) -> RoomHandle {
        let mut rooms = self.inner.rooms.lock().await;
        if let Some(room) = rooms.get(room_id) {
            if !room.is_closed() {
                return room.clone();
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let retire = RetireHandle {
            inner: Arc::downgrade(&self.inner),
        };
        let room = room::spawn(room_id, generation, self.inner.queue_capacity, retire);
        rooms.insert(room_id.to_owned(), room.clone());
        log::info!("Created room {room_id} (gen {generation}), active rooms: {}", rooms.len());
        room
    }

    /// Remove `room_id` only if `generation` is still the registered one.
    pub async fn retire(&self, room_id: &str, generation: u64) -> bool {
        retire_in(&self.inner, room_id, generation).await
    }

    /// Live room for `room_id` without creating one.
    pub async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.inner.rooms.lock().await.get(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.lock().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.inner.rooms.lock().await.keys().cloned().collect()
    }

    /// Close every room. Member pumps see their mailboxes close and exit.
    pub async fn shutdown(&self) {
        let rooms: Vec<RoomHandle> = {
            let mut map = self.inner.rooms.lock().await;
            map.drain().map(|(_, room)| room).collect()
        };
        log::info!("Shutting down {} rooms", rooms.len());
        for room in rooms {
            room.shutdown().await;
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_QUEUE)
    }
}

impl RetireHandle {
    pub(crate) async fn retire(&self, room_id: &str, generation: u64) -> bool {
        match self.inner.upgrade() {
            Some(inner) => retire_in(&inner, room_id, generation).await,
            None => false,
        }
    }
}

async fn retire_in(inner: &RegistryInner, room_id: &str, generation: u64) -> bool {
    let mut rooms = inner.rooms.lock().await;
    match rooms.get(room_id) {
        Some(room) if room.generation() == generation => {
            rooms.remove(room_id);
            log::info!("Room {room_id} removed (empty), active rooms: {}", rooms.len());
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::mailbox::{Mailbox, MailboxReceiver};
    use crate::presence::MemberInfo;
    use crate::room::Registration;

    fn member(name: &str) -> (Uuid, Registration, MailboxReceiver) {
        let conn_id = Uuid::new_v4();
        let (mailbox, rx) = Mailbox::channel(16);
        let reg = Registration {
            conn_id,
            info: MemberInfo::new(conn_id, name, Utc::now()),
            mailbox,
            announce: false,
        };
        (conn_id, reg, rx)
    }

    async fn wait_for_count(registry: &RoomRegistry, expected: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while registry.room_count().await != expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_returns_same_room() {
        let registry = RoomRegistry::default();
        let a = registry.resolve("doc").await;
        let b = registry.resolve("doc").await;

        assert_eq!(a.generation(), b.generation());
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated_by_id() {
        let registry = RoomRegistry::default();
        let a = registry.resolve("doc-a").await;
        let b = registry.resolve("doc-b").await;

        assert_ne!(a.generation(), b.generation());
        let mut ids = registry.active_rooms().await;
        ids.sort();
        assert_eq!(ids, vec!["doc-a", "doc-b"]);
    }

    #[tokio::test]
    async fn test_retire_ignores_stale_generation() {
        let registry = RoomRegistry::default();
        let room = registry.resolve("doc").await;

        assert!(!registry.retire("doc", room.generation() + 100).await);
        assert_eq!(registry.room_count().await, 1);

        assert!(registry.retire("doc", room.generation()).await);
        assert_eq!(registry.room_count().await, 0);
        assert!(!registry.retire("doc", room.generation()).await);
    }

    #[tokio::test]
    async fn test_empty_room_is_recreated_fresh() {
        let registry = RoomRegistry::default();
        let first = registry.resolve("doc").await;

        let (alice_id, alice, _rx) = member("alice");
        first.register(alice).await.unwrap();
        assert!(first.unregister(alice_id, false).await);
        wait_for_count(&registry, 0).await;

        let second = registry.resolve("doc").await;
        assert!(second.generation() > first.generation());
        assert_eq!(second.presence().await.unwrap().client_count, 0);
    }

    #[tokio::test]
    async fn test_shutdown_retires_everything() {
        let registry = RoomRegistry::default();
        let mut receivers = Vec::new();
        for id in ["a", "b", "c"] {
            let room = registry.resolve(id).await;
            let (_, reg, rx) = member("someone");
            room.register(reg).await.unwrap();
            receivers.push(rx);
        }
        assert_eq!(registry.room_count().await, 3);

        registry.shutdown().await;
        assert_eq!(registry.room_count().await, 0);

        // every member mailbox was closed by its room
        for mut rx in receivers {
            let drained = tokio::time::timeout(std::time::Duration::from_secs(1), async {
                while rx.next().await.is_some() {}
            })
            .await;
            assert!(drained.is_ok());
        }
    }
}
