//! Per-room control loop.
//!
//! Architecture:
//! ```text
//! read pump A ──┐                         ┌──► mailbox A ──► write pump A
//! read pump B ──┼──► RoomCommand queue ──►│    Room loop (owns membership)
//! read pump C ──┘        (bounded)        ├──► mailbox B ──► write pump B
//!                                          └──► mailbox C ──► write pump C
//! ```
//!
//! The loop is the only place membership is read or mutated. Register,
//! unregister and broadcast are handled one at a time, so every member sees
//! membership changes and relayed edits in the same total order.
//!
//! Fan-out never waits on a client: a mailbox that is full (or already
//! closed) gets its owner evicted on the spot and the remaining members are
//! sent a fresh presence update.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::mailbox::Mailbox;
use crate::presence::{joined_notice, left_notice, MemberInfo, PresenceSnapshot};
use crate::protocol::{Envelope, Frame};
use crate::registry::RetireHandle;

/// Errors surfaced to callers of a [`RoomHandle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The room emptied and is retiring. Resolve the registry again.
    #[error("room {0} is closed")]
    Closed(String),
}

/// Lifecycle of a room loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Running,
    /// Membership reached zero; registers are refused.
    Draining,
    /// Removed from the registry; the loop has exited.
    Retired,
}

/// Relay counters for one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub broadcasts: u64,
    pub frames_delivered: u64,
    pub evictions: u64,
    pub peak_members: usize,
    pub members: usize,
}

/// A request to enter the room's membership.
#[derive(Debug)]
pub struct Registration {
    pub conn_id: Uuid,
    pub info: MemberInfo,
    pub mailbox: Mailbox,
    /// Tell the other members with a `system` notice.
    pub announce: bool,
}

#[derive(Debug)]
enum RoomCommand {
    Register {
        registration: Registration,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Unregister {
        conn_id: Uuid,
        farewell: bool,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        sender: Uuid,
        frame: Frame,
    },
    PresenceQuery {
        conn_id: Uuid,
    },
    Snapshot {
        reply: oneshot::Sender<PresenceSnapshot>,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
    State {
        reply: oneshot::Sender<RoomState>,
    },
    Shutdown,
}

/// Cheap, clonable address of a running room loop.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: Arc<str>,
    generation: u64,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Distinguishes successive rooms created under the same id.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` once the loop stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn closed(&self) -> RoomError {
        RoomError::Closed(self.id.to_string())
    }

    async fn submit(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.tx.send(command).await.map_err(|_| self.closed())
    }

    /// Insert (or refresh) a member and broadcast presence.
    pub async fn register(&self, registration: Registration) -> Result<(), RoomError> {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Register { registration, reply }).await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Remove a member. Returns `false` if it was not a member, which
    /// includes the room having already retired.
    pub async fn unregister(&self, conn_id: Uuid, farewell: bool) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = RoomCommand::Unregister {
            conn_id,
            farewell,
            reply,
        };
        if self.submit(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Relay `frame` to every member except `sender`.
    pub async fn broadcast(&self, sender: Uuid, frame: Frame) -> Result<(), RoomError> {
        self.submit(RoomCommand::Broadcast { sender, frame }).await
    }

    /// Ask the loop to send the current listing to `conn_id` only.
    pub async fn request_presence(&self, conn_id: Uuid) -> Result<(), RoomError> {
        self.submit(RoomCommand::PresenceQuery { conn_id }).await
    }

    /// Current membership as seen by the loop.
    pub async fn presence(&self) -> Result<PresenceSnapshot, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn stats(&self) -> Result<RoomStats, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Stats { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Lifecycle as seen by the loop; `Retired` once it no longer answers.
    pub async fn state(&self) -> RoomState {
        let (reply, rx) = oneshot::channel();
        if self.submit(RoomCommand::State { reply }).await.is_err() {
            return RoomState::Retired;
        }
        rx.await.unwrap_or(RoomState::Retired)
    }

    /// Close every member mailbox and retire.
    pub async fn shutdown(&self) {
        let _ = self.submit(RoomCommand::Shutdown).await;
    }
}

struct Member {
    info: MemberInfo,
    mailbox: Mailbox,
}

struct Room {
    id: Arc<str>,
    generation: u64,
    members: HashMap<Uuid, Member>,
    state: RoomState,
    stats: RoomStats,
    /// Set when an eviction changed membership behind a fan-out.
    membership_dirty: bool,
    registry: RetireHandle,
}

/// Start a room loop and return its handle.
pub(crate) fn spawn(
    id: &str,
    generation: u64,
    queue_capacity: usize,
    registry: RetireHandle,
) -> RoomHandle {
    let id: Arc<str> = Arc::from(id);
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let room = Room {
        id: id.clone(),
        generation,
        members: HashMap::new(),
        state: RoomState::Running,
        stats: RoomStats::default(),
        membership_dirty: false,
        registry,
    };
    tokio::spawn(room.run(rx));
    RoomHandle { id, generation, tx }
}

impl Room {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        log::debug!("Room {} (gen {}) started", self.id, self.generation);

        while let Some(command) = rx.recv().await {
            self.handle(command);
            if self.state == RoomState::Draining {
                break;
            }
        }

        self.registry.retire(&self.id, self.generation).await;
        self.state = RoomState::Retired;

        // Anything still queued raced with retirement.
        rx.close();
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }

        log::info!("Room {} retired ({} relayed)", self.id, self.stats.frames_delivered);
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Register {
                registration,
                reply,
            } => {
                let result = self.register(registration);
                let _ = reply.send(result);
            }
            RoomCommand::Unregister {
                conn_id,
                farewell,
                reply,
            } => {
                let removed = self.unregister(conn_id, farewell);
                let _ = reply.send(removed);
            }
            RoomCommand::Broadcast { sender, frame } => self.broadcast(sender, frame),
            RoomCommand::PresenceQuery { conn_id } => self.reply_presence(conn_id),
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            RoomCommand::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.members = self.members.len();
                let _ = reply.send(stats);
            }
            RoomCommand::State { reply } => {
                let _ = reply.send(self.state);
            }
            RoomCommand::Shutdown => self.shutdown(),
        }
        self.settle();
    }

    fn register(&mut self, registration: Registration) -> Result<(), RoomError> {
        if self.state != RoomState::Running {
            return Err(RoomError::Closed(self.id.to_string()));
        }

        let Registration {
            conn_id,
            info,
            mailbox,
            announce,
        } = registration;
        let user = info.user.clone();

        match self.members.get_mut(&conn_id) {
            Some(member) => {
                // Re-join from the same connection: refresh the label only.
                member.info.user = info.user;
                member.info.account_id = info.account_id;
            }
            None => {
                self.members.insert(conn_id, Member { info, mailbox });
            }
        }
        self.stats.peak_members = self.stats.peak_members.max(self.members.len());

        log::info!(
            "{user} ({conn_id}) joined room {}, total clients: {}",
            self.id,
            self.members.len()
        );

        self.broadcast_presence();
        if announce {
            self.notify(&joined_notice(&user), Some(conn_id));
        }
        Ok(())
    }

    fn unregister(&mut self, conn_id: Uuid, farewell: bool) -> bool {
        if !self.members.contains_key(&conn_id) {
            return false;
        }

        if farewell {
            if let Some(member) = self.members.get(&conn_id) {
                let text = left_notice(&member.info.user);
                self.notify(&text, Some(conn_id));
            }
        }

        // The notice may itself have evicted the leaving member.
        if let Some(member) = self.members.remove(&conn_id) {
            log::info!(
                "{} ({conn_id}) left room {}, total clients: {}",
                member.info.user,
                self.id,
                self.members.len()
            );
        }
        self.membership_dirty = true;
        true
    }

    fn broadcast(&mut self, sender: Uuid, frame: Frame) {
        if !self.members.contains_key(&sender) {
            log::debug!("Dropping edit from non-member {sender} in room {}", self.id);
            return;
        }
        self.stats.broadcasts += 1;
        self.fan_out(&frame, Some(sender));
    }

    fn reply_presence(&mut self, conn_id: Uuid) {
        let Some(frame) = self.presence_frame() else {
            return;
        };
        let outcome = match self.members.get(&conn_id) {
            Some(member) => member.mailbox.try_deliver(frame),
            None => return,
        };
        match outcome {
            Ok(()) => self.stats.frames_delivered += 1,
            Err(e) => {
                log::warn!("Presence reply to {conn_id} failed ({e}), evicting");
                self.evict(conn_id);
            }
        }
    }

    fn shutdown(&mut self) {
        log::info!("Room {} shutting down, closing {} clients", self.id, self.members.len());
        for (_, member) in self.members.drain() {
            member.mailbox.close();
        }
        self.membership_dirty = false;
        self.state = RoomState::Draining;
    }

    /// Resolve membership changes left behind by the last command: retire
    /// if nobody is left, otherwise tell the survivors.
    fn settle(&mut self) {
        while self.membership_dirty && self.state == RoomState::Running {
            self.membership_dirty = false;
            if self.members.is_empty() {
                log::debug!("Room {} is empty, draining", self.id);
                self.state = RoomState::Draining;
            } else {
                self.broadcast_presence();
            }
        }
    }

    fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot::from_members(self.members.values().map(|m| &m.info))
    }

    fn presence_frame(&self) -> Option<Frame> {
        match Envelope::presence_update(&self.id, self.snapshot()).encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::error!("Failed to encode presence for room {}: {e}", self.id);
                None
            }
        }
    }

    fn broadcast_presence(&mut self) {
        if let Some(frame) = self.presence_frame() {
            self.fan_out(&frame, None);
        }
    }

    fn notify(&mut self, text: &str, exclude: Option<Uuid>) {
        match Envelope::system(&self.id, text).encode() {
            Ok(frame) => self.fan_out(&frame, exclude),
            Err(e) => log::error!("Failed to encode system notice for room {}: {e}", self.id),
        }
    }

    /// Non-blocking delivery to every member but `exclude`.
    fn fan_out(&mut self, frame: &Frame, exclude: Option<Uuid>) {
        let mut failed = Vec::new();
        for (conn_id, member) in &self.members {
            if Some(*conn_id) == exclude {
                continue;
            }
            match member.mailbox.try_deliver(frame.clone()) {
                Ok(()) => self.stats.frames_delivered += 1,
                Err(e) => {
                    log::warn!(
                        "Evicting {} ({conn_id}) from room {}: {e}",
                        member.info.user,
                        self.id
                    );
                    failed.push(*conn_id);
                }
            }
        }
        for conn_id in failed {
            self.evict(conn_id);
        }
    }

    fn evict(&mut self, conn_id: Uuid) {
        if let Some(member) = self.members.remove(&conn_id) {
            member.mailbox.close();
            self.stats.evictions += 1;
            self.membership_dirty = true;
        }
    }
}
