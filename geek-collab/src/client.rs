//! One connected participant and its two pumps.
//!
//! ```text
//!   transport ──receive()──► read pump ──RoomCommand──► room loop
//!                                                         │
//!   transport ◄──send()──── write pump ◄──── mailbox ◄────┘
//! ```
//!
//! The pumps run as separate tasks so a slow socket write never delays
//! inbound edits, and vice versa. When the write pump stops (send error,
//! eviction, shutdown) it drops a oneshot that also ends the read pump.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::mailbox::{Mailbox, MailboxReceiver};
use crate::presence::MemberInfo;
use crate::protocol::{Action, Envelope, Frame};
use crate::registry::RoomRegistry;
use crate::room::{Registration, RoomError, RoomHandle};
use crate::transport::{FrameSink, FrameSource};

/// Label used until the participant sends a `join` with a name.
pub const ANONYMOUS: &str = "anonymous";

/// Identity vouched for by an upstream authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub name: String,
}

/// Server-side state of one connection.
pub struct Client {
    conn_id: Uuid,
    user: String,
    identity: Option<CallerIdentity>,
    joined_at: DateTime<Utc>,
    mailbox: Mailbox,
    room: Option<RoomHandle>,
    registry: RoomRegistry,
}

impl Client {
    pub(crate) fn new(
        registry: RoomRegistry,
        mailbox: Mailbox,
        identity: Option<CallerIdentity>,
    ) -> Self {
        let user = identity
            .as_ref()
            .map(|id| id.name.clone())
            .unwrap_or_else(|| ANONYMOUS.to_owned());
        Self {
            conn_id: Uuid::new_v4(),
            user,
            identity,
            joined_at: Utc::now(),
            mailbox,
            room: None,
            registry,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// When the client entered its current room.
    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(RoomHandle::id)
    }

    fn registration(&self, announce: bool) -> Registration {
        let info = MemberInfo::new(self.conn_id, self.user.clone(), self.joined_at)
            .with_account(self.identity.as_ref().map(|id| id.user_id.clone()));
        Registration {
            conn_id: self.conn_id,
            info,
            mailbox: self.mailbox.clone(),
            announce,
        }
    }

    /// Register with `room_id`, re-resolving once if that room was retiring.
    pub(crate) async fn attach(&mut self, room_id: &str, announce: bool) -> Result<(), RoomError> {
        let mut room = match &self.room {
            Some(current) if current.id() == room_id => current.clone(),
            _ => {
                // Join order is per room; a re-join of the same room keeps it.
                self.joined_at = Utc::now();
                self.registry.resolve(room_id).await
            }
        };

        match room.register(self.registration(announce)).await {
            Ok(()) => {}
            Err(RoomError::Closed(_)) => {
                log::debug!("Room {room_id} closed under {}, re-resolving", self.conn_id);
                self.registry.retire(room_id, room.generation()).await;
                room = self.registry.resolve(room_id).await;
                room.register(self.registration(announce)).await?;
            }
        }

        self.room = Some(room);
        Ok(())
    }

    /// Leave the current room, if any.
    pub(crate) async fn detach(&mut self, farewell: bool) {
        if let Some(room) = self.room.take() {
            room.unregister(self.conn_id, farewell).await;
        }
    }

    async fn on_join(&mut self, env: &Envelope) {
        // An authenticated identity wins over whatever the editor claims.
        if self.identity.is_none() {
            if let Some(name) = env.display_name() {
                self.user = name.to_owned();
            }
        }

        let target = env
            .room
            .as_deref()
            .filter(|room| !room.is_empty())
            .or_else(|| self.room_id())
            .map(str::to_owned);
        let Some(target) = target else {
            log::warn!("Join without a room from {}", self.conn_id);
            return;
        };

        if self.room_id().is_some_and(|current| current != target) {
            self.detach(true).await;
        }
        if let Err(e) = self.attach(&target, true).await {
            log::warn!("{} could not join {target}: {e}", self.conn_id);
        }
    }

    async fn on_edit(&self, frame: Frame) {
        match &self.room {
            Some(room) => {
                if let Err(e) = room.broadcast(self.conn_id, frame).await {
                    log::debug!("Edit from {} dropped: {e}", self.conn_id);
                }
            }
            None => log::debug!("Edit from {} outside any room", self.conn_id),
        }
    }

    async fn on_presence_query(&self) {
        if let Some(room) = &self.room {
            if let Err(e) = room.request_presence(self.conn_id).await {
                log::debug!("Presence query from {} dropped: {e}", self.conn_id);
            }
        }
    }

    /// Apply one inbound frame. Returns `false` when the session should end.
    pub(crate) async fn dispatch(&mut self, frame: Frame) -> bool {
        let env = match Envelope::decode(&frame) {
            Ok(env) => env,
            Err(e) => {
                log::warn!("Dropping malformed frame from {}: {e}", self.conn_id);
                return true;
            }
        };

        match env.action {
            Action::Join => self.on_join(&env).await,
            Action::Edit => self.on_edit(frame).await,
            Action::Leave => {
                self.detach(true).await;
                return false;
            }
            Action::PresenceQuery => self.on_presence_query().await,
            Action::System | Action::PresenceUpdate => {
                log::debug!("Ignoring server-only action {} from {}", env.action, self.conn_id);
            }
            Action::Unknown(ref action) => {
                log::warn!("Unknown action from {}: {action:?}", self.conn_id);
            }
        }
        true
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Covers a pump task aborted mid-await.
        if let Some(room) = self.room.take() {
            let conn_id = self.conn_id;
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    room.unregister(conn_id, false).await;
                });
            }
        }
    }
}

/// Inbound loop: decode, dispatch, and unregister on the way out.
pub(crate) async fn read_pump<R: FrameSource>(
    mut client: Client,
    mut source: R,
    mut writer_done: oneshot::Receiver<()>,
) {
    let conn_id = client.conn_id();
    loop {
        tokio::select! {
            _ = &mut writer_done => {
                log::debug!("Write side of {conn_id} ended");
                break;
            }
            incoming = source.receive() => match incoming {
                Some(Ok(frame)) => {
                    if !client.dispatch(frame).await {
                        log::debug!("{conn_id} left");
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Transport error from {conn_id}: {e}");
                    break;
                }
                None => {
                    log::info!("Connection {conn_id} closed");
                    break;
                }
            },
        }
    }
    client.detach(false).await;
}

/// Outbound loop: mailbox to transport in FIFO order, no retries.
pub(crate) async fn write_pump<W: FrameSink>(
    mut outbox: MailboxReceiver,
    mut sink: W,
    done: oneshot::Sender<()>,
) {
    while let Some(frame) = outbox.next().await {
        if let Err(e) = sink.send(frame).await {
            log::debug!("Send failed, closing transport: {e}");
            break;
        }
    }
    sink.close().await;
    drop(done);
}
