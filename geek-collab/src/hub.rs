//! Entry point: turn an accepted transport into a live room member.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::{read_pump, write_pump, CallerIdentity, Client};
use crate::mailbox::Mailbox;
use crate::registry::{RoomRegistry, DEFAULT_ROOM_QUEUE};
use crate::room::RoomError;
use crate::transport::{FrameSink, FrameSource};

/// Default bound on frames queued for one client.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Frames buffered per client before it counts as unresponsive
    pub mailbox_capacity: usize,
    /// Commands buffered per room loop
    pub room_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            room_queue_capacity: DEFAULT_ROOM_QUEUE,
        }
    }
}

/// Running pumps of one connection.
pub struct ClientSession {
    conn_id: Uuid,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ClientSession {
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Wait until both pumps have exited.
    pub async fn join(self) {
        if let Err(e) = self.reader.await {
            log::error!("Read pump for {} failed: {e}", self.conn_id);
        }
        if let Err(e) = self.writer.await {
            log::error!("Write pump for {} failed: {e}", self.conn_id);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }
}

/// The room hub.
#[derive(Clone)]
pub struct Hub {
    registry: RoomRegistry,
    config: HubConfig,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: RoomRegistry::new(config.room_queue_capacity),
            config,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn config(&self) -> HubConfig {
        self.config
    }

    /// Register a new connection with `room_id` and start its pumps.
    ///
    /// The client is a member of the room when this returns. Only a room
    /// that keeps closing under it makes this fail, in which case the
    /// transport is closed.
    pub async fn connect<R, W>(
        &self,
        source: R,
        mut sink: W,
        room_id: &str,
        identity: Option<CallerIdentity>,
    ) -> Result<ClientSession, RoomError>
    where
        R: FrameSource,
        W: FrameSink,
    {
        let (mailbox, outbox) = Mailbox::channel(self.config.mailbox_capacity);
        let mut client = Client::new(self.registry.clone(), mailbox, identity);
        let conn_id = client.conn_id();

        if let Err(e) = client.attach(room_id, false).await {
            log::warn!("Connection {conn_id} rejected by room {room_id}: {e}");
            sink.close().await;
            return Err(e);
        }
        log::info!("Connection {conn_id} attached to room {room_id}");

        let (done_tx, done_rx) = oneshot::channel();
        let writer = tokio::spawn(write_pump(outbox, sink, done_tx));
        let reader = tokio::spawn(read_pump(client, source, done_rx));

        Ok(ClientSession {
            conn_id,
            reader,
            writer,
        })
    }

    /// Close every room; every connected client is disconnected.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
