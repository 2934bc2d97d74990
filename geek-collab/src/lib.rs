//! # geek-collab — Real-time room hub for collaborative editing
//!
//! Participants hold one WebSocket each, scoped to a room id. Edits from one
//! participant are relayed verbatim to everyone else in the room, and every
//! membership change produces a fresh presence listing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  /api/ws/{room}  ┌──────────────┐  resolve   ┌──────────────┐
//! │ Editor tab  │ ◄──────────────► │ CollabServer │ ─────────► │ RoomRegistry │
//! └─────────────┘    JSON frames   └──────┬───────┘            └──────┬───────┘
//!                                         │ Hub::connect              │ spawn
//!                                         ▼                           ▼
//!                              ┌──────────────────────┐  command ┌───────────┐
//!                              │ read pump/write pump │ ───────► │ Room loop │
//!                              │ (per connection)     │ ◄─────── │ (per room)│
//!                              └──────────────────────┘  mailbox └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelope, actions and frame codec
//! - [`presence`] — member listings and system notice texts
//! - [`transport`] — frame source/sink traits, WebSocket and in-memory adapters
//! - [`mailbox`] — bounded per-client outbound queue with eviction
//! - [`room`] — single-owner room control loop
//! - [`registry`] — room id to live room, create on demand, retire when empty
//! - [`client`] — per-connection state and its two pumps
//! - [`hub`] — turns a transport into a room member
//! - [`config`] — server configuration from defaults and environment
//! - [`server`] — WebSocket listener and handshake
//!
//! ## Guarantees
//!
//! | Property | How |
//! |----------|-----|
//! | Same order for every member | one loop per room owns membership |
//! | Slow client never stalls a room | `try_send` into a bounded mailbox, evict on full |
//! | No echo to the sender | fan-out skips the originating connection |
//! | Empty rooms disappear | loop retires itself, registry guarded by generation |

pub mod client;
pub mod config;
pub mod hub;
pub mod mailbox;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use client::{CallerIdentity, ANONYMOUS};
pub use config::{ConfigError, ServerConfig};
pub use hub::{ClientSession, Hub, HubConfig};
pub use mailbox::{DeliveryError, Mailbox, MailboxReceiver};
pub use presence::{MemberInfo, PresenceSnapshot};
pub use protocol::{Action, Envelope, Frame, ProtocolError};
pub use registry::RoomRegistry;
pub use room::{Registration, RoomError, RoomHandle, RoomState, RoomStats};
pub use server::{CollabServer, ServerError, ServerStats};
pub use transport::{FrameSink, FrameSource, TransportError};
