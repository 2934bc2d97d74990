//! Duplex frame channel handed to the hub for each accepted connection.
//!
//! The hub only needs three capabilities: receive a frame, send a frame and
//! close. They are split into a [`FrameSource`] (owned by the read pump) and
//! a [`FrameSink`] (owned by the write pump) so a stalled write never blocks
//! inbound processing.
//!
//! Two implementations ship with the crate:
//! - [`split_websocket`] over a `tokio_tungstenite` stream (production)
//! - [`memory::pair`] over tokio channels (tests, benches)

use std::future::Future;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::protocol::Frame;

/// Transport faults. Always terminal for the affected client only.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("connection reset")]
    Reset,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Inbound half.
pub trait FrameSource: Send + 'static {
    /// Next frame, `None` once the peer has closed, `Some(Err(_))` on a fault.
    fn receive(&mut self) -> impl Future<Output = Option<Result<Frame, TransportError>>> + Send;
}

/// Outbound half.
pub trait FrameSink: Send + 'static {
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Read half of a WebSocket connection.
pub struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

/// Write half of a WebSocket connection.
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

/// Split an upgraded WebSocket into hub transport halves.
pub fn split_websocket<S>(ws: WebSocketStream<S>) -> (WsSource<S>, WsSink<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (WsSource { inner: stream }, WsSink { inner: sink })
}

impl<S> FrameSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::from(text.as_str()))),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => return Some(Ok(Frame::from(text))),
                    Err(_) => log::warn!("Dropping non UTF-8 binary frame ({} bytes)", data.len()),
                },
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered inside tungstenite
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.inner.send(Message::text(frame.to_string())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close().await {
            log::debug!("WebSocket close failed: {e}");
        }
    }
}

/// In-process transport backed by tokio channels.
pub mod memory {
    use tokio::sync::mpsc;

    use super::{FrameSink, FrameSource, TransportError};
    use crate::protocol::Frame;

    pub struct MemorySource {
        rx: mpsc::Receiver<Result<Frame, TransportError>>,
    }

    pub struct MemorySink {
        tx: Option<mpsc::Sender<Frame>>,
    }

    /// The remote end: injects inbound frames and observes outbound ones.
    pub struct MemoryPeer {
        inbound: Option<mpsc::Sender<Result<Frame, TransportError>>>,
        outbound: mpsc::Receiver<Frame>,
    }

    /// Create a connected transport. `capacity` bounds each direction (at
    /// least one frame); a peer that stops reading therefore stalls the sink
    /// once it is full.
    pub fn pair(capacity: usize) -> (MemorySource, MemorySink, MemoryPeer) {
        let capacity = capacity.max(1);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            MemorySource { rx: in_rx },
            MemorySink { tx: Some(out_tx) },
            MemoryPeer {
                inbound: Some(in_tx),
                outbound: out_rx,
            },
        )
    }

    impl FrameSource for MemorySource {
        async fn receive(&mut self) -> Option<Result<Frame, TransportError>> {
            self.rx.recv().await
        }
    }

    impl FrameSink for MemorySink {
        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            match &self.tx {
                Some(tx) => tx.send(frame).await.map_err(|_| TransportError::Closed),
                None => Err(TransportError::Closed),
            }
        }

        async fn close(&mut self) {
            self.tx = None;
        }
    }

    impl MemoryPeer {
        /// Deliver a text frame to the hub. Returns `false` once disconnected.
        pub async fn send_text(&self, text: &str) -> bool {
            match &self.inbound {
                Some(tx) => tx.send(Ok(Frame::from(text))).await.is_ok(),
                None => false,
            }
        }

        /// Surface a transport fault to the hub's read pump.
        pub async fn inject_error(&self) -> bool {
            match &self.inbound {
                Some(tx) => tx.send(Err(TransportError::Reset)).await.is_ok(),
                None => false,
            }
        }

        /// Drop the inbound side without a `leave`, like a closed tab.
        pub fn disconnect(&mut self) {
            self.inbound = None;
        }

        /// Next frame the hub wrote, `None` once the hub closed its side.
        pub async fn recv(&mut self) -> Option<Frame> {
            self.outbound.recv().await
        }

        pub fn try_recv(&mut self) -> Option<Frame> {
            self.outbound.try_recv().ok()
        }
    }
}
