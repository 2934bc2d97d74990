//! Bounded per-client outbound queue.
//!
//! Many producers (the room loop, on behalf of every other member) feed one
//! consumer (the client's write pump). Producers never wait: a full queue is
//! reported back so the room can evict the slow client instead of stalling.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::protocol::Frame;

/// Producer side. Cloned into the room membership entry.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<Frame>,
    evicted: Arc<Notify>,
}

/// Consumer side, owned by the write pump.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Frame>,
    evicted: Arc<Notify>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("mailbox full")]
    Full,
    #[error("mailbox closed")]
    Closed,
}

impl Mailbox {
    pub fn channel(capacity: usize) -> (Mailbox, MailboxReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let evicted = Arc::new(Notify::new());
        (
            Mailbox {
                tx,
                evicted: evicted.clone(),
            },
            MailboxReceiver { rx, evicted },
        )
    }

    /// Enqueue without waiting.
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Stop the consumer. Frames still queued are discarded.
    pub fn close(&self) {
        self.evicted.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MailboxReceiver {
    /// Next frame in FIFO order; `None` once evicted or every producer is gone.
    pub async fn next(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            _ = self.evicted.notified() => None,
            frame = self.rx.recv() => frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let (mailbox, mut rx) = Mailbox::channel(4);
        for text in ["a", "b", "c"] {
            mailbox.try_deliver(Frame::from(text)).unwrap();
        }
        assert_eq!(rx.next().await.as_deref(), Some("a"));
        assert_eq!(rx.next().await.as_deref(), Some("b"));
        assert_eq!(rx.next().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_full_mailbox_does_not_block() {
        let (mailbox, _rx) = Mailbox::channel(2);
        mailbox.try_deliver(Frame::from("1")).unwrap();
        mailbox.try_deliver(Frame::from("2")).unwrap();
        assert_eq!(mailbox.try_deliver(Frame::from("3")), Err(DeliveryError::Full));
    }

    #[tokio::test]
    async fn test_close_stops_consumer_even_with_backlog() {
        let (mailbox, mut rx) = Mailbox::channel(4);
        mailbox.try_deliver(Frame::from("pending")).unwrap();
        mailbox.close();
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_producers_ends_consumer_after_backlog() {
        let (mailbox, mut rx) = Mailbox::channel(4);
        mailbox.try_deliver(Frame::from("last")).unwrap();
        drop(mailbox);
        assert_eq!(rx.next().await.as_deref(), Some("last"));
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_consumer_reported() {
        let (mailbox, rx) = Mailbox::channel(4);
        drop(rx);
        assert!(mailbox.is_closed());
        assert_eq!(mailbox.try_deliver(Frame::from("x")), Err(DeliveryError::Closed));
    }
}
