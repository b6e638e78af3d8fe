//! Peer transports: a reliable stream client and an unreliable datagram client
//!
//! Both variants own a background receive task that feeds socket data through
//! a [`shared::FrameBuffer`] and pushes complete bodies into an [`Inbox`]. The
//! inbox is the only state shared between that task and the simulation loop,
//! and every operation on it is O(1) under a single lock.

pub mod tcp;
pub mod udp;

use crate::error::SendError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub use tcp::StreamClient;
pub use udp::DatagramClient;

/// Common surface of both transports.
pub trait PeerClient {
    /// Frames `payload` and hands it to the socket without waiting for delivery.
    fn send(&self, payload: &str) -> Result<(), SendError>;

    /// Oldest complete message body, if any.
    fn poll_received(&self) -> Option<String>;

    fn has_pending(&self) -> bool;

    /// Sticky flag set once the receive loop hit a transport error.
    fn receive_failed(&self) -> bool;

    /// Stops the receive task and releases the socket. Safe to call repeatedly.
    fn close(&mut self);
}

#[derive(Debug, Default)]
pub(crate) struct Inbox {
    queue: VecDeque<String>,
    receive_failed: bool,
}

pub(crate) type SharedInbox = Arc<Mutex<Inbox>>;

impl Inbox {
    pub(crate) fn shared() -> SharedInbox {
        Arc::new(Mutex::new(Inbox::default()))
    }

    pub(crate) fn push(&mut self, body: String) {
        self.queue.push_back(body);
    }

    pub(crate) fn pop(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn mark_failed(&mut self) {
        self.receive_failed = true;
    }

    pub(crate) fn receive_failed(&self) -> bool {
        self.receive_failed
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Pushes every body completed by `chunk` into the inbox under one lock.
pub(crate) fn stock_received(
    frames: &mut shared::FrameBuffer,
    inbox: &SharedInbox,
    chunk: &str,
) -> usize {
    let bodies = frames.feed(chunk);
    let count = bodies.len();

    if count > 0 {
        let mut inbox = inbox.lock();
        for body in bodies {
            inbox.push(body);
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::FrameBuffer;

    #[test]
    fn test_inbox_is_fifo() {
        let mut inbox = Inbox::default();
        inbox.push("a".to_string());
        inbox.push("b".to_string());

        assert!(inbox.has_pending());
        assert_eq!(inbox.pop().as_deref(), Some("a"));
        assert_eq!(inbox.pop().as_deref(), Some("b"));
        assert_eq!(inbox.pop(), None);
        assert!(!inbox.has_pending());
    }

    #[test]
    fn test_failure_flag_is_sticky() {
        let mut inbox = Inbox::default();
        assert!(!inbox.receive_failed());

        inbox.mark_failed();
        inbox.clear();
        assert!(inbox.receive_failed());
    }

    #[test]
    fn test_stock_received_keeps_partial_frames() {
        let inbox = Inbox::shared();
        let mut frames = FrameBuffer::new();

        assert_eq!(stock_received(&mut frames, &inbox, "::=::one::=::::=::tw"), 1);
        assert_eq!(stock_received(&mut frames, &inbox, "o::=::"), 1);

        let mut guard = inbox.lock();
        assert_eq!(guard.pop().as_deref(), Some("one"));
        assert_eq!(guard.pop().as_deref(), Some("two"));
    }
}
