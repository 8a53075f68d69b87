//! Per-connection outbound frame buffer.
//!
//! A `ConnectionHandle` lets the registry and dispatcher write frames to a
//! peer without touching its socket. Frames are appended to an in-memory
//! buffer and the owning session is woken to flush them. Writing never
//! blocks, so fan-out can run while holding the registry's read lock.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Process-unique connection identifier
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Error when writing to a ConnectionHandle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Session has terminated
    Closed,
    /// Peer is not draining its frames fast enough
    Backlogged,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "connection closed"),
            SendError::Backlogged => write!(f, "outbound buffer full"),
        }
    }
}

impl std::error::Error for SendError {}

/// Write capability for one connected peer.
pub struct ConnectionHandle {
    id: ConnectionId,
    addr: SocketAddr,
    /// Frames waiting to be written to the socket
    pending: Mutex<VecDeque<String>>,
    /// Wakes the session when frames arrive or the handle closes
    notify: Notify,
    alive: AtomicBool,
    /// Maximum pending frames (0 = unbounded)
    capacity: usize,
}

impl ConnectionHandle {
    pub fn new(addr: SocketAddr, capacity: usize) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            alive: AtomicBool::new(true),
            capacity,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check if the connection is still alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the connection as closed and wake its session
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.notify.notify_one();
    }

    /// Wait until frames are pending or the handle is closed
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Take all pending frames, oldest first
    pub fn take_frames(&self) -> VecDeque<String> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queue one frame for the peer.
    ///
    /// A handle that overflows its capacity is closed: its session will tear
    /// down and the registry will stop delivering to it.
    pub fn send(&self, frame: &str) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }

        let was_empty = {
            let mut pending = self.pending.lock();
            if self.capacity > 0 && pending.len() >= self.capacity {
                drop(pending);
                self.close();
                return Err(SendError::Backlogged);
            }
            pending.push_back(frame.to_string());
            pending.len() == 1
        };

        // Only notify on the empty -> non-empty edge; coalesces bursts
        if was_empty {
            self.notify.notify_one();
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}
