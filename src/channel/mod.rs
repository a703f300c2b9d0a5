//! Shared channels and the transport boundary they consume.
//!
//! A shared channel owns one listener. Every accepted connection is wrapped
//! in an [`IoHandler`] and announced through [`ConnectionCallback`]; the
//! channel forwards the announcement to each registered shared outstation,
//! which binds a fresh [`LinkSession`] into the handler under its route.
//!
//! Every trait method here is called on the owning channel's executor.

mod iohandler;
mod server;
mod shared_channel;
#[cfg(feature = "tls")]
mod tls;

pub use iohandler::*;
pub use server::*;
pub use shared_channel::*;
#[cfg(feature = "tls")]
pub use tls::*;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::types::{Addresses, LinkStatistics};

/// Identity of one I/O handler (one physical connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id.
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle state of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Closed by the remote peer or by an I/O error
    Closed,
    /// Established
    Open,
    /// Shut down locally; never reopens
    Shutdown,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::Shutdown => "SHUTDOWN",
        };
        write!(f, "{}", s)
    }
}

/// Observer of connection state changes.
pub trait ChannelListener: Send + Sync {
    /// Called on the executor after every state change.
    fn on_state_change(&self, state: ChannelState);
}

/// Protocol instance bound into an I/O handler under a route.
pub trait LinkSession: Send + Sync {
    /// The connection is usable.
    fn on_lower_layer_up(&self);

    /// The connection is gone or the session was unbound.
    fn on_lower_layer_down(&self);

    /// Bytes arrived on the connection.
    fn on_read_complete(&self, data: &Bytes);

    /// A write queued by this session finished.
    fn on_write_complete(&self, result: &io::Result<usize>);
}

/// One physical connection shared by every session bound into it.
pub trait IoHandler: Send + Sync {
    /// Connection identity.
    fn id(&self) -> HandlerId;

    /// Remote address, `"ip:port"` or `"unknown"`.
    fn remote_addr(&self) -> &str;

    /// Bind a session under `route`. Fails if the route is already bound or
    /// the handler has shut down.
    fn add_context(&self, session: Arc<dyn LinkSession>, route: Addresses) -> bool;

    /// Unbind the session under `route`. Returns false if nothing was bound.
    fn remove_context(&self, route: Addresses) -> bool;

    /// Queue `data` for transmission on behalf of the session under `route`.
    fn write(&self, route: Addresses, data: Bytes) -> bool;

    /// Connection counters.
    fn statistics(&self) -> LinkStatistics;

    /// Close the connection and unbind every session. Idempotent.
    fn shutdown(&self);
}

/// Receiver of accepted and closed connections.
pub trait ConnectionCallback: Send + Sync {
    /// A connection was accepted.
    fn on_connect(&self, handler: Arc<dyn IoHandler>, remote_addr: &str);

    /// A connection was closed by the peer.
    fn on_disconnect(&self, handler: &Arc<dyn IoHandler>, remote_addr: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_ids_are_unique() {
        let a = HandlerId::next();
        let b = HandlerId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
        assert_eq!(format!("{}", HandlerId(7)), "session-7");
    }

    #[test]
    fn test_channel_state_display() {
        assert_eq!(ChannelState::Closed.to_string(), "CLOSED");
        assert_eq!(ChannelState::Shutdown.to_string(), "SHUTDOWN");
    }
}
