//! Outstation contract and its shared-channel implementations.
//!
//! [`SharedOutstation`] is what applications hold: one per route on a shared
//! channel. For every accepted connection it creates an [`OutstationStack`]
//! bound into that connection's I/O handler and forwards every operation of
//! the [`Outstation`] contract to all of its live stacks.

mod shared;
mod stack;

pub use shared::*;
pub use stack::*;

use crate::logging::LogLevels;
use crate::types::StackStatistics;
use crate::updates::Updates;

/// Operations an application performs on an outstation.
///
/// Every implementation is safe to call from any thread.
pub trait Outstation: Send + Sync {
    /// Start answering the master. Returns false after shutdown.
    fn enable(&self) -> bool;

    /// Stop answering the master. Returns false after shutdown.
    fn disable(&self) -> bool;

    /// Tear down permanently. Idempotent.
    fn shutdown(&self);

    /// Transport counters of the protocol stack.
    fn stack_statistics(&self) -> StackStatistics;

    /// Change which log levels are emitted.
    fn set_log_filters(&self, filters: LogLevels);

    /// Set the DEVICE_RESTART bit reported in IIN1.
    fn set_restart_iin(&self);

    /// Apply a batch of measurement changes.
    fn apply(&self, updates: &Updates);
}

/// Data link state reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    /// No usable link
    Unreset,
    /// Link is up and the outstation is enabled
    Reset,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unreset => "UNRESET",
            Self::Reset => "RESET",
        };
        write!(f, "{}", s)
    }
}

/// Internal indications sent with every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Iin {
    /// First octet
    pub iin1: u8,
    /// Second octet
    pub iin2: u8,
}

impl Iin {
    /// IIN1.7: the device restarted
    pub const DEVICE_RESTART: u8 = 0x80;

    /// Check IIN1.7.
    #[inline]
    pub fn device_restart(&self) -> bool {
        self.iin1 & Self::DEVICE_RESTART != 0
    }

    /// Set or clear IIN1.7.
    pub fn set_device_restart(&mut self, value: bool) {
        if value {
            self.iin1 |= Self::DEVICE_RESTART;
        } else {
            self.iin1 &= !Self::DEVICE_RESTART;
        }
    }
}

/// Receiver of control requests from the master.
///
/// Requests are bracketed by `begin` and `end`; every method defaults to
/// doing nothing.
pub trait CommandHandler: Send + Sync {
    /// A request that may carry controls is about to be processed.
    fn begin(&self) {}

    /// Processing of the current request finished.
    fn end(&self) {}
}

/// Application callbacks of an outstation.
pub trait OutstationApplication: Send + Sync {
    /// The link status of one session changed.
    fn on_state_change(&self, _status: LinkStatus) {}
}

/// [`CommandHandler`] that ignores every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCommandHandler;

impl CommandHandler for NullCommandHandler {}

/// [`OutstationApplication`] with no behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOutstationApplication;

impl OutstationApplication for DefaultOutstationApplication {}
