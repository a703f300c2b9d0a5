//! Channel and stack statistics.
//!
//! Shared channels and shared outstations report the sum over their live
//! children; both structs implement `AddAssign` and `Sum` for that.

use std::iter::Sum;
use std::ops::AddAssign;

/// Counters of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatistics {
    /// Times the connection opened
    pub num_open: u64,
    /// Failed open attempts (e.g. TLS handshakes)
    pub num_open_fail: u64,
    /// Times the connection closed
    pub num_close: u64,
    /// Bytes received
    pub num_bytes_rx: u64,
    /// Bytes transmitted
    pub num_bytes_tx: u64,
    /// Completed writes
    pub num_writes: u64,
}

impl AddAssign for LinkStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.num_open += rhs.num_open;
        self.num_open_fail += rhs.num_open_fail;
        self.num_close += rhs.num_close;
        self.num_bytes_rx += rhs.num_bytes_rx;
        self.num_bytes_tx += rhs.num_bytes_tx;
        self.num_writes += rhs.num_writes;
    }
}

impl Sum for LinkStatistics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}

/// Counters of one protocol stack instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackStatistics {
    /// Segments delivered to the stack
    pub num_rx: u64,
    /// Bytes delivered to the stack
    pub num_rx_bytes: u64,
    /// Segments discarded while the stack was disabled
    pub num_rx_discard: u64,
    /// Segments transmitted
    pub num_tx: u64,
    /// Bytes transmitted
    pub num_tx_bytes: u64,
    /// Failed transmissions
    pub num_tx_error: u64,
}

impl AddAssign for StackStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.num_rx += rhs.num_rx;
        self.num_rx_bytes += rhs.num_rx_bytes;
        self.num_rx_discard += rhs.num_rx_discard;
        self.num_tx += rhs.num_tx;
        self.num_tx_bytes += rhs.num_tx_bytes;
        self.num_tx_error += rhs.num_tx_error;
    }
}

impl Sum for StackStatistics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}
