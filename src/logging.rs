//! Log filtering for channels, outstations and sessions.
//!
//! Every object in the stack owns a [`Logger`]: an id that is attached to
//! each `tracing` event plus a [`LogLevels`] filter that can be changed at
//! runtime with `set_log_filters`. Child objects derive their logger with
//! [`Logger::detach`], which copies the filter so that it can be changed
//! independently afterwards.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Bit set of enabled log categories.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct LogLevels(u32);

impl LogLevels {
    /// Significant events (channel open/close, session creation)
    pub const EVENT: Self = Self(1 << 0);
    /// Errors
    pub const ERR: Self = Self(1 << 1);
    /// Warnings
    pub const WARN: Self = Self(1 << 2);
    /// Informational messages
    pub const INFO: Self = Self(1 << 3);
    /// Debug messages
    pub const DBG: Self = Self(1 << 4);
    /// Received link data
    pub const LINK_RX: Self = Self(1 << 5);
    /// Received link data as hex
    pub const LINK_RX_HEX: Self = Self(1 << 6);
    /// Transmitted link data
    pub const LINK_TX: Self = Self(1 << 7);
    /// Transmitted link data as hex
    pub const LINK_TX_HEX: Self = Self(1 << 8);
    /// Transport layer receive
    pub const TRANSPORT_RX: Self = Self(1 << 9);
    /// Transport layer transmit
    pub const TRANSPORT_TX: Self = Self(1 << 10);
    /// Application headers received
    pub const APP_HEADER_RX: Self = Self(1 << 11);
    /// Application headers transmitted
    pub const APP_HEADER_TX: Self = Self(1 << 12);
    /// Application objects received
    pub const APP_OBJECT_RX: Self = Self(1 << 13);
    /// Application objects transmitted
    pub const APP_OBJECT_TX: Self = Self(1 << 14);
    /// Application fragments received as hex
    pub const APP_HEX_RX: Self = Self(1 << 15);
    /// Application fragments transmitted as hex
    pub const APP_HEX_TX: Self = Self(1 << 16);

    /// Nothing is logged.
    pub const NONE: Self = Self(0);
    /// Events, errors, warnings and info.
    pub const NORMAL: Self = Self(Self::EVENT.0 | Self::ERR.0 | Self::WARN.0 | Self::INFO.0);
    /// Every category.
    pub const ALL: Self = Self((1 << 17) - 1);

    /// Create from raw bits.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get the raw bits.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Check if every bit of `other` is enabled.
    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if no category is enabled.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for LogLevels {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for LogLevels {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for LogLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogLevels({:#07x})", self.0)
    }
}

/// Per-object logger.
#[derive(Clone)]
pub struct Logger {
    id: Arc<str>,
    filters: Arc<AtomicU32>,
}

impl Logger {
    /// Create a root logger.
    pub fn new(id: impl Into<String>, filters: LogLevels) -> Self {
        Self {
            id: Arc::from(id.into()),
            filters: Arc::new(AtomicU32::new(filters.bits())),
        }
    }

    /// Logger id, attached to every emitted event.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Derive a child logger with its own id and a copy of the current filter.
    pub fn detach(&self, id: impl Into<String>) -> Self {
        Self::new(id, self.filters())
    }

    /// Derive a logger with another id that shares this logger's filter.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: Arc::from(id.into()),
            filters: self.filters.clone(),
        }
    }

    /// Current filter.
    pub fn filters(&self) -> LogLevels {
        LogLevels::from_bits(self.filters.load(Ordering::Relaxed))
    }

    /// Replace the filter.
    pub fn set_filters(&self, filters: LogLevels) {
        self.filters.store(filters.bits(), Ordering::Relaxed);
    }

    /// Check whether a category passes the filter.
    #[inline]
    pub fn is_enabled(&self, level: LogLevels) -> bool {
        !level.is_empty() && self.filters().contains(level)
    }

    /// Emit a message in the given category.
    pub fn log(&self, level: LogLevels, args: fmt::Arguments<'_>) {
        if !self.is_enabled(level) {
            return;
        }

        let id: &str = &self.id;
        if level == LogLevels::ERR {
            tracing::error!(id, "{}", args);
        } else if level == LogLevels::WARN {
            tracing::warn!(id, "{}", args);
        } else if level == LogLevels::INFO || level == LogLevels::EVENT {
            tracing::info!(id, "{}", args);
        } else if level == LogLevels::DBG {
            tracing::debug!(id, "{}", args);
        } else {
            tracing::trace!(id, "{}", args);
        }
    }

    /// Emit an error.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevels::ERR, args);
    }

    /// Emit a warning.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevels::WARN, args);
    }
}

/// Format bytes as space separated upper-case hex.
pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("id", &self.id)
            .field("filters", &self.filters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels_presets() {
        assert!(LogLevels::ALL.contains(LogLevels::APP_HEX_TX));
        assert!(LogLevels::ALL.contains(LogLevels::NORMAL));
        assert!(LogLevels::NORMAL.contains(LogLevels::WARN));
        assert!(!LogLevels::NORMAL.contains(LogLevels::DBG));
        assert!(LogLevels::NONE.is_empty());
    }

    #[test]
    fn test_log_levels_ops() {
        let levels = LogLevels::ERR | LogLevels::WARN;
        assert!(levels.contains(LogLevels::ERR));
        assert_eq!(levels & LogLevels::WARN, LogLevels::WARN);
        assert_eq!(levels.bits(), 0b110);
    }

    #[test]
    fn test_logger_filters() {
        let logger = Logger::new("channel", LogLevels::NORMAL);
        assert!(logger.is_enabled(LogLevels::INFO));
        assert!(!logger.is_enabled(LogLevels::DBG));
        assert!(!logger.is_enabled(LogLevels::NONE));

        logger.set_filters(LogLevels::ERR);
        assert!(!logger.is_enabled(LogLevels::INFO));
        assert!(logger.is_enabled(LogLevels::ERR));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[]), "");
        assert_eq!(to_hex(&[0x05, 0x64, 0xAB]), "05 64 AB");
    }

    #[test]
    fn test_logger_detach_is_independent() {
        let parent = Logger::new("server", LogLevels::ALL);
        let child = parent.detach("server outstation");
        assert_eq!(child.id(), "server outstation");
        assert_eq!(child.filters(), LogLevels::ALL);

        child.set_filters(LogLevels::NONE);
        assert_eq!(parent.filters(), LogLevels::ALL);

        // clones and renamed loggers share the filter
        let clone = child.clone();
        clone.set_filters(LogLevels::WARN);
        assert_eq!(child.filters(), LogLevels::WARN);

        let renamed = child.with_id("server outstation 127.0.0.1:40000");
        renamed.set_filters(LogLevels::ERR);
        assert_eq!(child.filters(), LogLevels::ERR);
        assert_eq!(renamed.id(), "server outstation 127.0.0.1:40000");
    }
}
