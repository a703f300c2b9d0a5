//! Batched measurement changes.
//!
//! Applications describe changes with an [`UpdateBuilder`] and hand the
//! resulting [`Updates`] to [`Outstation::apply`](crate::Outstation::apply).
//! A batch is immutable and cheap to clone, so a shared outstation can
//! apply the same batch to its database snapshot and to every live session.

use std::sync::Arc;

use crate::database::UpdateHandler;
use crate::types::{
    Analog, AnalogOutputStatus, Binary, BinaryOutputStatus, Counter, DoubleBitBinary, Flags,
    OctetString, TimeAndInterval,
};

/// How a measurement update produces events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventMode {
    /// Produce an event if the value changed (or exceeded the deadband)
    #[default]
    Detect,
    /// Always produce an event
    Force,
    /// Never produce an event
    Suppress,
    /// Produce an event but leave the static value untouched
    EventOnly,
}

impl EventMode {
    /// Check if this mode updates the static value.
    #[inline]
    pub const fn updates_static(&self) -> bool {
        !matches!(self, Self::EventOnly)
    }
}

/// Point kinds whose flags can be modified over a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagsType {
    /// Binary inputs
    BinaryInput,
    /// Double-bit binary inputs
    DoubleBinaryInput,
    /// Analog inputs
    AnalogInput,
    /// Counters
    Counter,
    /// Frozen counters
    FrozenCounter,
    /// Binary output status
    BinaryOutputStatus,
    /// Analog output status
    AnalogOutputStatus,
}

impl std::fmt::Display for FlagsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BinaryInput => "BinaryInput",
            Self::DoubleBinaryInput => "DoubleBinaryInput",
            Self::AnalogInput => "AnalogInput",
            Self::Counter => "Counter",
            Self::FrozenCounter => "FrozenCounter",
            Self::BinaryOutputStatus => "BinaryOutputStatus",
            Self::AnalogOutputStatus => "AnalogOutputStatus",
        };
        write!(f, "{}", s)
    }
}

/// One measurement change.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Binary input value
    Binary {
        /// Point index
        index: u16,
        /// New value
        value: Binary,
        /// Event mode
        mode: EventMode,
    },
    /// Double-bit binary input value
    DoubleBitBinary {
        /// Point index
        index: u16,
        /// New value
        value: DoubleBitBinary,
        /// Event mode
        mode: EventMode,
    },
    /// Analog input value
    Analog {
        /// Point index
        index: u16,
        /// New value
        value: Analog,
        /// Event mode
        mode: EventMode,
    },
    /// Counter value
    Counter {
        /// Point index
        index: u16,
        /// New value
        value: Counter,
        /// Event mode
        mode: EventMode,
    },
    /// Binary output status value
    BinaryOutputStatus {
        /// Point index
        index: u16,
        /// New value
        value: BinaryOutputStatus,
        /// Event mode
        mode: EventMode,
    },
    /// Analog output status value
    AnalogOutputStatus {
        /// Point index
        index: u16,
        /// New value
        value: AnalogOutputStatus,
        /// Event mode
        mode: EventMode,
    },
    /// Octet string value
    OctetString {
        /// Point index
        index: u16,
        /// New value
        value: OctetString,
        /// Event mode
        mode: EventMode,
    },
    /// Time-and-interval value
    TimeAndInterval {
        /// Point index
        index: u16,
        /// New value
        value: TimeAndInterval,
    },
    /// Copy a counter into its frozen counter
    FreezeCounter {
        /// Counter index
        index: u16,
        /// Reset the counter afterwards
        clear: bool,
        /// Event mode
        mode: EventMode,
    },
    /// Set the flags of every point in `start..=stop`
    Modify {
        /// Point kind
        kind: FlagsType,
        /// First index
        start: u16,
        /// Last index (inclusive)
        stop: u16,
        /// New flags
        flags: Flags,
    },
}

impl Update {
    /// Apply this change. Returns false if the target point does not exist.
    pub fn apply(&self, handler: &mut dyn UpdateHandler) -> bool {
        match self {
            Self::Binary { index, value, mode } => handler.update_binary(value, *index, *mode),
            Self::DoubleBitBinary { index, value, mode } => {
                handler.update_double_bit_binary(value, *index, *mode)
            }
            Self::Analog { index, value, mode } => handler.update_analog(value, *index, *mode),
            Self::Counter { index, value, mode } => handler.update_counter(value, *index, *mode),
            Self::BinaryOutputStatus { index, value, mode } => {
                handler.update_binary_output_status(value, *index, *mode)
            }
            Self::AnalogOutputStatus { index, value, mode } => {
                handler.update_analog_output_status(value, *index, *mode)
            }
            Self::OctetString { index, value, mode } => {
                handler.update_octet_string(value, *index, *mode)
            }
            Self::TimeAndInterval { index, value } => {
                handler.update_time_and_interval(value, *index)
            }
            Self::FreezeCounter { index, clear, mode } => {
                handler.freeze_counter(*index, *clear, *mode)
            }
            Self::Modify {
                kind,
                start,
                stop,
                flags,
            } => handler.modify(*kind, *start, *stop, *flags),
        }
    }
}

/// Immutable batch of updates.
#[derive(Debug, Clone, Default)]
pub struct Updates {
    updates: Arc<[Update]>,
}

impl Updates {
    /// Check if the batch holds no change.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Number of changes.
    #[inline]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Iterate over the changes in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Update> {
        self.updates.iter()
    }

    /// Apply every change in order. Changes to missing points are skipped.
    ///
    /// Returns the number of changes that found their point.
    pub fn apply(&self, handler: &mut dyn UpdateHandler) -> usize {
        self.updates
            .iter()
            .filter(|update| update.apply(handler))
            .count()
    }
}

impl From<Vec<Update>> for Updates {
    fn from(updates: Vec<Update>) -> Self {
        Self {
            updates: updates.into(),
        }
    }
}

/// Collects changes into an [`Updates`] batch.
#[derive(Debug, Default)]
pub struct UpdateBuilder {
    updates: Vec<Update>,
}

impl UpdateBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update a binary input.
    pub fn update_binary(&mut self, value: Binary, index: u16, mode: EventMode) -> &mut Self {
        self.push(Update::Binary { index, value, mode })
    }

    /// Update a double-bit binary input.
    pub fn update_double_bit_binary(
        &mut self,
        value: DoubleBitBinary,
        index: u16,
        mode: EventMode,
    ) -> &mut Self {
        self.push(Update::DoubleBitBinary { index, value, mode })
    }

    /// Update an analog input.
    pub fn update_analog(&mut self, value: Analog, index: u16, mode: EventMode) -> &mut Self {
        self.push(Update::Analog { index, value, mode })
    }

    /// Update a counter.
    pub fn update_counter(&mut self, value: Counter, index: u16, mode: EventMode) -> &mut Self {
        self.push(Update::Counter { index, value, mode })
    }

    /// Update a binary output status.
    pub fn update_binary_output_status(
        &mut self,
        value: BinaryOutputStatus,
        index: u16,
        mode: EventMode,
    ) -> &mut Self {
        self.push(Update::BinaryOutputStatus { index, value, mode })
    }

    /// Update an analog output status.
    pub fn update_analog_output_status(
        &mut self,
        value: AnalogOutputStatus,
        index: u16,
        mode: EventMode,
    ) -> &mut Self {
        self.push(Update::AnalogOutputStatus { index, value, mode })
    }

    /// Update an octet string.
    pub fn update_octet_string(
        &mut self,
        value: OctetString,
        index: u16,
        mode: EventMode,
    ) -> &mut Self {
        self.push(Update::OctetString { index, value, mode })
    }

    /// Update a time-and-interval point.
    pub fn update_time_and_interval(&mut self, value: TimeAndInterval, index: u16) -> &mut Self {
        self.push(Update::TimeAndInterval { index, value })
    }

    /// Freeze a counter.
    pub fn freeze_counter(&mut self, index: u16, clear: bool, mode: EventMode) -> &mut Self {
        self.push(Update::FreezeCounter { index, clear, mode })
    }

    /// Set the flags of a range of points.
    pub fn modify(&mut self, kind: FlagsType, start: u16, stop: u16, flags: Flags) -> &mut Self {
        self.push(Update::Modify {
            kind,
            start,
            stop,
            flags,
        })
    }

    /// Take the collected changes. The builder is left empty.
    pub fn build(&mut self) -> Updates {
        Updates::from(std::mem::take(&mut self.updates))
    }

    fn push(&mut self, update: Update) -> &mut Self {
        self.updates.push(update);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_preserves_order() {
        let mut builder = UpdateBuilder::new();
        builder
            .update_counter(Counter::new(3, Flags::ONLINE), 1, EventMode::Detect)
            .freeze_counter(1, true, EventMode::Force)
            .modify(FlagsType::Counter, 0, 4, Flags::EMPTY);

        let updates = builder.build();
        assert_eq!(updates.len(), 3);
        assert!(matches!(
            updates.iter().next(),
            Some(Update::Counter { index: 1, .. })
        ));
        assert!(matches!(
            updates.iter().last(),
            Some(Update::Modify {
                kind: FlagsType::Counter,
                ..
            })
        ));
    }

    #[test]
    fn test_build_empties_builder() {
        let mut builder = UpdateBuilder::new();
        assert!(builder.build().is_empty());

        builder.update_binary(Binary::new(true, Flags::ONLINE), 0, EventMode::Detect);
        assert!(!builder.build().is_empty());
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_updates_clone_shares_batch() {
        let mut builder = UpdateBuilder::new();
        builder.update_analog(Analog::new(1.0, Flags::ONLINE), 0, EventMode::Detect);
        let a = builder.build();
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.updates, &b.updates));
    }

    #[test]
    fn test_event_mode() {
        assert_eq!(EventMode::default(), EventMode::Detect);
        assert!(EventMode::Force.updates_static());
        assert!(!EventMode::EventOnly.updates_static());
    }
}
