//! Point configuration and the databases that apply updates to it.
//!
//! - [`DatabaseConfig`] holds, per point type, an index-keyed map of
//!   [`PointConfig`] records (variations, class, deadband, current value).
//! - [`SharedDatabaseConfig`] is the snapshot a shared outstation keeps so
//!   that every new session starts from the latest values.
//! - [`SessionDatabase`] is the database of one live session; it also
//!   decides which updates produce events.
//!
//! Indices are fixed at configuration time: updating an index that was
//! never configured fails and creates nothing.

use std::collections::BTreeMap;

use crate::types::{
    Analog, AnalogOutputStatus, Binary, BinaryOutputStatus, Counter, DnpTime, DoubleBitBinary,
    EventAnalogOutputStatusVariation, EventAnalogVariation, EventBinaryOutputStatusVariation,
    EventBinaryVariation, EventCounterVariation, EventDoubleBitBinaryVariation,
    EventFrozenCounterVariation, EventOctetStringVariation, Flags, FrozenCounter, Measurement,
    OctetString, PointClass, StaticAnalogOutputStatusVariation, StaticAnalogVariation,
    StaticBinaryOutputStatusVariation, StaticBinaryVariation, StaticCounterVariation,
    StaticDoubleBitBinaryVariation, StaticFrozenCounterVariation, StaticOctetStringVariation,
    StaticTimeAndIntervalVariation, TimeAndInterval,
};
use crate::updates::{EventMode, FlagsType};

/// Receiver of measurement changes.
///
/// Every method returns false if the point does not exist.
pub trait UpdateHandler {
    /// Update a binary input.
    fn update_binary(&mut self, value: &Binary, index: u16, mode: EventMode) -> bool;

    /// Update a double-bit binary input.
    fn update_double_bit_binary(
        &mut self,
        value: &DoubleBitBinary,
        index: u16,
        mode: EventMode,
    ) -> bool;

    /// Update an analog input.
    fn update_analog(&mut self, value: &Analog, index: u16, mode: EventMode) -> bool;

    /// Update a counter.
    fn update_counter(&mut self, value: &Counter, index: u16, mode: EventMode) -> bool;

    /// Update a binary output status.
    fn update_binary_output_status(
        &mut self,
        value: &BinaryOutputStatus,
        index: u16,
        mode: EventMode,
    ) -> bool;

    /// Update an analog output status.
    fn update_analog_output_status(
        &mut self,
        value: &AnalogOutputStatus,
        index: u16,
        mode: EventMode,
    ) -> bool;

    /// Update an octet string.
    fn update_octet_string(&mut self, value: &OctetString, index: u16, mode: EventMode) -> bool;

    /// Update a time-and-interval point.
    fn update_time_and_interval(&mut self, value: &TimeAndInterval, index: u16) -> bool;

    /// Copy a counter into its frozen counter, optionally clearing the counter.
    fn freeze_counter(&mut self, index: u16, clear: bool, mode: EventMode) -> bool;

    /// Set the flags of every existing point in `start..=stop`.
    ///
    /// Points that exist are modified even when others in the range are
    /// missing; the result is true only if the whole range existed.
    fn modify(&mut self, kind: FlagsType, start: u16, stop: u16, flags: Flags) -> bool;
}

/// Configuration and current value of one point.
///
/// Point types without events or deadbands use `()` for those parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointConfig<M, S, E = (), D = ()> {
    /// Variation reported in static responses
    pub static_variation: S,
    /// Variation reported for events
    pub event_variation: E,
    /// Event class
    pub class: PointClass,
    /// Change threshold for event detection
    pub deadband: D,
    /// Current value (initial value until updated)
    pub value: M,
}

impl<M, S, E, D> PointConfig<M, S, E, D>
where
    S: Default,
    E: Default,
    D: Default,
{
    /// Create a point with default variations and class.
    pub fn new(value: M) -> Self {
        Self {
            static_variation: S::default(),
            event_variation: E::default(),
            class: PointClass::default(),
            deadband: D::default(),
            value,
        }
    }
}

impl<M, S, E, D> PointConfig<M, S, E, D> {
    /// Set the event class.
    pub fn class(mut self, class: PointClass) -> Self {
        self.class = class;
        self
    }

    /// Set the static variation.
    pub fn static_variation(mut self, variation: S) -> Self {
        self.static_variation = variation;
        self
    }

    /// Set the event variation.
    pub fn event_variation(mut self, variation: E) -> Self {
        self.event_variation = variation;
        self
    }

    /// Set the deadband.
    pub fn deadband(mut self, deadband: D) -> Self {
        self.deadband = deadband;
        self
    }
}

/// Binary input point
pub type BinaryConfig = PointConfig<Binary, StaticBinaryVariation, EventBinaryVariation>;
/// Double-bit binary input point
pub type DoubleBitBinaryConfig =
    PointConfig<DoubleBitBinary, StaticDoubleBitBinaryVariation, EventDoubleBitBinaryVariation>;
/// Analog input point
pub type AnalogConfig = PointConfig<Analog, StaticAnalogVariation, EventAnalogVariation, f64>;
/// Counter point
pub type CounterConfig = PointConfig<Counter, StaticCounterVariation, EventCounterVariation, u32>;
/// Frozen counter point
pub type FrozenCounterConfig =
    PointConfig<FrozenCounter, StaticFrozenCounterVariation, EventFrozenCounterVariation, u32>;
/// Binary output status point
pub type BinaryOutputStatusConfig = PointConfig<
    BinaryOutputStatus,
    StaticBinaryOutputStatusVariation,
    EventBinaryOutputStatusVariation,
>;
/// Analog output status point
pub type AnalogOutputStatusConfig = PointConfig<
    AnalogOutputStatus,
    StaticAnalogOutputStatusVariation,
    EventAnalogOutputStatusVariation,
    f64,
>;
/// Octet string point
pub type OctetStringConfig =
    PointConfig<OctetString, StaticOctetStringVariation, EventOctetStringVariation>;
/// Time-and-interval point (static only)
pub type TimeAndIntervalConfig = PointConfig<TimeAndInterval, StaticTimeAndIntervalVariation>;

/// Points of an outstation, per type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseConfig {
    /// Binary inputs
    pub binary_input: BTreeMap<u16, BinaryConfig>,
    /// Double-bit binary inputs
    pub double_binary: BTreeMap<u16, DoubleBitBinaryConfig>,
    /// Analog inputs
    pub analog_input: BTreeMap<u16, AnalogConfig>,
    /// Counters
    pub counter: BTreeMap<u16, CounterConfig>,
    /// Frozen counters
    pub frozen_counter: BTreeMap<u16, FrozenCounterConfig>,
    /// Binary output status
    pub binary_output_status: BTreeMap<u16, BinaryOutputStatusConfig>,
    /// Analog output status
    pub analog_output_status: BTreeMap<u16, AnalogOutputStatusConfig>,
    /// Octet strings
    pub octet_string: BTreeMap<u16, OctetStringConfig>,
    /// Time-and-interval points
    pub time_and_interval: BTreeMap<u16, TimeAndIntervalConfig>,
}

impl DatabaseConfig {
    /// Create `count` default points (indices `0..count`) of every type.
    pub fn uniform(count: u16) -> Self {
        fn points<T: Default>(count: u16) -> BTreeMap<u16, T> {
            (0..count).map(|i| (i, T::default())).collect()
        }

        Self {
            binary_input: points(count),
            double_binary: points(count),
            analog_input: points(count),
            counter: points(count),
            frozen_counter: points(count),
            binary_output_status: points(count),
            analog_output_status: points(count),
            octet_string: points(count),
            time_and_interval: points(count),
        }
    }

    /// Copy a counter into the frozen counter with the same index.
    ///
    /// The frozen counter is created on first use, inheriting the counter's
    /// class, deadband and matching variations. Clearing resets the
    /// counter's value and time but keeps its flags. Returns the frozen
    /// value, or `None` if the counter does not exist.
    pub fn freeze_counter(&mut self, index: u16, clear: bool) -> Option<FrozenCounter> {
        let counter = self.counter.get_mut(&index)?;
        let frozen = FrozenCounter::new(counter.value.value, counter.value.flags);

        match self.frozen_counter.get_mut(&index) {
            Some(existing) => existing.value = frozen,
            None => {
                self.frozen_counter.insert(
                    index,
                    FrozenCounterConfig {
                        static_variation: counter.static_variation.into(),
                        event_variation: counter.event_variation.into(),
                        class: counter.class,
                        deadband: counter.deadband,
                        value: frozen,
                    },
                );
            }
        }

        if clear {
            counter.value.value = 0;
            counter.value.time = DnpTime::default();
        }

        Some(frozen)
    }

    /// Set flags over an inclusive index range. See [`UpdateHandler::modify`].
    pub fn modify(&mut self, kind: FlagsType, start: u16, stop: u16, flags: Flags) -> bool {
        match kind {
            FlagsType::BinaryInput => modify_flags(&mut self.binary_input, start, stop, flags),
            FlagsType::DoubleBinaryInput => {
                modify_flags(&mut self.double_binary, start, stop, flags)
            }
            FlagsType::AnalogInput => modify_flags(&mut self.analog_input, start, stop, flags),
            FlagsType::Counter => modify_flags(&mut self.counter, start, stop, flags),
            FlagsType::FrozenCounter => modify_flags(&mut self.frozen_counter, start, stop, flags),
            FlagsType::BinaryOutputStatus => {
                modify_flags(&mut self.binary_output_status, start, stop, flags)
            }
            FlagsType::AnalogOutputStatus => {
                modify_flags(&mut self.analog_output_status, start, stop, flags)
            }
        }
    }

    /// Total number of configured points.
    pub fn len(&self) -> usize {
        self.binary_input.len()
            + self.double_binary.len()
            + self.analog_input.len()
            + self.counter.len()
            + self.frozen_counter.len()
            + self.binary_output_status.len()
            + self.analog_output_status.len()
            + self.octet_string.len()
            + self.time_and_interval.len()
    }

    /// Check if no point is configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn modify_flags<M, S, E, D>(
    points: &mut BTreeMap<u16, PointConfig<M, S, E, D>>,
    start: u16,
    stop: u16,
    flags: Flags,
) -> bool
where
    M: Measurement,
{
    let mut success = true;
    for index in start..=stop {
        match points.get_mut(&index) {
            Some(point) => point.value.set_flags(flags),
            None => success = false,
        }
    }
    success
}

fn overwrite<M: Clone, S, E, D>(
    points: &mut BTreeMap<u16, PointConfig<M, S, E, D>>,
    index: u16,
    value: &M,
) -> bool {
    match points.get_mut(&index) {
        Some(point) => {
            point.value = value.clone();
            true
        }
        None => false,
    }
}

/// Measurement snapshot shared by the sessions of one shared outstation.
///
/// Values are overwritten whatever the event mode: the snapshot only
/// seeds new sessions, which do their own event detection.
#[derive(Debug, Clone, Default)]
pub struct SharedDatabaseConfig {
    config: DatabaseConfig,
}

impl SharedDatabaseConfig {
    /// Wrap an initial configuration.
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    /// Current configuration and values.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Copy of the current configuration, used to seed a new session.
    pub fn snapshot(&self) -> DatabaseConfig {
        self.config.clone()
    }
}

impl UpdateHandler for SharedDatabaseConfig {
    fn update_binary(&mut self, value: &Binary, index: u16, _mode: EventMode) -> bool {
        overwrite(&mut self.config.binary_input, index, value)
    }

    fn update_double_bit_binary(
        &mut self,
        value: &DoubleBitBinary,
        index: u16,
        _mode: EventMode,
    ) -> bool {
        overwrite(&mut self.config.double_binary, index, value)
    }

    fn update_analog(&mut self, value: &Analog, index: u16, _mode: EventMode) -> bool {
        overwrite(&mut self.config.analog_input, index, value)
    }

    fn update_counter(&mut self, value: &Counter, index: u16, _mode: EventMode) -> bool {
        overwrite(&mut self.config.counter, index, value)
    }

    fn update_binary_output_status(
        &mut self,
        value: &BinaryOutputStatus,
        index: u16,
        _mode: EventMode,
    ) -> bool {
        overwrite(&mut self.config.binary_output_status, index, value)
    }

    fn update_analog_output_status(
        &mut self,
        value: &AnalogOutputStatus,
        index: u16,
        _mode: EventMode,
    ) -> bool {
        overwrite(&mut self.config.analog_output_status, index, value)
    }

    fn update_octet_string(&mut self, value: &OctetString, index: u16, _mode: EventMode) -> bool {
        overwrite(&mut self.config.octet_string, index, value)
    }

    fn update_time_and_interval(&mut self, value: &TimeAndInterval, index: u16) -> bool {
        overwrite(&mut self.config.time_and_interval, index, value)
    }

    fn freeze_counter(&mut self, index: u16, clear: bool, _mode: EventMode) -> bool {
        self.config.freeze_counter(index, clear).is_some()
    }

    fn modify(&mut self, kind: FlagsType, start: u16, stop: u16, flags: Flags) -> bool {
        self.config.modify(kind, start, stop, flags)
    }
}

/// Change detection against a point's deadband.
trait Detect<D> {
    fn is_change(&self, old: &Self, deadband: &D) -> bool;
}

macro_rules! detect_exact {
    ($($ty:ty),+) => {
        $(
            impl Detect<()> for $ty {
                fn is_change(&self, old: &Self, _deadband: &()) -> bool {
                    self.value != old.value || self.flags != old.flags
                }
            }
        )+
    };
}

detect_exact!(Binary, DoubleBitBinary, BinaryOutputStatus);

impl Detect<f64> for Analog {
    fn is_change(&self, old: &Self, deadband: &f64) -> bool {
        self.flags != old.flags || (self.value - old.value).abs() > *deadband
    }
}

impl Detect<f64> for AnalogOutputStatus {
    fn is_change(&self, old: &Self, deadband: &f64) -> bool {
        self.flags != old.flags || (self.value - old.value).abs() > *deadband
    }
}

impl Detect<u32> for Counter {
    fn is_change(&self, old: &Self, deadband: &u32) -> bool {
        self.flags != old.flags || self.value.abs_diff(old.value) > *deadband
    }
}

impl Detect<u32> for FrozenCounter {
    fn is_change(&self, old: &Self, deadband: &u32) -> bool {
        self.flags != old.flags || self.value.abs_diff(old.value) > *deadband
    }
}

impl Detect<()> for OctetString {
    fn is_change(&self, old: &Self, _deadband: &()) -> bool {
        self != old
    }
}

/// Database of one live session.
///
/// Applies [`EventMode`] semantics and counts the events each update
/// produces. Points in class 0 never produce events.
#[derive(Debug, Clone, Default)]
pub struct SessionDatabase {
    config: DatabaseConfig,
    num_events: u64,
}

impl SessionDatabase {
    /// Seed from a configuration snapshot.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            num_events: 0,
        }
    }

    /// Current configuration and values.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Events produced since creation.
    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    fn record(&mut self, event: Option<bool>) -> bool {
        match event {
            Some(event) => {
                if event {
                    self.num_events += 1;
                }
                true
            }
            None => false,
        }
    }
}

/// Apply `value` under `mode`. Returns whether an event was produced, or
/// `None` if the point does not exist.
fn update_with_mode<M, S, E, D>(
    points: &mut BTreeMap<u16, PointConfig<M, S, E, D>>,
    index: u16,
    value: &M,
    mode: EventMode,
) -> Option<bool>
where
    M: Clone + Detect<D>,
{
    let point = points.get_mut(&index)?;

    let event = point.class.generates_events()
        && match mode {
            EventMode::Detect => value.is_change(&point.value, &point.deadband),
            EventMode::Force | EventMode::EventOnly => true,
            EventMode::Suppress => false,
        };

    if mode.updates_static() {
        point.value = value.clone();
    }

    Some(event)
}

impl UpdateHandler for SessionDatabase {
    fn update_binary(&mut self, value: &Binary, index: u16, mode: EventMode) -> bool {
        let event = update_with_mode(&mut self.config.binary_input, index, value, mode);
        self.record(event)
    }

    fn update_double_bit_binary(
        &mut self,
        value: &DoubleBitBinary,
        index: u16,
        mode: EventMode,
    ) -> bool {
        let event = update_with_mode(&mut self.config.double_binary, index, value, mode);
        self.record(event)
    }

    fn update_analog(&mut self, value: &Analog, index: u16, mode: EventMode) -> bool {
        let event = update_with_mode(&mut self.config.analog_input, index, value, mode);
        self.record(event)
    }

    fn update_counter(&mut self, value: &Counter, index: u16, mode: EventMode) -> bool {
        let event = update_with_mode(&mut self.config.counter, index, value, mode);
        self.record(event)
    }

    fn update_binary_output_status(
        &mut self,
        value: &BinaryOutputStatus,
        index: u16,
        mode: EventMode,
    ) -> bool {
        let event = update_with_mode(&mut self.config.binary_output_status, index, value, mode);
        self.record(event)
    }

    fn update_analog_output_status(
        &mut self,
        value: &AnalogOutputStatus,
        index: u16,
        mode: EventMode,
    ) -> bool {
        let event = update_with_mode(&mut self.config.analog_output_status, index, value, mode);
        self.record(event)
    }

    fn update_octet_string(&mut self, value: &OctetString, index: u16, mode: EventMode) -> bool {
        let event = update_with_mode(&mut self.config.octet_string, index, value, mode);
        self.record(event)
    }

    fn update_time_and_interval(&mut self, value: &TimeAndInterval, index: u16) -> bool {
        overwrite(&mut self.config.time_and_interval, index, value)
    }

    fn freeze_counter(&mut self, index: u16, clear: bool, mode: EventMode) -> bool {
        let previous = self
            .config
            .frozen_counter
            .get(&index)
            .map(|point| point.value);

        let Some(frozen) = self.config.freeze_counter(index, clear) else {
            return false;
        };

        let (class, deadband) = self
            .config
            .frozen_counter
            .get(&index)
            .map(|point| (point.class, point.deadband))
            .unwrap_or_default();

        let event = class.generates_events()
            && match (mode, previous) {
                (EventMode::Detect, Some(previous)) => frozen.is_change(&previous, &deadband),
                (EventMode::Suppress, _) => false,
                _ => true,
            };
        self.record(Some(event))
    }

    fn modify(&mut self, kind: FlagsType, start: u16, stop: u16, flags: Flags) -> bool {
        self.config.modify(kind, start, stop, flags)
    }
}
