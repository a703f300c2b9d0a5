//! Measurement types stored in the outstation database.
//!
//! Every flag-bearing measurement carries a value, quality [`Flags`] and a
//! [`DnpTime`]. Octet strings and time-and-interval points carry neither.

use bytes::Bytes;

use super::Flags;

/// Quality of a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimestampQuality {
    /// Time is synchronized with the master
    Synchronized,
    /// Time is not synchronized
    Unsynchronized,
    /// No time is available
    #[default]
    Invalid,
}

/// DNP3 timestamp: milliseconds since the UNIX epoch, 48 bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DnpTime {
    value: u64,
    quality: TimestampQuality,
}

impl DnpTime {
    /// Largest representable timestamp.
    pub const MAX_VALUE: u64 = (1 << 48) - 1;

    /// Create a timestamp. The value is truncated to 48 bits.
    #[inline]
    pub const fn new(value: u64, quality: TimestampQuality) -> Self {
        Self {
            value: value & Self::MAX_VALUE,
            quality,
        }
    }

    /// Create a synchronized timestamp.
    #[inline]
    pub const fn synchronized(value: u64) -> Self {
        Self::new(value, TimestampQuality::Synchronized)
    }

    /// Milliseconds since the epoch.
    #[inline]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Timestamp quality.
    #[inline]
    pub const fn quality(&self) -> TimestampQuality {
        self.quality
    }

    /// Check if the timestamp carries a time.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        !matches!(self.quality, TimestampQuality::Invalid)
    }
}

/// Double-bit binary state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DoubleBit {
    /// Transitioning between states
    Intermediate = 0,
    /// Off
    DeterminedOff = 1,
    /// On
    DeterminedOn = 2,
    /// Abnormal or custom condition
    #[default]
    Indeterminate = 3,
}

impl DoubleBit {
    /// Create from the two low bits of a byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Intermediate,
            1 => Self::DeterminedOff,
            2 => Self::DeterminedOn,
            _ => Self::Indeterminate,
        }
    }

    /// Convert to raw value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for DoubleBit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Intermediate => "INTERMEDIATE",
            Self::DeterminedOff => "DETERMINED_OFF",
            Self::DeterminedOn => "DETERMINED_ON",
            Self::Indeterminate => "INDETERMINATE",
        };
        write!(f, "{}", s)
    }
}

/// Access to the flags of a flag-bearing measurement.
pub trait Measurement {
    /// Current flags
    fn flags(&self) -> Flags;

    /// Replace the flags
    fn set_flags(&mut self, flags: Flags);
}

macro_rules! measurement {
    ($(#[$doc:meta])* $name:ident, $value:ty, $default:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct $name {
            /// Value
            pub value: $value,
            /// Quality flags
            pub flags: Flags,
            /// Timestamp
            pub time: DnpTime,
        }

        impl $name {
            /// Create with the given value and flags, without a timestamp.
            #[inline]
            pub const fn new(value: $value, flags: Flags) -> Self {
                Self {
                    value,
                    flags,
                    time: DnpTime::new(0, TimestampQuality::Invalid),
                }
            }

            /// Create with a timestamp.
            #[inline]
            pub const fn with_time(value: $value, flags: Flags, time: DnpTime) -> Self {
                Self { value, flags, time }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($default, Flags::RESTART)
            }
        }

        impl Measurement for $name {
            fn flags(&self) -> Flags {
                self.flags
            }

            fn set_flags(&mut self, flags: Flags) {
                self.flags = flags;
            }
        }
    };
}

measurement!(
    /// Binary input (group 1/2)
    Binary,
    bool,
    false
);
measurement!(
    /// Double-bit binary input (group 3/4)
    DoubleBitBinary,
    DoubleBit,
    DoubleBit::Indeterminate
);
measurement!(
    /// Analog input (group 30/32)
    Analog,
    f64,
    0.0
);
measurement!(
    /// Running counter (group 20/22)
    Counter,
    u32,
    0
);
measurement!(
    /// Frozen counter (group 21/23)
    FrozenCounter,
    u32,
    0
);
measurement!(
    /// Binary output status (group 10/11)
    BinaryOutputStatus,
    bool,
    false
);
measurement!(
    /// Analog output status (group 40/42)
    AnalogOutputStatus,
    f64,
    0.0
);

/// Octet string (group 110/111). Between 1 and 255 bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OctetString {
    value: Bytes,
}

impl OctetString {
    /// Maximum length of an octet string.
    pub const MAX_LENGTH: usize = 255;

    /// Create an octet string. Returns `None` for an empty or oversized value.
    pub fn new(value: impl Into<Bytes>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() || value.len() > Self::MAX_LENGTH {
            return None;
        }
        Some(Self { value })
    }

    /// Contents
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

impl Default for OctetString {
    fn default() -> Self {
        Self {
            value: Bytes::from_static(&[0]),
        }
    }
}

/// Time-and-interval point (group 50 variation 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeAndInterval {
    /// Start time
    pub time: DnpTime,
    /// Interval count
    pub interval: u32,
    /// Interval units code
    pub units: u8,
}

impl TimeAndInterval {
    /// Create a time-and-interval value.
    #[inline]
    pub const fn new(time: DnpTime, interval: u32, units: u8) -> Self {
        Self {
            time,
            interval,
            units,
        }
    }
}
