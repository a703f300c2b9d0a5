//! DNP3 measurement quality flags.

/// Quality flags of a measurement.
///
/// Packed into the single byte carried on the wire. Bit layout:
/// - Bit 0: online
/// - Bit 1: restart
/// - Bit 2: comm_lost
/// - Bit 3: remote_forced
/// - Bit 4: local_forced
/// - Bit 5: chatter filter (binary) / rollover (counter) / over range (analog)
/// - Bit 6: discontinuity (counter) / reference error (analog)
/// - Bit 7: state (binary)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Flags(u8);

impl Flags {
    const ONLINE_MASK: u8 = 0b0000_0001;
    const RESTART_MASK: u8 = 0b0000_0010;
    const COMM_LOST_MASK: u8 = 0b0000_0100;
    const REMOTE_FORCED_MASK: u8 = 0b0000_1000;
    const LOCAL_FORCED_MASK: u8 = 0b0001_0000;
    const BIT5_MASK: u8 = 0b0010_0000;
    const BIT6_MASK: u8 = 0b0100_0000;
    const STATE_MASK: u8 = 0b1000_0000;
}

impl Flags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);

    /// Point is online.
    pub const ONLINE: Self = Self(Self::ONLINE_MASK);

    /// Point has not been updated since the device restarted.
    pub const RESTART: Self = Self(Self::RESTART_MASK);

    /// Create from raw byte value.
    #[inline(always)]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Get the raw byte value.
    #[inline(always)]
    pub const fn as_raw(&self) -> u8 {
        self.0
    }

    /// Online
    #[inline(always)]
    pub const fn online(&self) -> bool {
        (self.0 & Self::ONLINE_MASK) != 0
    }

    /// Set online flag
    #[inline(always)]
    pub const fn set_online(self, value: bool) -> Self {
        self.with(Self::ONLINE_MASK, value)
    }

    /// Restart
    #[inline(always)]
    pub const fn restart(&self) -> bool {
        (self.0 & Self::RESTART_MASK) != 0
    }

    /// Set restart flag
    #[inline(always)]
    pub const fn set_restart(self, value: bool) -> Self {
        self.with(Self::RESTART_MASK, value)
    }

    /// Communication with the originating device was lost
    #[inline(always)]
    pub const fn comm_lost(&self) -> bool {
        (self.0 & Self::COMM_LOST_MASK) != 0
    }

    /// Set comm_lost flag
    #[inline(always)]
    pub const fn set_comm_lost(self, value: bool) -> Self {
        self.with(Self::COMM_LOST_MASK, value)
    }

    /// Value forced at a remote device
    #[inline(always)]
    pub const fn remote_forced(&self) -> bool {
        (self.0 & Self::REMOTE_FORCED_MASK) != 0
    }

    /// Set remote_forced flag
    #[inline(always)]
    pub const fn set_remote_forced(self, value: bool) -> Self {
        self.with(Self::REMOTE_FORCED_MASK, value)
    }

    /// Value forced locally
    #[inline(always)]
    pub const fn local_forced(&self) -> bool {
        (self.0 & Self::LOCAL_FORCED_MASK) != 0
    }

    /// Set local_forced flag
    #[inline(always)]
    pub const fn set_local_forced(self, value: bool) -> Self {
        self.with(Self::LOCAL_FORCED_MASK, value)
    }

    /// Type-specific bit 5 (chatter filter, rollover, over range)
    #[inline(always)]
    pub const fn bit5(&self) -> bool {
        (self.0 & Self::BIT5_MASK) != 0
    }

    /// Type-specific bit 6 (discontinuity, reference error)
    #[inline(always)]
    pub const fn bit6(&self) -> bool {
        (self.0 & Self::BIT6_MASK) != 0
    }

    /// Binary state bit
    #[inline(always)]
    pub const fn state(&self) -> bool {
        (self.0 & Self::STATE_MASK) != 0
    }

    #[inline(always)]
    const fn with(mut self, mask: u8, value: bool) -> Self {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
        self
    }
}

impl From<u8> for Flags {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl std::fmt::Debug for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Flags({:#04x})", self.0)
    }
}

impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            return f.write_str("-");
        }

        let names = [
            (Self::ONLINE_MASK, "ONLINE"),
            (Self::RESTART_MASK, "RESTART"),
            (Self::COMM_LOST_MASK, "COMM_LOST"),
            (Self::REMOTE_FORCED_MASK, "REMOTE_FORCED"),
            (Self::LOCAL_FORCED_MASK, "LOCAL_FORCED"),
            (Self::BIT5_MASK, "BIT5"),
            (Self::BIT6_MASK, "BIT6"),
            (Self::STATE_MASK, "STATE"),
        ];

        let mut first = true;
        for (mask, name) in names {
            if (self.0 & mask) != 0 {
                if !first {
                    f.write_str("|")?;
                }
                first = false;
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_accessors() {
        let flags = Flags::EMPTY.set_online(true).set_comm_lost(true);
        assert!(flags.online());
        assert!(flags.comm_lost());
        assert!(!flags.restart());
        assert_eq!(flags.as_raw(), 0x05);

        let flags = flags.set_online(false);
        assert!(!flags.online());
        assert_eq!(flags.as_raw(), 0x04);
    }

    #[test]
    fn test_flags_from_raw() {
        let flags = Flags::from(0x81);
        assert!(flags.online());
        assert!(flags.state());
        assert!(!flags.bit5());
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(Flags::EMPTY.to_string(), "-");
        assert_eq!(Flags::ONLINE.to_string(), "ONLINE");
        assert_eq!(Flags::from_raw(0x03).to_string(), "ONLINE|RESTART");
    }
}
