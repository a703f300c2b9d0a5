//! Static and event variations, and point classes.
//!
//! A variation selects the object format an outstation reports for a point.
//! Frozen counters created by a freeze inherit the variations of their
//! source counter through the `From` conversions defined here.

/// Event class a point is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PointClass {
    /// Static data only, never generates events
    Class0 = 0,
    /// Event class 1
    #[default]
    Class1 = 1,
    /// Event class 2
    Class2 = 2,
    /// Event class 3
    Class3 = 3,
}

impl PointClass {
    /// Convert to raw value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if points of this class generate events.
    #[inline]
    pub const fn generates_events(&self) -> bool {
        !matches!(self, Self::Class0)
    }
}

macro_rules! variations {
    ($(#[$doc:meta])* $name:ident { $($(#[$vdoc:meta])* $variant:ident = ($group:expr, $var:expr)),+ $(,)? } default $default:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vdoc])* $variant),+
        }

        impl $name {
            /// Object group number.
            #[inline]
            pub const fn group(&self) -> u8 {
                match self {
                    $(Self::$variant => $group),+
                }
            }

            /// Variation number within the group.
            #[inline]
            pub const fn variation(&self) -> u8 {
                match self {
                    $(Self::$variant => $var),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "g{}v{}", self.group(), self.variation())
            }
        }
    };
}

variations!(
    /// Static binary input variation
    StaticBinaryVariation {
        /// Packed format
        Group1Var1 = (1, 1),
        /// With flags
        Group1Var2 = (1, 2),
    } default Group1Var2
);

variations!(
    /// Binary input event variation
    EventBinaryVariation {
        /// Without time
        Group2Var1 = (2, 1),
        /// With absolute time
        Group2Var2 = (2, 2),
        /// With relative time
        Group2Var3 = (2, 3),
    } default Group2Var1
);

variations!(
    /// Static double-bit binary variation
    StaticDoubleBitBinaryVariation {
        /// Packed format
        Group3Var1 = (3, 1),
        /// With flags
        Group3Var2 = (3, 2),
    } default Group3Var2
);

variations!(
    /// Double-bit binary event variation
    EventDoubleBitBinaryVariation {
        /// Without time
        Group4Var1 = (4, 1),
        /// With absolute time
        Group4Var2 = (4, 2),
        /// With relative time
        Group4Var3 = (4, 3),
    } default Group4Var1
);

variations!(
    /// Static analog input variation
    StaticAnalogVariation {
        /// 32-bit with flag
        Group30Var1 = (30, 1),
        /// 16-bit with flag
        Group30Var2 = (30, 2),
        /// 32-bit without flag
        Group30Var3 = (30, 3),
        /// 16-bit without flag
        Group30Var4 = (30, 4),
        /// Single-precision float with flag
        Group30Var5 = (30, 5),
        /// Double-precision float with flag
        Group30Var6 = (30, 6),
    } default Group30Var1
);

variations!(
    /// Analog input event variation
    EventAnalogVariation {
        /// 32-bit without time
        Group32Var1 = (32, 1),
        /// 16-bit without time
        Group32Var2 = (32, 2),
        /// 32-bit with time
        Group32Var3 = (32, 3),
        /// 16-bit with time
        Group32Var4 = (32, 4),
        /// Single-precision float without time
        Group32Var5 = (32, 5),
        /// Double-precision float without time
        Group32Var6 = (32, 6),
        /// Single-precision float with time
        Group32Var7 = (32, 7),
        /// Double-precision float with time
        Group32Var8 = (32, 8),
    } default Group32Var1
);

variations!(
    /// Static counter variation
    StaticCounterVariation {
        /// 32-bit with flag
        Group20Var1 = (20, 1),
        /// 16-bit with flag
        Group20Var2 = (20, 2),
        /// 32-bit without flag
        Group20Var5 = (20, 5),
        /// 16-bit without flag
        Group20Var6 = (20, 6),
    } default Group20Var1
);

variations!(
    /// Counter event variation
    EventCounterVariation {
        /// 32-bit with flag
        Group22Var1 = (22, 1),
        /// 16-bit with flag
        Group22Var2 = (22, 2),
        /// 32-bit with flag and time
        Group22Var5 = (22, 5),
        /// 16-bit with flag and time
        Group22Var6 = (22, 6),
    } default Group22Var1
);

variations!(
    /// Static frozen counter variation
    StaticFrozenCounterVariation {
        /// 32-bit with flag
        Group21Var1 = (21, 1),
        /// 16-bit with flag
        Group21Var2 = (21, 2),
        /// 32-bit with flag and time
        Group21Var5 = (21, 5),
        /// 16-bit with flag and time
        Group21Var6 = (21, 6),
        /// 32-bit without flag
        Group21Var9 = (21, 9),
        /// 16-bit without flag
        Group21Var10 = (21, 10),
    } default Group21Var1
);

variations!(
    /// Frozen counter event variation
    EventFrozenCounterVariation {
        /// 32-bit with flag
        Group23Var1 = (23, 1),
        /// 16-bit with flag
        Group23Var2 = (23, 2),
        /// 32-bit with flag and time
        Group23Var5 = (23, 5),
        /// 16-bit with flag and time
        Group23Var6 = (23, 6),
    } default Group23Var1
);

variations!(
    /// Static binary output status variation
    StaticBinaryOutputStatusVariation {
        /// With flags
        Group10Var2 = (10, 2),
    } default Group10Var2
);

variations!(
    /// Binary output status event variation
    EventBinaryOutputStatusVariation {
        /// Without time
        Group11Var1 = (11, 1),
        /// With time
        Group11Var2 = (11, 2),
    } default Group11Var1
);

variations!(
    /// Static analog output status variation
    StaticAnalogOutputStatusVariation {
        /// 32-bit with flag
        Group40Var1 = (40, 1),
        /// 16-bit with flag
        Group40Var2 = (40, 2),
        /// Single-precision float with flag
        Group40Var3 = (40, 3),
        /// Double-precision float with flag
        Group40Var4 = (40, 4),
    } default Group40Var1
);

variations!(
    /// Analog output status event variation
    EventAnalogOutputStatusVariation {
        /// 32-bit without time
        Group42Var1 = (42, 1),
        /// 16-bit without time
        Group42Var2 = (42, 2),
        /// 32-bit with time
        Group42Var3 = (42, 3),
        /// 16-bit with time
        Group42Var4 = (42, 4),
        /// Single-precision float without time
        Group42Var5 = (42, 5),
        /// Double-precision float without time
        Group42Var6 = (42, 6),
        /// Single-precision float with time
        Group42Var7 = (42, 7),
        /// Double-precision float with time
        Group42Var8 = (42, 8),
    } default Group42Var1
);

variations!(
    /// Static octet string variation
    StaticOctetStringVariation {
        /// Length given by the variation byte
        Group110Var0 = (110, 0),
    } default Group110Var0
);

variations!(
    /// Octet string event variation
    EventOctetStringVariation {
        /// Length given by the variation byte
        Group111Var0 = (111, 0),
    } default Group111Var0
);

variations!(
    /// Static time-and-interval variation
    StaticTimeAndIntervalVariation {
        /// Indexed absolute time and long interval
        Group50Var4 = (50, 4),
    } default Group50Var4
);

impl From<StaticCounterVariation> for StaticFrozenCounterVariation {
    fn from(variation: StaticCounterVariation) -> Self {
        match variation {
            StaticCounterVariation::Group20Var1 => Self::Group21Var1,
            StaticCounterVariation::Group20Var2 => Self::Group21Var2,
            StaticCounterVariation::Group20Var5 => Self::Group21Var5,
            StaticCounterVariation::Group20Var6 => Self::Group21Var6,
        }
    }
}

impl From<EventCounterVariation> for EventFrozenCounterVariation {
    fn from(variation: EventCounterVariation) -> Self {
        match variation {
            EventCounterVariation::Group22Var1 => Self::Group23Var1,
            EventCounterVariation::Group22Var2 => Self::Group23Var2,
            EventCounterVariation::Group22Var5 => Self::Group23Var5,
            EventCounterVariation::Group22Var6 => Self::Group23Var6,
        }
    }
}
