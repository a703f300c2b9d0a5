//! DNP3 type definitions.
//!
//! This module contains the value types shared by the database, the
//! outstations and the channels:
//!
//! - `Flags` - Measurement quality flags
//! - `Binary`, `Analog`, `Counter`, ... - Measurements with flags and time
//! - `StaticBinaryVariation`, ... - Reporting variations and `PointClass`
//! - `LinkStatistics` / `StackStatistics` - Aggregatable counters
//! - `Addresses` - Link address pair (route)

mod flags;
mod measurement;
mod route;
mod statistics;
mod variation;

pub use flags::*;
pub use measurement::*;
pub use route::*;
pub use statistics::*;
pub use variation::*;
