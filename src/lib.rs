//! # voltage_dnp3
//!
//! DNP3 outstation stack with shared-channel session multiplexing.
//!
//! One listening channel accepts any number of masters. Every accepted
//! connection is offered to every outstation registered on the channel;
//! each outstation creates its own protocol stack for that connection,
//! bound under its link address pair, and destroys it when the connection
//! goes away.
//!
//! ## Features
//!
//! - **Shared channels**: many outstations and many connections over one listener
//! - **Serialized state**: each channel's state lives on one executor thread
//! - **Safe teardown**: shutdown, disconnect and drop tear every child down exactly once
//! - **Live snapshots**: new sessions start from the latest measurement values
//! - **TLS**: optional `tls` feature (rustls)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voltage_dnp3::*;
//!
//! fn main() -> voltage_dnp3::Result<()> {
//!     let manager = Dnp3Manager::new(ManagerConfig::default())?;
//!     let channel = manager.add_shared_tcp_server(
//!         "server",
//!         LogLevels::NORMAL,
//!         ServerConfig::new(IpEndpoint::any(20000)),
//!     )?;
//!
//!     let outstation = channel
//!         .add_outstation(
//!             "outstation",
//!             Arc::new(NullCommandHandler),
//!             Arc::new(DefaultOutstationApplication),
//!             OutstationStackConfig::new(DatabaseConfig::uniform(10))
//!                 .link(LinkConfig::new(1024, 1)),
//!         )
//!         .ok_or(Dnp3Error::ShuttingDown)?;
//!     outstation.enable();
//!
//!     // Publish a measurement to every connected master
//!     let updates = UpdateBuilder::new()
//!         .update_analog(Analog::new(12.5, Flags::ONLINE), 0, EventMode::Detect)
//!         .build();
//!     outstation.apply(&updates);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Dnp3Manager
//!  └─ SharedTcpServerChannel ── SharedTcpServer (accepts)
//!      ├─ connections: HandlerId -> IoHandler
//!      └─ SharedOutstation (one per route)
//!          └─ OutstationStack (one per connection)
//! ```
//!
//! A route is the pair of link addresses found on frames from the master:
//! `source` is the master, `destination` the outstation.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod channel;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod logging;
pub mod manager;
pub mod outstation;
pub mod resource;
pub mod types;
pub mod updates;

#[cfg(test)]
mod testing;

// Re-export main types
pub use channel::{
    Acceptor, ChannelState, ConnectionCallback, HandlerId, IoHandler, LinkSession,
    SharedTcpServerChannel,
};
pub use config::{
    IpEndpoint, LinkConfig, ManagerConfig, OutstationConfig, OutstationStackConfig, ServerConfig,
};
#[cfg(feature = "tls")]
pub use config::TlsConfig;
pub use database::{DatabaseConfig, PointConfig, SharedDatabaseConfig, UpdateHandler};
pub use error::{Dnp3Error, Result};
pub use logging::{LogLevels, Logger};
pub use manager::Dnp3Manager;
pub use outstation::{
    CommandHandler, DefaultOutstationApplication, Iin, LinkStatus, NullCommandHandler, Outstation,
    OutstationApplication, OutstationStack, SharedOutstation,
};
pub use types::*;
pub use updates::{EventMode, FlagsType, Update, UpdateBuilder, Updates};
