//! Configuration for managers, shared servers and outstations.

use std::net::{SocketAddr, ToSocketAddrs};
#[cfg(feature = "tls")]
use std::path::PathBuf;
use std::time::Duration;

use crate::database::DatabaseConfig;
use crate::error::{Dnp3Error, Result};
use crate::types::Addresses;

/// Default DNP3 TCP port
pub const DEFAULT_PORT: u16 = 20000;

/// Default outstation link address
pub const DEFAULT_LOCAL_ADDR: u16 = 1024;

/// Default master link address
pub const DEFAULT_REMOTE_ADDR: u16 = 1;

/// Default link keep-alive timeout (seconds)
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: u64 = 60;

/// Default link response timeout (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT: u64 = 1000;

/// Default maximum fragment size, both directions
pub const DEFAULT_MAX_FRAG_SIZE: usize = 2048;

/// Smallest fragment size that can hold a minimal response
pub const MIN_FRAG_SIZE: usize = 249;

/// Default application confirm timeout (seconds)
pub const DEFAULT_CONFIRM_TIMEOUT: u64 = 5;

/// Default maximum number of controls in one request
pub const DEFAULT_MAX_CONTROLS_PER_REQUEST: u16 = 16;

/// Link layer configuration of one outstation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Outstation's own link address
    pub local_addr: u16,
    /// Master's link address
    pub remote_addr: u16,
    /// Period of inactivity before a link status request is sent
    pub keep_alive_timeout: Duration,
    /// Timeout for confirmed link frames
    pub response_timeout: Duration,
    /// Use confirmed user data
    pub use_confirms: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_ADDR, DEFAULT_REMOTE_ADDR)
    }
}

impl LinkConfig {
    /// Create a link configuration for the given address pair.
    pub fn new(local_addr: u16, remote_addr: u16) -> Self {
        Self {
            local_addr,
            remote_addr,
            keep_alive_timeout: Duration::from_secs(DEFAULT_KEEP_ALIVE_TIMEOUT),
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT),
            use_confirms: false,
        }
    }

    /// Set keep-alive timeout.
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Set response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set confirmed user data.
    pub fn use_confirms(mut self, enabled: bool) -> Self {
        self.use_confirms = enabled;
        self
    }

    /// Route this configuration binds to, as seen on received frames.
    #[inline]
    pub fn addresses(&self) -> Addresses {
        Addresses::new(self.remote_addr, self.local_addr)
    }
}

/// Application layer configuration of one outstation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstationConfig {
    /// Largest fragment accepted from the master
    pub max_rx_frag_size: usize,
    /// Largest fragment sent to the master
    pub max_tx_frag_size: usize,
    /// Timeout for solicited confirms
    pub solicited_confirm_timeout: Duration,
    /// Timeout for unsolicited confirms
    pub unsolicited_confirm_timeout: Duration,
    /// Allow unsolicited reporting
    pub allow_unsolicited: bool,
    /// Maximum controls accepted in one request
    pub max_controls_per_request: u16,
}

impl Default for OutstationConfig {
    fn default() -> Self {
        Self {
            max_rx_frag_size: DEFAULT_MAX_FRAG_SIZE,
            max_tx_frag_size: DEFAULT_MAX_FRAG_SIZE,
            solicited_confirm_timeout: Duration::from_secs(DEFAULT_CONFIRM_TIMEOUT),
            unsolicited_confirm_timeout: Duration::from_secs(DEFAULT_CONFIRM_TIMEOUT),
            allow_unsolicited: false,
            max_controls_per_request: DEFAULT_MAX_CONTROLS_PER_REQUEST,
        }
    }
}

impl OutstationConfig {
    /// Set both fragment sizes.
    pub fn frag_size(mut self, size: usize) -> Self {
        self.max_rx_frag_size = size;
        self.max_tx_frag_size = size;
        self
    }

    /// Set unsolicited reporting.
    pub fn allow_unsolicited(mut self, enabled: bool) -> Self {
        self.allow_unsolicited = enabled;
        self
    }

    /// Check the configuration for values the stack cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_rx_frag_size < MIN_FRAG_SIZE || self.max_tx_frag_size < MIN_FRAG_SIZE {
            return Err(Dnp3Error::invalid_config(format!(
                "fragment size must be at least {} bytes",
                MIN_FRAG_SIZE
            )));
        }
        if self.max_controls_per_request == 0 {
            return Err(Dnp3Error::invalid_config(
                "max_controls_per_request must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Complete configuration of an outstation added to a shared channel.
#[derive(Debug, Clone, Default)]
pub struct OutstationStackConfig {
    /// Application layer settings
    pub outstation: OutstationConfig,
    /// Link layer settings (route)
    pub link: LinkConfig,
    /// Initial point configuration and values
    pub database: DatabaseConfig,
}

impl OutstationStackConfig {
    /// Create a configuration with the given database.
    pub fn new(database: DatabaseConfig) -> Self {
        Self {
            database,
            ..Default::default()
        }
    }

    /// Set link layer settings.
    pub fn link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Set application layer settings.
    pub fn outstation(mut self, outstation: OutstationConfig) -> Self {
        self.outstation = outstation;
        self
    }
}

/// Host and port of a listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpEndpoint {
    /// Host name or IP address
    pub address: String,
    /// TCP port
    pub port: u16,
}

impl IpEndpoint {
    /// Create an endpoint.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Loopback endpoint. Port 0 lets the OS pick a free port.
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    /// Listen on every interface.
    pub fn any(port: u16) -> Self {
        Self::new("0.0.0.0", port)
    }

    /// Resolve to the first matching socket address.
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| Dnp3Error::invalid_endpoint(self.to_string()))?
            .next()
            .ok_or_else(|| Dnp3Error::invalid_endpoint(self.to_string()))
    }
}

impl Default for IpEndpoint {
    fn default() -> Self {
        Self::any(DEFAULT_PORT)
    }
}

impl std::fmt::Display for IpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// TLS material for a shared server.
#[cfg(feature = "tls")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM file holding the certificate chain
    pub certificate_path: PathBuf,
    /// PEM file holding the private key
    pub private_key_path: PathBuf,
}

#[cfg(feature = "tls")]
impl TlsConfig {
    /// Create a TLS configuration from PEM files.
    pub fn new(certificate_path: impl Into<PathBuf>, private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
        }
    }
}

/// Configuration of a shared TCP (or TLS) server channel.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Local endpoint to listen on
    pub endpoint: IpEndpoint,
    /// Accept TLS instead of plain TCP
    #[cfg(feature = "tls")]
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    /// Plain TCP server on the given endpoint.
    pub fn new(endpoint: IpEndpoint) -> Self {
        Self {
            endpoint,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Accept TLS connections.
    #[cfg(feature = "tls")]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Configuration of a [`Dnp3Manager`](crate::Dnp3Manager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Runtime worker threads driving socket I/O
    pub worker_threads: usize,
    /// Name prefix of runtime threads
    pub thread_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            thread_name: "dnp3".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Set the number of worker threads.
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Dnp3Error::invalid_config("worker_threads must be non-zero"));
        }
        Ok(())
    }
}
