//! Entry point: owns the runtime and every channel created from it.

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::channel::{Acceptor, SharedTcpServer, SharedTcpServerChannel};
use crate::config::{ManagerConfig, ServerConfig};
use crate::error::{Dnp3Error, Result};
use crate::executor::Executor;
use crate::logging::{LogLevels, Logger};
use crate::resource::ResourceManager;

/// Root object of the stack.
///
/// Socket I/O runs on a tokio runtime owned by the manager; every channel
/// additionally gets its own [`Executor`] on which all of its state lives.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use voltage_dnp3::{
///     DatabaseConfig, DefaultOutstationApplication, Dnp3Manager, IpEndpoint, LinkConfig,
///     LogLevels, ManagerConfig, NullCommandHandler, Outstation, OutstationStackConfig,
///     ServerConfig,
/// };
///
/// let manager = Dnp3Manager::new(ManagerConfig::default())?;
/// let channel = manager.add_shared_tcp_server(
///     "server",
///     LogLevels::NORMAL,
///     ServerConfig::new(IpEndpoint::any(20000)),
/// )?;
///
/// let outstation = channel
///     .add_outstation(
///         "outstation",
///         Arc::new(NullCommandHandler),
///         Arc::new(DefaultOutstationApplication),
///         OutstationStackConfig::new(DatabaseConfig::uniform(10)).link(LinkConfig::new(1024, 1)),
///     )
///     .expect("channel is running");
/// outstation.enable();
/// # Ok::<(), voltage_dnp3::Dnp3Error>(())
/// ```
pub struct Dnp3Manager {
    thread_name: String,
    runtime: Option<Runtime>,
    resources: Arc<ResourceManager>,
}

impl Dnp3Manager {
    /// Build the runtime.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;

        Ok(Self {
            thread_name: config.thread_name,
            runtime: Some(runtime),
            resources: ResourceManager::create(),
        })
    }

    /// Listen on `config.endpoint` and multiplex shared outstations over
    /// every accepted connection.
    ///
    /// Fails with [`Dnp3Error::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub fn add_shared_tcp_server(
        &self,
        id: impl Into<String>,
        levels: LogLevels,
        config: ServerConfig,
    ) -> Result<Arc<SharedTcpServerChannel>> {
        if self.resources.is_shutting_down() {
            return Err(Dnp3Error::ShuttingDown);
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or(Dnp3Error::ShuttingDown)?
            .handle()
            .clone();

        let id = id.into();
        let logger = Logger::new(id.clone(), levels);
        let acceptor = Self::acceptor(&config)?;
        let executor = Executor::new(format!("{}-{}", self.thread_name, id))?;

        // the listener shares the channel's filter
        let server = SharedTcpServer::bind(
            logger.clone(),
            &config.endpoint,
            acceptor,
            executor.clone(),
            runtime,
        )?;

        let manager = Arc::downgrade(&self.resources);
        let listener = server.clone();
        let channel = self
            .resources
            .bind(move || Some(SharedTcpServerChannel::new(logger, executor, manager, listener)));

        let Some(channel) = channel else {
            server.shutdown();
            return Err(Dnp3Error::ShuttingDown);
        };

        channel.start();
        Ok(channel)
    }

    /// Shut down every channel. Idempotent.
    pub fn shutdown(&self) {
        self.resources.shutdown();
    }

    /// Check if shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.resources.is_shutting_down()
    }

    /// Number of channels alive.
    pub fn num_channels(&self) -> usize {
        self.resources.len()
    }

    #[cfg(feature = "tls")]
    fn acceptor(config: &ServerConfig) -> Result<Acceptor> {
        match &config.tls {
            Some(tls) => Acceptor::tls(tls),
            None => Ok(Acceptor::Plain),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn acceptor(_config: &ServerConfig) -> Result<Acceptor> {
        Ok(Acceptor::Plain)
    }
}

impl Drop for Dnp3Manager {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Dnp3Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dnp3Manager")
            .field("thread_name", &self.thread_name)
            .field("channels", &self.resources.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
