//! Channel that multiplexes shared outstations over one listener.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{ConnectionCallback, HandlerId, IoHandler, SharedTcpServer};
use crate::config::OutstationStackConfig;
use crate::error::{Dnp3Error, Result};
use crate::executor::Executor;
use crate::logging::{LogLevels, Logger};
use crate::outstation::{CommandHandler, Outstation, OutstationApplication, SharedOutstation};
use crate::resource::{Resource, ResourceManager};
use crate::types::LinkStatistics;

/// Server channel whose every connection is offered to every outstation.
///
/// The channel tracks the live connections of its [`SharedTcpServer`] and
/// the [`SharedOutstation`]s added to it. A connection is announced to the
/// outstations in the order they were added; an outstation added later is
/// replayed every connection that is already open.
///
/// Created by [`Dnp3Manager::add_shared_tcp_server`](crate::Dnp3Manager::add_shared_tcp_server).
pub struct SharedTcpServerChannel {
    weak_self: Weak<Self>,
    logger: Logger,
    executor: Executor,
    local_addr: SocketAddr,
    manager: Mutex<Weak<ResourceManager>>,
    resources: Arc<ResourceManager>,
    server: Mutex<Option<Arc<SharedTcpServer>>>,
    has_shutdown: AtomicBool,
    state: Mutex<State>,
}

struct State {
    log_levels: LogLevels,
    outstations: Vec<Weak<SharedOutstation>>,
    iohandlers: HashMap<HandlerId, (Arc<dyn IoHandler>, String)>,
}

impl State {
    /// Live outstations in registration order, pruning expired entries.
    fn outstations(&mut self) -> Vec<Arc<SharedOutstation>> {
        let mut live = Vec::with_capacity(self.outstations.len());
        self.outstations.retain(|weak| match weak.upgrade() {
            Some(outstation) => {
                live.push(outstation);
                true
            }
            None => false,
        });
        live
    }

    fn iohandlers(&self) -> Vec<(Arc<dyn IoHandler>, String)> {
        self.iohandlers.values().cloned().collect()
    }
}

/// What is left to tear down once shutdown has begun.
struct Children {
    server: Option<Arc<SharedTcpServer>>,
    outstations: Vec<Arc<SharedOutstation>>,
    iohandlers: Vec<Arc<dyn IoHandler>>,
    resources: Arc<ResourceManager>,
}

impl Children {
    fn shutdown(self) {
        if let Some(server) = self.server {
            server.shutdown();
        }
        for outstation in self.outstations {
            Outstation::shutdown(outstation.as_ref());
        }
        for iohandler in self.iohandlers {
            iohandler.shutdown();
        }
        self.resources.shutdown();
    }
}

impl SharedTcpServerChannel {
    /// Create a channel around a bound, not yet started, server.
    ///
    /// `manager` is the registry that created the channel; the channel
    /// detaches itself from it on shutdown.
    pub fn new(
        logger: Logger,
        executor: Executor,
        manager: Weak<ResourceManager>,
        server: Arc<SharedTcpServer>,
    ) -> Arc<Self> {
        let log_levels = logger.filters();
        let local_addr = server.local_addr();

        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            logger,
            executor,
            local_addr,
            manager: Mutex::new(manager),
            resources: ResourceManager::create(),
            server: Mutex::new(Some(server)),
            has_shutdown: AtomicBool::new(false),
            state: Mutex::new(State {
                log_levels,
                outstations: Vec::new(),
                iohandlers: HashMap::new(),
            }),
        })
    }

    /// Start accepting connections. Returns false if already started or
    /// shut down.
    pub fn start(&self) -> bool {
        let Some(server) = self.server.lock().clone() else {
            return false;
        };
        let callback: Weak<dyn ConnectionCallback> = self.weak_self.clone();
        server.start(callback)
    }

    /// Logger id.
    pub fn id(&self) -> &str {
        self.logger.id()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.has_shutdown.load(Ordering::SeqCst)
    }

    /// Number of live connections.
    pub fn num_connections(&self) -> usize {
        self.state.lock().iohandlers.len()
    }

    /// Number of registered outstations that are still alive.
    pub fn num_outstations(&self) -> usize {
        self.state.lock().outstations().len()
    }

    /// Shut down the listener, every outstation and every connection.
    ///
    /// Runs on the executor and returns once teardown is complete.
    /// Idempotent.
    pub fn shutdown(&self) {
        let Some(this) = self.weak_self.upgrade() else {
            self.shutdown_impl();
            return;
        };

        self.executor.block_until_or_inline(move || {
            this.shutdown_impl();
            let manager = std::mem::take(&mut *this.manager.lock());
            if let Some(manager) = manager.upgrade() {
                manager.detach(this.as_ref());
            }
        });
    }

    /// Sum of the link statistics of every live connection.
    pub fn statistics(&self) -> LinkStatistics {
        let Some(this) = self.weak_self.upgrade() else {
            return LinkStatistics::default();
        };

        self.executor
            .return_from(move || {
                let handlers = this.state.lock().iohandlers();
                handlers
                    .iter()
                    .map(|(iohandler, _)| iohandler.statistics())
                    .sum::<LinkStatistics>()
            })
            .unwrap_or_default()
    }

    /// Counters of the listener itself: connections that failed before
    /// reaching a handler, such as TLS handshake failures.
    pub fn listener_statistics(&self) -> LinkStatistics {
        self.server
            .lock()
            .as_ref()
            .map(|server| server.statistics())
            .unwrap_or_default()
    }

    /// Log filter applied to the channel and its outstations.
    pub fn log_filters(&self) -> LogLevels {
        let Some(this) = self.weak_self.upgrade() else {
            return self.logger.filters();
        };
        self.executor
            .return_from(move || this.state.lock().log_levels)
            .unwrap_or_else(|_| self.logger.filters())
    }

    /// Change the log filter of the channel and every outstation.
    pub fn set_log_filters(&self, filters: LogLevels) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };

        self.executor.post(move || {
            let outstations = {
                let mut state = this.state.lock();
                state.log_levels = filters;
                state.outstations()
            };
            this.logger.set_filters(filters);
            for outstation in outstations {
                outstation.set_log_filters(filters);
            }
        });
    }

    /// Add an outstation serving the route of `config.link`.
    ///
    /// Returns `None` once the channel has begun shutdown or if the
    /// configuration is invalid. Every connection already open is
    /// announced to the new outstation before it is returned.
    pub fn add_outstation(
        &self,
        id: impl Into<String>,
        command_handler: Arc<dyn CommandHandler>,
        application: Arc<dyn OutstationApplication>,
        config: OutstationStackConfig,
    ) -> Option<Arc<SharedOutstation>> {
        if self.is_shutdown() {
            return None;
        }
        let this = self.weak_self.upgrade()?;
        let id = id.into();

        self.executor
            .return_from(move || this.add_outstation_impl(id, command_handler, application, config))
            .ok()
            .flatten()
    }

    /// Masters cannot share a server channel.
    pub fn add_master(&self, id: &str) -> Result<Infallible> {
        self.logger
            .warn(format_args!("Rejected master {}: not supported", id));
        Err(Dnp3Error::NoMasterSupport)
    }

    fn add_outstation_impl(
        &self,
        id: String,
        command_handler: Arc<dyn CommandHandler>,
        application: Arc<dyn OutstationApplication>,
        config: OutstationStackConfig,
    ) -> Option<Arc<SharedOutstation>> {
        if let Err(e) = config.outstation.validate() {
            self.logger
                .error(format_args!("Rejected outstation {}: {}", id, e));
            return None;
        }

        let logger = self.logger.detach(format!("{} {}", self.logger.id(), id));
        let executor = self.executor.clone();
        let manager = Arc::downgrade(&self.resources);
        let outstation = self.resources.bind(move || {
            Some(SharedOutstation::new(
                logger,
                executor,
                command_handler,
                application,
                manager,
                config,
            ))
        })?;

        let (log_levels, iohandlers) = {
            let mut state = self.state.lock();
            state.outstations.push(Arc::downgrade(&outstation));
            (state.log_levels, state.iohandlers())
        };
        outstation.set_log_filters(log_levels);

        self.logger.log(
            LogLevels::EVENT,
            format_args!("Added outstation {} on route {}", id, outstation.route()),
        );

        for (iohandler, remote_addr) in iohandlers {
            outstation.on_connect(iohandler, &remote_addr);
        }
        Some(outstation)
    }

    fn take_children(&self) -> Option<Children> {
        if self.has_shutdown.swap(true, Ordering::SeqCst) {
            return None;
        }

        let (outstations, iohandlers) = {
            let mut state = self.state.lock();
            let outstations = state.outstations();
            state.outstations.clear();
            let iohandlers = std::mem::take(&mut state.iohandlers);
            (outstations, iohandlers)
        };

        Some(Children {
            server: self.server.lock().take(),
            outstations,
            iohandlers: iohandlers.into_values().map(|(h, _)| h).collect(),
            resources: self.resources.clone(),
        })
    }

    fn shutdown_impl(&self) {
        if let Some(children) = self.take_children() {
            self.logger.log(LogLevels::EVENT, format_args!("shutdown"));
            children.shutdown();
        }
    }
}

impl ConnectionCallback for SharedTcpServerChannel {
    fn on_connect(&self, handler: Arc<dyn IoHandler>, remote_addr: &str) {
        if self.is_shutdown() {
            handler.shutdown();
            return;
        }

        let outstations = self.state.lock().outstations();
        for outstation in outstations {
            outstation.on_connect(handler.clone(), remote_addr);
        }

        self.state
            .lock()
            .iohandlers
            .insert(handler.id(), (handler, remote_addr.to_string()));
    }

    fn on_disconnect(&self, handler: &Arc<dyn IoHandler>, remote_addr: &str) {
        let outstations = {
            let mut state = self.state.lock();
            if state.iohandlers.remove(&handler.id()).is_none() {
                return;
            }
            state.outstations()
        };

        for outstation in outstations {
            outstation.on_disconnect(handler, remote_addr);
        }
        handler.shutdown();
    }
}

impl Resource for SharedTcpServerChannel {
    fn shutdown(&self) {
        SharedTcpServerChannel::shutdown(self);
    }
}

impl Drop for SharedTcpServerChannel {
    fn drop(&mut self) {
        if let Some(children) = self.take_children() {
            self.executor
                .block_until_or_inline(move || children.shutdown());
        }
    }
}

impl std::fmt::Debug for SharedTcpServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTcpServerChannel")
            .field("id", &self.logger.id())
            .field("local_addr", &self.local_addr)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Acceptor;
    use crate::config::{IpEndpoint, LinkConfig};
    use crate::database::DatabaseConfig;
    use crate::outstation::{DefaultOutstationApplication, NullCommandHandler};
    use crate::testing::MockIoHandler;
    use crate::types::Addresses;
    use tokio::runtime::Handle;

    fn channel(name: &str) -> (Arc<SharedTcpServerChannel>, Arc<ResourceManager>) {
        let executor = Executor::new(name).unwrap();
        let logger = Logger::new(name, LogLevels::ALL);
        let server = SharedTcpServer::bind(
            logger.clone(),
            &IpEndpoint::localhost(0),
            Acceptor::Plain,
            executor.clone(),
            Handle::current(),
        )
        .unwrap();

        let manager = ResourceManager::create();
        let weak = Arc::downgrade(&manager);
        let channel = manager
            .bind(|| Some(SharedTcpServerChannel::new(logger, executor, weak, server)))
            .unwrap();
        (channel, manager)
    }

    fn add(channel: &SharedTcpServerChannel, id: &str, local_addr: u16) -> Option<Arc<SharedOutstation>> {
        channel.add_outstation(
            id,
            Arc::new(NullCommandHandler),
            Arc::new(DefaultOutstationApplication),
            OutstationStackConfig::new(DatabaseConfig::uniform(4))
                .link(LinkConfig::new(local_addr, 1)),
        )
    }

    fn connect(channel: &Arc<SharedTcpServerChannel>, handler: &Arc<MockIoHandler>) {
        let channel = channel.clone();
        let handler: Arc<dyn IoHandler> = handler.clone();
        channel
            .executor
            .clone()
            .block_until(move || {
                let remote = handler.remote_addr().to_string();
                channel.on_connect(handler, &remote);
            })
            .unwrap();
    }

    fn disconnect(channel: &Arc<SharedTcpServerChannel>, handler: &Arc<MockIoHandler>) {
        let channel = channel.clone();
        let handler: Arc<dyn IoHandler> = handler.clone();
        channel
            .executor
            .clone()
            .block_until(move || {
                let remote = handler.remote_addr().to_string();
                channel.on_disconnect(&handler, &remote);
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_connections_are_tracked_once() {
        let (channel, _manager) = channel("channel-track");
        let a = MockIoHandler::new("10.0.0.1:4000");
        let b = MockIoHandler::new("10.0.0.2:4000");

        connect(&channel, &a);
        connect(&channel, &b);
        assert_eq!(channel.num_connections(), 2);

        disconnect(&channel, &a);
        disconnect(&channel, &a);
        assert_eq!(channel.num_connections(), 1);
        assert_eq!(a.shutdown_count(), 1);

        disconnect(&channel, &b);
        assert_eq!(channel.num_connections(), 0);
        assert_eq!(b.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_outstations_share_every_connection() {
        let (channel, _manager) = channel("channel-fanout");
        let first = add(&channel, "first", 10).unwrap();
        let second = add(&channel, "second", 20).unwrap();

        let handlers: Vec<_> = (0..3)
            .map(|i| MockIoHandler::new(format!("10.0.0.{}:4000", i)))
            .collect();
        for handler in &handlers {
            connect(&channel, handler);
        }

        assert_eq!(first.num_sessions(), 3);
        assert_eq!(second.num_sessions(), 3);
        for handler in &handlers {
            assert_eq!(
                handler.routes(),
                vec![Addresses::new(1, 10), Addresses::new(1, 20)]
            );
        }

        // an outstation added later is replayed the open connections
        let third = add(&channel, "third", 30).unwrap();
        assert_eq!(third.num_sessions(), 3);
        assert!(third.id().ends_with(" third"));

        disconnect(&channel, &handlers[0]);
        assert_eq!(first.num_sessions(), 2);
        assert_eq!(second.num_sessions(), 2);
        assert_eq!(third.num_sessions(), 2);
        assert_eq!(handlers[0].shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_add_outstation_rejects_invalid_config() {
        let (channel, _manager) = channel("channel-invalid");
        let config = OutstationStackConfig::default()
            .outstation(crate::config::OutstationConfig::default().frag_size(10));
        let added = channel.add_outstation(
            "bad",
            Arc::new(NullCommandHandler),
            Arc::new(DefaultOutstationApplication),
            config,
        );
        assert!(added.is_none());
        assert_eq!(channel.num_outstations(), 0);
    }

    #[tokio::test]
    async fn test_add_master_is_unsupported() {
        let (channel, _manager) = channel("channel-master");
        let err = channel.add_master("master").unwrap_err();
        assert!(matches!(err, Dnp3Error::NoMasterSupport));
    }

    #[tokio::test]
    async fn test_log_filters_propagate() {
        let (channel, _manager) = channel("channel-filters");
        assert_eq!(channel.log_filters(), LogLevels::ALL);
        let outstation = add(&channel, "os", 10).unwrap();

        channel.set_log_filters(LogLevels::NORMAL);
        assert_eq!(channel.log_filters(), LogLevels::NORMAL);
        // the outstation's own update was posted behind the channel's
        channel.executor.block_until(|| ()).unwrap();
        assert_eq!(outstation.log_filters(), LogLevels::NORMAL);

        // later outstations start from the channel filter
        let later = add(&channel, "later", 20).unwrap();
        channel.executor.block_until(|| ()).unwrap();
        assert_eq!(later.log_filters(), LogLevels::NORMAL);
    }

    #[tokio::test]
    async fn test_statistics_sum_connections() {
        let (channel, _manager) = channel("channel-stats");
        assert_eq!(channel.statistics(), LinkStatistics::default());

        let a = MockIoHandler::new("10.0.0.1:4000");
        let b = MockIoHandler::new("10.0.0.2:4000");
        a.set_statistics(LinkStatistics {
            num_open: 1,
            num_bytes_rx: 10,
            ..Default::default()
        });
        b.set_statistics(LinkStatistics {
            num_open: 1,
            num_bytes_rx: 5,
            ..Default::default()
        });
        connect(&channel, &a);
        connect(&channel, &b);

        let stats = channel.statistics();
        assert_eq!(stats.num_open, 2);
        assert_eq!(stats.num_bytes_rx, 15);
        assert_eq!(channel.listener_statistics(), LinkStatistics::default());

        disconnect(&channel, &a);
        disconnect(&channel, &b);
        assert_eq!(channel.statistics(), LinkStatistics::default());
    }

    #[tokio::test]
    async fn test_shutdown_is_exactly_once() {
        let (channel, manager) = channel("channel-shutdown");
        let outstation = add(&channel, "os", 10).unwrap();
        let handler = MockIoHandler::new("10.0.0.1:4000");
        connect(&channel, &handler);
        let stack = outstation.sessions().pop().unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let channel = channel.clone();
                std::thread::spawn(move || channel.shutdown())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(channel.is_shutdown());
        assert!(outstation.is_shutdown());
        assert!(stack.is_shutdown());
        assert_eq!(handler.shutdown_count(), 1);
        assert_eq!(channel.num_connections(), 0);
        assert!(manager.is_empty());
        assert!(!channel.start());

        // nothing has effect afterwards
        assert!(add(&channel, "late", 20).is_none());
        let late = MockIoHandler::new("10.0.0.9:4000");
        connect(&channel, &late);
        assert_eq!(channel.num_connections(), 0);
        assert_eq!(late.shutdown_count(), 1);
        assert_eq!(channel.statistics(), LinkStatistics::default());
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let (channel, manager) = channel("channel-drop");
        let outstation = add(&channel, "os", 10).unwrap();
        let handler = MockIoHandler::new("10.0.0.1:4000");
        connect(&channel, &handler);

        assert!(manager.detach(channel.as_ref()));
        drop(channel);

        assert!(outstation.is_shutdown());
        assert_eq!(handler.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_tears_down_after_executor_stops() {
        let (channel, manager) = channel("channel-dead-strand");
        let outstation = add(&channel, "os", 10).unwrap();
        let handler = MockIoHandler::new("10.0.0.1:4000");
        connect(&channel, &handler);
        let stack = outstation.sessions().pop().unwrap();
        let local_addr = channel.local_addr();

        channel.executor.post(|| panic!("task failure stops the strand"));
        assert!(channel.executor.return_from(|| ()).is_err());

        assert!(manager.detach(channel.as_ref()));
        drop(channel);

        assert!(outstation.is_shutdown());
        assert!(stack.is_shutdown());
        assert_eq!(handler.shutdown_count(), 1);
        assert!(handler.routes().is_empty());
        std::net::TcpListener::bind(local_addr).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_after_executor_stops() {
        let (channel, manager) = channel("channel-dead-shutdown");
        let handler = MockIoHandler::new("10.0.0.1:4000");
        connect(&channel, &handler);

        channel.executor.post(|| panic!("task failure stops the strand"));
        assert!(channel.executor.return_from(|| ()).is_err());

        channel.shutdown();
        assert!(channel.is_shutdown());
        assert_eq!(handler.shutdown_count(), 1);
        assert!(manager.is_empty());
    }
}
