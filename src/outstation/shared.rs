//! Outstation multiplexed over every connection of a shared channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{CommandHandler, Outstation, OutstationApplication, OutstationStack};
use crate::channel::{ConnectionCallback, HandlerId, IoHandler};
use crate::config::OutstationStackConfig;
use crate::database::{DatabaseConfig, SharedDatabaseConfig};
use crate::executor::Executor;
use crate::logging::{LogLevels, Logger};
use crate::resource::{Resource, ResourceManager};
use crate::types::{Addresses, StackStatistics};
use crate::updates::Updates;

/// One outstation route served on every connection of a shared channel.
///
/// Each accepted connection gets its own [`OutstationStack`], created from
/// this outstation's configuration and the latest measurement snapshot,
/// and bound into the connection under [`route`](Self::route). Operations
/// of the [`Outstation`] contract are forwarded to every live stack.
///
/// State is mutated only on the channel's executor.
pub struct SharedOutstation {
    weak_self: Weak<Self>,
    logger: Logger,
    executor: Executor,
    command_handler: Arc<dyn CommandHandler>,
    application: Arc<dyn OutstationApplication>,
    config: OutstationStackConfig,
    route: Addresses,
    manager: Mutex<Weak<ResourceManager>>,
    resources: Arc<ResourceManager>,
    has_shutdown: AtomicBool,
    state: Mutex<State>,
}

struct State {
    enabled: bool,
    log_levels: LogLevels,
    database: SharedDatabaseConfig,
    outstations: HashMap<HandlerId, Arc<OutstationStack>>,
}

/// What is left to tear down once shutdown has begun.
struct Children {
    outstations: Vec<Arc<OutstationStack>>,
    resources: Arc<ResourceManager>,
}

impl Children {
    fn shutdown(self) {
        for outstation in self.outstations {
            Outstation::shutdown(outstation.as_ref());
        }
        self.resources.shutdown();
    }
}

impl SharedOutstation {
    /// Create a shared outstation.
    ///
    /// `manager` is the registry that created it; the outstation detaches
    /// itself from it on shutdown. The database of `config` becomes the
    /// initial measurement snapshot.
    pub fn new(
        logger: Logger,
        executor: Executor,
        command_handler: Arc<dyn CommandHandler>,
        application: Arc<dyn OutstationApplication>,
        manager: Weak<ResourceManager>,
        mut config: OutstationStackConfig,
    ) -> Arc<Self> {
        let database = SharedDatabaseConfig::new(std::mem::take(&mut config.database));
        let log_levels = logger.filters();

        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            logger,
            executor,
            command_handler,
            application,
            route: config.link.addresses(),
            config,
            manager: Mutex::new(manager),
            resources: ResourceManager::create(),
            has_shutdown: AtomicBool::new(false),
            state: Mutex::new(State {
                enabled: false,
                log_levels,
                database,
                outstations: HashMap::new(),
            }),
        })
    }

    /// Route matched against incoming connections.
    pub fn route(&self) -> Addresses {
        self.route
    }

    /// Logger id.
    pub fn id(&self) -> &str {
        self.logger.id()
    }

    /// Check if the outstation is enabled.
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Check if shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.has_shutdown.load(Ordering::SeqCst)
    }

    /// Current log filter.
    pub fn log_filters(&self) -> LogLevels {
        self.state.lock().log_levels
    }

    /// Number of live per-connection stacks.
    pub fn num_sessions(&self) -> usize {
        self.state.lock().outstations.len()
    }

    /// Stacks currently bound, one per connection.
    pub fn sessions(&self) -> Vec<Arc<OutstationStack>> {
        self.state.lock().outstations.values().cloned().collect()
    }

    /// Copy of the measurement snapshot new sessions start from.
    pub fn database(&self) -> DatabaseConfig {
        self.state.lock().database.snapshot()
    }

    fn take_children(&self) -> Option<Children> {
        if self.has_shutdown.swap(true, Ordering::SeqCst) {
            return None;
        }

        let outstations = std::mem::take(&mut self.state.lock().outstations);
        Some(Children {
            outstations: outstations.into_values().collect(),
            resources: self.resources.clone(),
        })
    }

    fn shutdown_impl(&self) {
        if let Some(children) = self.take_children() {
            children.shutdown();
        }
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return false;
        };

        self.executor
            .return_from(move || {
                let outstations = {
                    let mut state = this.state.lock();
                    if state.enabled == enabled {
                        return true;
                    }
                    state.enabled = enabled;
                    state.outstations.values().cloned().collect::<Vec<_>>()
                };

                for outstation in outstations {
                    if enabled {
                        outstation.enable();
                    } else {
                        outstation.disable();
                    }
                }
                true
            })
            .unwrap_or(false)
    }

    fn post<F>(&self, task: F)
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        if let Some(this) = self.weak_self.upgrade() {
            self.executor.post(move || task(this.as_ref()));
        }
    }
}

impl Outstation for SharedOutstation {
    fn enable(&self) -> bool {
        self.set_enabled(true)
    }

    fn disable(&self) -> bool {
        self.set_enabled(false)
    }

    fn shutdown(&self) {
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

    fn stack_statistics(&self) -> StackStatistics {
        if self.is_shutdown() {
            return StackStatistics::default();
        }
        let Some(this) = self.weak_self.upgrade() else {
            return StackStatistics::default();
        };

        self.executor
            .return_from(move || {
                this.sessions()
                    .iter()
                    .map(|outstation| outstation.stack_statistics())
                    .sum::<StackStatistics>()
            })
            .unwrap_or_default()
    }

    fn set_log_filters(&self, filters: LogLevels) {
        self.post(move |this| {
            this.state.lock().log_levels = filters;
            this.logger.set_filters(filters);
            for outstation in this.sessions() {
                outstation.set_log_filters(filters);
            }
        });
    }

    fn set_restart_iin(&self) {
        self.post(|this| {
            for outstation in this.sessions() {
                outstation.set_restart_iin();
            }
        });
    }

    fn apply(&self, updates: &Updates) {
        if self.is_shutdown() || updates.is_empty() {
            return;
        }

        let updates = updates.clone();
        self.post(move |this| {
            // the snapshot first, so sessions created later start from it
            let outstations = {
                let mut state = this.state.lock();
                updates.apply(&mut state.database);
                state.outstations.values().cloned().collect::<Vec<_>>()
            };

            for outstation in outstations {
                outstation.apply(&updates);
            }
        });
    }
}

impl ConnectionCallback for SharedOutstation {
    fn on_connect(&self, handler: Arc<dyn IoHandler>, remote_addr: &str) {
        if self.is_shutdown() {
            return;
        }

        let (database, log_levels, enabled) = {
            let state = self.state.lock();
            (state.database.snapshot(), state.log_levels, state.enabled)
        };

        let mut config = self.config.clone();
        config.database = database;

        let logger = self
            .logger
            .detach(format!("{}-{}", self.logger.id(), remote_addr));
        let executor = self.executor.clone();
        let command_handler = self.command_handler.clone();
        let application = self.application.clone();
        let manager = Arc::downgrade(&self.resources);
        let route = self.route;
        let iohandler = handler.clone();

        let created = self.resources.bind(move || {
            let stack = OutstationStack::new(
                logger,
                executor,
                command_handler,
                application,
                Arc::downgrade(&iohandler),
                manager,
                config,
            );
            iohandler.add_context(stack.clone(), route).then_some(stack)
        });

        let Some(stack) = created else {
            self.logger.error(format_args!(
                "Create outstation for {} failed (route {})",
                remote_addr, route
            ));
            handler.shutdown();
            return;
        };

        self.logger.log(
            LogLevels::EVENT,
            format_args!("Create outstation for {} successfully", remote_addr),
        );
        self.state
            .lock()
            .outstations
            .insert(handler.id(), stack.clone());

        stack.set_log_filters(log_levels);
        if enabled {
            stack.enable();
        }
    }

    fn on_disconnect(&self, handler: &Arc<dyn IoHandler>, remote_addr: &str) {
        let Some(stack) = self.state.lock().outstations.remove(&handler.id()) else {
            return;
        };

        Outstation::shutdown(stack.as_ref());
        self.logger.log(
            LogLevels::EVENT,
            format_args!("Release outstation for {}", remote_addr),
        );
    }
}

impl Resource for SharedOutstation {
    fn shutdown(&self) {
        Outstation::shutdown(self);
    }
}

impl Drop for SharedOutstation {
    fn drop(&mut self) {
        if let Some(children) = self.take_children() {
            self.executor
                .block_until_or_inline(move || children.shutdown());
        }
    }
}

impl std::fmt::Debug for SharedOutstation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedOutstation")
            .field("id", &self.logger.id())
            .field("route", &self.route)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
