//! Protocol stack of one outstation session on one connection.

use std::io;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use super::{CommandHandler, Iin, LinkStatus, Outstation, OutstationApplication};
use crate::channel::{IoHandler, LinkSession};
use crate::config::{OutstationConfig, OutstationStackConfig};
use crate::database::SessionDatabase;
use crate::executor::Executor;
use crate::logging::{LogLevels, Logger};
use crate::resource::{Resource, ResourceManager};
use crate::types::{Addresses, StackStatistics};
use crate::updates::Updates;

/// Outstation instance bound to one I/O handler under one route.
///
/// Created by a [`SharedOutstation`](super::SharedOutstation) when a
/// connection arrives. Owns its own database, seeded from the shared
/// snapshot at creation, and reports [`LinkStatus::Reset`] to the
/// application while it is both enabled and bound to an open connection.
pub struct OutstationStack {
    weak_self: Weak<Self>,
    logger: Logger,
    executor: Executor,
    route: Addresses,
    config: OutstationConfig,
    command_handler: Arc<dyn CommandHandler>,
    application: Arc<dyn OutstationApplication>,
    iohandler: Weak<dyn IoHandler>,
    manager: Weak<ResourceManager>,
    state: Mutex<State>,
}

struct State {
    is_shutdown: bool,
    enabled: bool,
    lower_layer_up: bool,
    online: bool,
    iin: Iin,
    database: SessionDatabase,
    statistics: StackStatistics,
}

impl OutstationStack {
    /// Create a stack for `iohandler`. Binding it under [`route`](Self::route)
    /// is left to the caller.
    pub fn new(
        logger: Logger,
        executor: Executor,
        command_handler: Arc<dyn CommandHandler>,
        application: Arc<dyn OutstationApplication>,
        iohandler: Weak<dyn IoHandler>,
        manager: Weak<ResourceManager>,
        config: OutstationStackConfig,
    ) -> Arc<Self> {
        let OutstationStackConfig {
            outstation,
            link,
            database,
        } = config;

        let mut iin = Iin::default();
        iin.set_device_restart(true);

        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            logger,
            executor,
            route: link.addresses(),
            config: outstation,
            command_handler,
            application,
            iohandler,
            manager,
            state: Mutex::new(State {
                is_shutdown: false,
                enabled: false,
                lower_layer_up: false,
                online: false,
                iin,
                database: SessionDatabase::new(database),
                statistics: StackStatistics::default(),
            }),
        })
    }

    /// Route this stack is bound under.
    pub fn route(&self) -> Addresses {
        self.route
    }

    /// Application layer settings.
    pub fn config(&self) -> &OutstationConfig {
        &self.config
    }

    /// Logger of this session.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Current internal indications.
    pub fn iin(&self) -> Iin {
        self.state.lock().iin
    }

    /// Clear IIN1.7, as a master write of the restart bit does.
    pub fn clear_restart_iin(&self) {
        self.state.lock().iin.set_device_restart(false);
    }

    /// Check if the stack is enabled.
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Check if the link is reported as [`LinkStatus::Reset`].
    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Check if the stack has shut down.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().is_shutdown
    }

    /// Run `f` against the session database.
    pub fn with_database<R>(&self, f: impl FnOnce(&SessionDatabase) -> R) -> R {
        f(&self.state.lock().database)
    }

    /// Queue a frame on the I/O handler.
    ///
    /// Returns false unless the stack is online and the handler accepted
    /// the write.
    pub fn transmit(&self, data: Bytes) -> bool {
        if !self.is_online() {
            return false;
        }
        let Some(iohandler) = self.iohandler.upgrade() else {
            return false;
        };

        self.logger
            .log(LogLevels::APP_HEADER_TX, format_args!("{} bytes", data.len()));
        iohandler.write(self.route, data)
    }

    /// Run `task` on the executor and wait for its result.
    ///
    /// Yields `default` once the stack is being dropped or the executor
    /// has stopped.
    fn on_executor<R, F>(&self, default: R, task: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&Self) -> R + Send + 'static,
    {
        if self.executor.is_running_in_thread() {
            return task(self);
        }
        let Some(this) = self.weak_self.upgrade() else {
            return default;
        };
        self.executor
            .return_from(move || task(this.as_ref()))
            .unwrap_or(default)
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_shutdown {
                return false;
            }
            if state.enabled == enabled {
                return true;
            }
            state.enabled = enabled;
        }

        self.logger.log(
            LogLevels::EVENT,
            format_args!("{}", if enabled { "enabled" } else { "disabled" }),
        );
        self.update_link_status();
        true
    }

    fn update_link_status(&self) {
        let status = {
            let mut state = self.state.lock();
            let online = !state.is_shutdown && state.enabled && state.lower_layer_up;
            if online == state.online {
                return;
            }
            state.online = online;
            if online {
                LinkStatus::Reset
            } else {
                LinkStatus::Unreset
            }
        };

        self.logger
            .log(LogLevels::INFO, format_args!("link {}", status));
        self.application.on_state_change(status);
    }

    fn shutdown_impl(&self) {
        {
            let mut state = self.state.lock();
            if state.is_shutdown {
                return;
            }
            state.is_shutdown = true;
        }

        // may call back into on_lower_layer_down
        if let Some(iohandler) = self.iohandler.upgrade() {
            iohandler.remove_context(self.route);
        }
        self.update_link_status();

        if let Some(manager) = self.manager.upgrade() {
            manager.detach(self);
        }
        self.logger.log(LogLevels::EVENT, format_args!("shutdown"));
    }
}

impl Outstation for OutstationStack {
    fn enable(&self) -> bool {
        self.on_executor(false, |this| this.set_enabled(true))
    }

    fn disable(&self) -> bool {
        self.on_executor(false, |this| this.set_enabled(false))
    }

    fn shutdown(&self) {
        match self.weak_self.upgrade() {
            Some(this) => self
                .executor
                .block_until_or_inline(move || this.shutdown_impl()),
            None => self.shutdown_impl(),
        }
    }

    fn stack_statistics(&self) -> StackStatistics {
        self.state.lock().statistics
    }

    fn set_log_filters(&self, filters: LogLevels) {
        self.logger.set_filters(filters);
    }

    fn set_restart_iin(&self) {
        self.on_executor((), |this| {
            this.state.lock().iin.set_device_restart(true);
        });
    }

    fn apply(&self, updates: &Updates) {
        let updates = updates.clone();
        self.on_executor((), move |this| {
            let mut state = this.state.lock();
            if !state.is_shutdown {
                updates.apply(&mut state.database);
            }
        });
    }
}

impl LinkSession for OutstationStack {
    fn on_lower_layer_up(&self) {
        self.state.lock().lower_layer_up = true;
        self.update_link_status();
    }

    fn on_lower_layer_down(&self) {
        self.state.lock().lower_layer_up = false;
        self.update_link_status();
    }

    fn on_read_complete(&self, data: &Bytes) {
        let accepted = {
            let mut state = self.state.lock();
            if state.online {
                state.statistics.num_rx += 1;
                state.statistics.num_rx_bytes += data.len() as u64;
            } else {
                state.statistics.num_rx_discard += 1;
            }
            state.online
        };

        if !accepted {
            self.logger
                .log(LogLevels::DBG, format_args!("discarded {} bytes", data.len()));
            return;
        }

        self.logger
            .log(LogLevels::APP_HEADER_RX, format_args!("{} bytes", data.len()));
        self.command_handler.begin();
        self.command_handler.end();
    }

    fn on_write_complete(&self, result: &io::Result<usize>) {
        let mut state = self.state.lock();
        match result {
            Ok(len) => {
                state.statistics.num_tx += 1;
                state.statistics.num_tx_bytes += *len as u64;
            }
            Err(_) => state.statistics.num_tx_error += 1,
        }
    }
}

impl Resource for OutstationStack {
    fn shutdown(&self) {
        Outstation::shutdown(self);
    }
}

impl std::fmt::Debug for OutstationStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutstationStack")
            .field("id", &self.logger.id())
            .field("route", &self.route)
            .finish()
    }
}
