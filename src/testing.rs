//! Recording doubles shared by the unit tests.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::channel::{
    ChannelListener, ChannelState, ConnectionCallback, HandlerId, IoHandler, LinkSession,
};
use crate::outstation::{CommandHandler, LinkStatus, OutstationApplication};
use crate::types::{Addresses, LinkStatistics};

/// Poll `condition` until it holds; panics after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Blocking [`wait_until`] for tests driving a [`Dnp3Manager`](crate::Dnp3Manager).
pub fn wait_for(condition: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not met in time"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Up,
    Down,
    Read(Bytes),
    WriteComplete(usize),
    WriteError,
}

#[derive(Default)]
pub struct RecordingSession {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSession {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }
}

impl LinkSession for RecordingSession {
    fn on_lower_layer_up(&self) {
        self.events.lock().push(SessionEvent::Up);
    }

    fn on_lower_layer_down(&self) {
        self.events.lock().push(SessionEvent::Down);
    }

    fn on_read_complete(&self, data: &Bytes) {
        self.events.lock().push(SessionEvent::Read(data.clone()));
    }

    fn on_write_complete(&self, result: &io::Result<usize>) {
        let event = match result {
            Ok(len) => SessionEvent::WriteComplete(*len),
            Err(_) => SessionEvent::WriteError,
        };
        self.events.lock().push(event);
    }
}

#[derive(Default)]
pub struct RecordingListener {
    states: Mutex<Vec<ChannelState>>,
}

impl RecordingListener {
    pub fn states(&self) -> Vec<ChannelState> {
        self.states.lock().clone()
    }
}

impl ChannelListener for RecordingListener {
    fn on_state_change(&self, state: ChannelState) {
        self.states.lock().push(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    Connect(HandlerId, String),
    Disconnect(HandlerId, String),
}

#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallback {
    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }
}

impl ConnectionCallback for RecordingCallback {
    fn on_connect(&self, handler: Arc<dyn IoHandler>, remote_addr: &str) {
        self.events
            .lock()
            .push(CallbackEvent::Connect(handler.id(), remote_addr.to_string()));
    }

    fn on_disconnect(&self, handler: &Arc<dyn IoHandler>, remote_addr: &str) {
        self.events
            .lock()
            .push(CallbackEvent::Disconnect(handler.id(), remote_addr.to_string()));
    }
}

/// In-memory I/O handler. Calls sessions back on the calling thread.
pub struct MockIoHandler {
    id: HandlerId,
    remote_addr: String,
    state: Mutex<MockState>,
    shutdowns: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    is_shutdown: bool,
    sessions: BTreeMap<Addresses, Arc<dyn LinkSession>>,
    writes: Vec<(Addresses, Bytes)>,
    statistics: LinkStatistics,
}

impl MockIoHandler {
    pub fn new(remote_addr: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: HandlerId::next(),
            remote_addr: remote_addr.into(),
            state: Mutex::new(MockState::default()),
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub fn routes(&self) -> Vec<Addresses> {
        self.state.lock().sessions.keys().copied().collect()
    }

    pub fn writes(&self) -> Vec<(Addresses, Bytes)> {
        self.state.lock().writes.clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn set_statistics(&self, statistics: LinkStatistics) {
        self.state.lock().statistics = statistics;
    }

    /// Hand `data` to every bound session.
    pub fn deliver(&self, data: Bytes) {
        let sessions: Vec<_> = self.state.lock().sessions.values().cloned().collect();
        for session in sessions {
            session.on_read_complete(&data);
        }
    }
}

impl IoHandler for MockIoHandler {
    fn id(&self) -> HandlerId {
        self.id
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    fn add_context(&self, session: Arc<dyn LinkSession>, route: Addresses) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_shutdown || state.sessions.contains_key(&route) {
                return false;
            }
            state.sessions.insert(route, session.clone());
        }
        session.on_lower_layer_up();
        true
    }

    fn remove_context(&self, route: Addresses) -> bool {
        let session = self.state.lock().sessions.remove(&route);
        match session {
            Some(session) => {
                session.on_lower_layer_down();
                true
            }
            None => false,
        }
    }

    fn write(&self, route: Addresses, data: Bytes) -> bool {
        let mut state = self.state.lock();
        if state.is_shutdown || !state.sessions.contains_key(&route) {
            return false;
        }
        state.writes.push((route, data));
        true
    }

    fn statistics(&self) -> LinkStatistics {
        self.state.lock().statistics
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        let sessions = {
            let mut state = self.state.lock();
            state.is_shutdown = true;
            std::mem::take(&mut state.sessions)
        };
        for session in sessions.into_values() {
            session.on_lower_layer_down();
        }
    }
}

#[derive(Default)]
pub struct RecordingApplication {
    statuses: Mutex<Vec<LinkStatus>>,
}

impl RecordingApplication {
    pub fn statuses(&self) -> Vec<LinkStatus> {
        self.statuses.lock().clone()
    }
}

impl OutstationApplication for RecordingApplication {
    fn on_state_change(&self, status: LinkStatus) {
        self.statuses.lock().push(status);
    }
}

#[derive(Default)]
pub struct CountingCommandHandler {
    begins: AtomicUsize,
    ends: AtomicUsize,
}

impl CountingCommandHandler {
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }
}

impl CommandHandler for CountingCommandHandler {
    fn begin(&self) {
        self.begins.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}
