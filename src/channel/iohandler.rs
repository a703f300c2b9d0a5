//! I/O handler over one accepted stream.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::{ChannelListener, ChannelState, HandlerId, IoHandler, LinkSession};
use crate::executor::Executor;
use crate::logging::{to_hex, LogLevels, Logger};
use crate::types::{Addresses, LinkStatistics};

type WriteRequest = (Addresses, Bytes);

/// [`IoHandler`] driving a TCP or TLS stream.
///
/// A reader task and a writer task run on the tokio runtime; everything
/// they observe is posted to the executor, where sessions are notified.
/// The handler is open from construction until the peer closes the stream
/// (reported to the listener as [`ChannelState::Closed`]) or it is shut
/// down locally ([`ChannelState::Shutdown`]).
pub struct TcpIoHandler {
    id: HandlerId,
    remote_addr: String,
    executor: Executor,
    logger: Logger,
    listener: Arc<dyn ChannelListener>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<WriteRequest>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WriteRequest>>>,
    state: Mutex<State>,
}

struct State {
    channel: ChannelState,
    sessions: BTreeMap<Addresses, Arc<dyn LinkSession>>,
    statistics: LinkStatistics,
}

impl TcpIoHandler {
    /// Create an open handler.
    ///
    /// `listener` receives a weak reference to the handler being built and
    /// returns the observer of its state changes.
    pub fn new<F>(
        remote_addr: impl Into<String>,
        executor: Executor,
        logger: Logger,
        listener: F,
    ) -> Arc<Self>
    where
        F: FnOnce(Weak<dyn IoHandler>) -> Arc<dyn ChannelListener>,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let handler: Weak<dyn IoHandler> = weak.clone();
            Self {
                id: HandlerId::next(),
                remote_addr: remote_addr.into(),
                executor,
                logger,
                listener: listener(handler),
                cancel: CancellationToken::new(),
                tx,
                rx: Mutex::new(Some(rx)),
                state: Mutex::new(State {
                    channel: ChannelState::Open,
                    sessions: BTreeMap::new(),
                    statistics: LinkStatistics {
                        num_open: 1,
                        ..Default::default()
                    },
                }),
            }
        })
    }

    /// Start the reader and writer tasks on the current tokio runtime.
    ///
    /// Has no effect after the first call.
    pub fn start<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };

        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(self.clone().run_reader(read_half));
        tokio::spawn(self.clone().run_writer(write_half, rx));
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        self.state.lock().channel
    }

    async fn run_reader<R>(self: Arc<Self>, read_half: R)
    where
        R: AsyncRead + Send + 'static,
    {
        let mut source = FramedRead::new(Box::pin(read_half), BytesCodec::new());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = source.next() => match item {
                    Some(Ok(buf)) => {
                        let this = self.clone();
                        let data = buf.freeze();
                        if !self.executor.post(move || this.on_read(data)) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        self.logger.warn(format_args!("read error: {}", e));
                        break;
                    }
                    None => break,
                },
            }
        }

        self.cancel.cancel();
        let this = self.clone();
        self.executor.post(move || this.on_closed());
    }

    async fn run_writer<W>(self: Arc<Self>, write_half: W, mut rx: mpsc::UnboundedReceiver<WriteRequest>)
    where
        W: AsyncWrite + Send + 'static,
    {
        let mut sink = FramedWrite::new(Box::pin(write_half), BytesCodec::new());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = rx.recv() => {
                    let Some((route, data)) = request else {
                        break;
                    };

                    // a peer that stops reading must not hold up shutdown
                    let len = data.len();
                    let result = tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        result = sink.send(data) => result.map(|_| len),
                    };
                    let failed = result.is_err();

                    let this = self.clone();
                    self.executor
                        .post(move || this.on_write_complete(route, result));

                    if failed {
                        self.cancel.cancel();
                        break;
                    }
                }
            }
        }
    }

    fn on_read(&self, data: Bytes) {
        let sessions: Vec<_> = {
            let mut state = self.state.lock();
            if state.channel != ChannelState::Open {
                return;
            }
            state.statistics.num_bytes_rx += data.len() as u64;
            state.sessions.values().cloned().collect()
        };

        self.logger
            .log(LogLevels::LINK_RX, format_args!("{} bytes", data.len()));
        if self.logger.is_enabled(LogLevels::LINK_RX_HEX) {
            self.logger
                .log(LogLevels::LINK_RX_HEX, format_args!("{}", to_hex(&data)));
        }

        for session in sessions {
            session.on_read_complete(&data);
        }
    }

    fn on_write_complete(&self, route: Addresses, result: io::Result<usize>) {
        let session = {
            let mut state = self.state.lock();
            if let Ok(len) = result {
                state.statistics.num_bytes_tx += len as u64;
                state.statistics.num_writes += 1;
            }
            state.sessions.get(&route).cloned()
        };

        match &result {
            Ok(len) => self
                .logger
                .log(LogLevels::LINK_TX, format_args!("{} bytes", len)),
            Err(e) => self.logger.warn(format_args!("write error: {}", e)),
        }

        if let Some(session) = session {
            session.on_write_complete(&result);
        }
    }

    fn on_closed(&self) {
        let sessions = {
            let mut state = self.state.lock();
            if state.channel != ChannelState::Open {
                return;
            }
            state.channel = ChannelState::Closed;
            state.statistics.num_close += 1;
            std::mem::take(&mut state.sessions)
        };

        self.logger
            .log(LogLevels::EVENT, format_args!("connection closed by {}", self.remote_addr));

        for session in sessions.into_values() {
            session.on_lower_layer_down();
        }
        self.listener.on_state_change(ChannelState::Closed);
    }
}

impl IoHandler for TcpIoHandler {
    fn id(&self) -> HandlerId {
        self.id
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    fn add_context(&self, session: Arc<dyn LinkSession>, route: Addresses) -> bool {
        {
            let mut state = self.state.lock();
            if state.channel != ChannelState::Open || state.sessions.contains_key(&route) {
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
        {
            let state = self.state.lock();
            if state.channel != ChannelState::Open || !state.sessions.contains_key(&route) {
                return false;
            }
        }

        if self.logger.is_enabled(LogLevels::LINK_TX_HEX) {
            self.logger
                .log(LogLevels::LINK_TX_HEX, format_args!("{}", to_hex(&data)));
        }
        self.tx.send((route, data)).is_ok()
    }

    fn statistics(&self) -> LinkStatistics {
        self.state.lock().statistics
    }

    fn shutdown(&self) {
        let sessions = {
            let mut state = self.state.lock();
            if state.channel == ChannelState::Shutdown {
                return;
            }
            if state.channel == ChannelState::Open {
                state.statistics.num_close += 1;
            }
            state.channel = ChannelState::Shutdown;
            std::mem::take(&mut state.sessions)
        };

        self.cancel.cancel();
        self.logger
            .log(LogLevels::EVENT, format_args!("shutdown {}", self.remote_addr));

        for session in sessions.into_values() {
            session.on_lower_layer_down();
        }
        self.listener.on_state_change(ChannelState::Shutdown);
    }
}

impl std::fmt::Debug for TcpIoHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpIoHandler")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, RecordingListener, RecordingSession, SessionEvent};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn handler(executor: &Executor, listener: &Arc<RecordingListener>) -> Arc<TcpIoHandler> {
        let listener: Arc<dyn ChannelListener> = listener.clone();
        TcpIoHandler::new(
            "127.0.0.1:40000",
            executor.clone(),
            Logger::new("test", LogLevels::ALL),
            move |_| listener,
        )
    }

    #[tokio::test]
    async fn test_reads_are_delivered_to_bound_sessions() {
        let executor = Executor::new("io-read").unwrap();
        let listener = Arc::new(RecordingListener::default());
        let handler = handler(&executor, &listener);

        let mock = tokio_test::io::Builder::new()
            .read(&[0x05, 0x64])
            .read(&[0x01])
            .build();

        let session = Arc::new(RecordingSession::default());
        {
            let handler = handler.clone();
            let session = session.clone();
            executor
                .block_until(move || {
                    assert!(handler.add_context(session, Addresses::new(1024, 1)));
                })
                .unwrap();
        }
        handler.start(mock);

        wait_until(|| listener.states().contains(&ChannelState::Closed)).await;

        let data: Vec<u8> = session
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Read(bytes) => Some(bytes.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, vec![0x05, 0x64, 0x01]);
        assert_eq!(session.events().first(), Some(&SessionEvent::Up));
        assert_eq!(session.events().last(), Some(&SessionEvent::Down));

        let stats = handler.statistics();
        assert_eq!(stats.num_open, 1);
        assert_eq!(stats.num_close, 1);
        assert_eq!(stats.num_bytes_rx, 3);
        assert_eq!(handler.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let executor = Executor::new("io-write").unwrap();
        let listener = Arc::new(RecordingListener::default());
        let handler = handler(&executor, &listener);
        let (local, mut peer) = tokio::io::duplex(64);
        handler.start(local);

        let route = Addresses::new(1024, 1);
        let session = Arc::new(RecordingSession::default());
        {
            let handler = handler.clone();
            let session = session.clone();
            let queued = executor
                .return_from(move || {
                    handler.add_context(session, route);
                    handler.write(route, Bytes::from_static(b"hello"))
                })
                .unwrap();
            assert!(queued);
        }

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        wait_until(|| session.events().contains(&SessionEvent::WriteComplete(5))).await;
        assert_eq!(handler.statistics().num_bytes_tx, 5);
        assert_eq!(handler.statistics().num_writes, 1);

        // unbound routes cannot write
        let other = handler.clone();
        let queued = executor
            .return_from(move || other.write(Addresses::new(1, 2), Bytes::from_static(b"x")))
            .unwrap();
        assert!(!queued);

        peer.write_all(b"ok").await.unwrap();
        wait_until(|| session.events().contains(&SessionEvent::Read(Bytes::from_static(b"ok"))))
            .await;
        handler.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_route_is_rejected() {
        let executor = Executor::new("io-route").unwrap();
        let listener = Arc::new(RecordingListener::default());
        let handler = handler(&executor, &listener);

        let route = Addresses::new(10, 1);
        assert!(handler.add_context(Arc::new(RecordingSession::default()), route));
        assert!(!handler.add_context(Arc::new(RecordingSession::default()), route));
        assert!(handler.add_context(Arc::new(RecordingSession::default()), Addresses::new(11, 1)));

        assert!(handler.remove_context(route));
        assert!(!handler.remove_context(route));
        assert!(handler.add_context(Arc::new(RecordingSession::default()), route));
    }

    #[tokio::test]
    async fn test_shutdown_is_not_reported_as_close() {
        let executor = Executor::new("io-shutdown").unwrap();
        let listener = Arc::new(RecordingListener::default());
        let handler = handler(&executor, &listener);
        let (local, _peer) = tokio::io::duplex(64);
        handler.start(local);

        let session = Arc::new(RecordingSession::default());
        assert!(handler.add_context(session.clone(), Addresses::new(1024, 1)));

        handler.shutdown();
        handler.shutdown();

        // let the reader observe cancellation and post its close
        executor.block_until(|| ()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        executor.block_until(|| ()).unwrap();

        assert_eq!(listener.states(), vec![ChannelState::Shutdown]);
        assert_eq!(handler.statistics().num_close, 1);
        assert_eq!(session.events(), vec![SessionEvent::Up, SessionEvent::Down]);
        assert!(!handler.add_context(session, Addresses::new(1024, 1)));
    }

    #[tokio::test]
    async fn test_shutdown_releases_stalled_writer() {
        let executor = Executor::new("io-stalled").unwrap();
        let listener = Arc::new(RecordingListener::default());
        let handler = handler(&executor, &listener);
        // the peer never reads, so the send blocks once 16 bytes are buffered
        let (local, _peer) = tokio::io::duplex(16);
        handler.start(local);

        let route = Addresses::new(1024, 1);
        let session = Arc::new(RecordingSession::default());
        assert!(handler.add_context(session.clone(), route));
        assert!(handler.write(route, Bytes::from(vec![0x55; 1024])));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        handler.shutdown();
        wait_until(|| Arc::strong_count(&handler) == 1).await;

        executor.block_until(|| ()).unwrap();
        assert!(!session
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::WriteComplete(_))));
        assert_eq!(handler.statistics().num_writes, 0);
    }

    #[tokio::test]
    async fn test_peer_close_then_shutdown() {
        let executor = Executor::new("io-close").unwrap();
        let listener = Arc::new(RecordingListener::default());
        let handler = handler(&executor, &listener);
        let (local, peer) = tokio::io::duplex(64);
        handler.start(local);

        drop(peer);
        wait_until(|| !listener.states().is_empty()).await;

        handler.shutdown();
        assert_eq!(
            listener.states(),
            vec![ChannelState::Closed, ChannelState::Shutdown]
        );
        assert_eq!(handler.statistics().num_close, 1);
    }
}
