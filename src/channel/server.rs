//! Shared TCP/TLS listener.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::poll_fn;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{ChannelListener, ChannelState, ConnectionCallback, IoHandler, TcpIoHandler};
use crate::config::IpEndpoint;
use crate::error::{Dnp3Error, Result};
use crate::executor::Executor;
use crate::logging::{LogLevels, Logger};
use crate::types::LinkStatistics;

/// Remote address reported when the peer address cannot be read.
pub const UNKNOWN_REMOTE_ADDR: &str = "unknown";

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How accepted sockets are wrapped before they reach the handler.
#[derive(Clone, Default)]
pub enum Acceptor {
    /// Plain TCP
    #[default]
    Plain,
    /// TLS handshake first
    #[cfg(feature = "tls")]
    Tls(Arc<tokio_rustls::TlsAcceptor>),
}

impl Acceptor {
    /// Check if connections are encrypted.
    pub fn is_tls(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            #[cfg(feature = "tls")]
            Self::Tls(_) => f.write_str("Tls"),
        }
    }
}

/// Format a peer address as `"ip:port"`, or [`UNKNOWN_REMOTE_ADDR`].
pub fn format_remote_addr(addr: io::Result<SocketAddr>) -> String {
    match addr {
        Ok(addr) => format!("{}:{}", addr.ip(), addr.port()),
        Err(_) => UNKNOWN_REMOTE_ADDR.to_string(),
    }
}

/// Translates a closed connection into a disconnect notification.
///
/// Holds only weak references so that neither the handler nor the
/// callback is kept alive by it.
struct ChannelWatcher {
    callback: Weak<dyn ConnectionCallback>,
    handler: Weak<dyn IoHandler>,
    remote_addr: String,
}

impl ChannelListener for ChannelWatcher {
    fn on_state_change(&self, state: ChannelState) {
        if state != ChannelState::Closed {
            return;
        }

        if let (Some(callback), Some(handler)) = (self.callback.upgrade(), self.handler.upgrade())
        {
            callback.on_disconnect(&handler, &self.remote_addr);
        }
    }
}

/// Listener that hands every accepted connection to one callback.
///
/// The socket is owned by the server rather than the accept task, so
/// [`shutdown`](SharedTcpServer::shutdown) closes it before returning.
pub struct SharedTcpServer {
    logger: Logger,
    local_addr: SocketAddr,
    acceptor: Acceptor,
    executor: Executor,
    runtime: Handle,
    listener: Mutex<Option<TcpListener>>,
    started: AtomicBool,
    cancel: CancellationToken,
    statistics: Mutex<LinkStatistics>,
}

impl SharedTcpServer {
    /// Bind the endpoint. Accepting begins with [`start`](Self::start).
    pub fn bind(
        logger: Logger,
        endpoint: &IpEndpoint,
        acceptor: Acceptor,
        executor: Executor,
        runtime: Handle,
    ) -> Result<Arc<Self>> {
        let addr = endpoint.to_socket_addr()?;
        let std_listener =
            std::net::TcpListener::bind(addr).map_err(|source| Dnp3Error::UnableToBind {
                endpoint: endpoint.to_string(),
                source,
            })?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)?
        };

        logger.log(
            LogLevels::EVENT,
            format_args!("listening on {} ({:?})", local_addr, acceptor),
        );

        Ok(Arc::new(Self {
            logger,
            local_addr,
            acceptor,
            executor,
            runtime,
            listener: Mutex::new(Some(listener)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            statistics: Mutex::new(LinkStatistics::default()),
        }))
    }

    /// Bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting. Returns false if already started or shut down.
    pub fn start(self: &Arc<Self>, callback: Weak<dyn ConnectionCallback>) -> bool {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.runtime.spawn(self.clone().accept_loop(callback));
        true
    }

    /// Stop accepting and release the socket. Idempotent.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.listener.lock().take();
        self.logger
            .log(LogLevels::EVENT, format_args!("stopped listening on {}", self.local_addr));
    }

    /// Counters of connections that never reached a handler.
    pub fn statistics(&self) -> LinkStatistics {
        *self.statistics.lock()
    }

    /// Poll the socket without holding the lock across a suspension point.
    /// Ready with `None` once the socket has been released.
    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<Option<io::Result<(TcpStream, SocketAddr)>>> {
        match self.listener.lock().as_ref() {
            Some(listener) => listener.poll_accept(cx).map(Some),
            None => Poll::Ready(None),
        }
    }

    async fn accept_loop(self: Arc<Self>, callback: Weak<dyn ConnectionCallback>) {
        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = poll_fn(|cx| self.poll_accept(cx)) => accepted,
            };

            match accepted {
                None => break,
                Some(Ok((stream, _))) => self.on_accept(stream, &callback),
                Some(Err(e)) => {
                    self.logger.warn(format_args!("accept failed: {}", e));
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    fn on_accept(self: &Arc<Self>, stream: TcpStream, callback: &Weak<dyn ConnectionCallback>) {
        stream.set_nodelay(true).ok();
        let remote_addr = format_remote_addr(stream.peer_addr());

        match &self.acceptor {
            Acceptor::Plain => self.on_stream(stream, remote_addr, callback),
            #[cfg(feature = "tls")]
            Acceptor::Tls(acceptor) => {
                let this = self.clone();
                let acceptor = acceptor.clone();
                let callback = callback.clone();
                tokio::spawn(async move {
                    let handshake = tokio::select! {
                        _ = this.cancel.cancelled() => return,
                        handshake = acceptor.accept(stream) => handshake,
                    };

                    match handshake {
                        Ok(tls) => this.on_stream(tls, remote_addr, &callback),
                        Err(e) => {
                            this.statistics.lock().num_open_fail += 1;
                            this.logger.warn(format_args!(
                                "TLS handshake with {} failed: {}",
                                remote_addr, e
                            ));
                        }
                    }
                });
            }
        }
    }

    fn on_stream<S>(&self, stream: S, remote_addr: String, callback: &Weak<dyn ConnectionCallback>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let logger = self
            .logger
            .with_id(format!("{} {}", self.logger.id(), remote_addr));

        let watcher_callback = callback.clone();
        let watcher_addr = remote_addr.clone();
        let handler = TcpIoHandler::new(
            remote_addr.clone(),
            self.executor.clone(),
            logger,
            move |handler| -> Arc<dyn ChannelListener> {
                Arc::new(ChannelWatcher {
                    callback: watcher_callback,
                    handler,
                    remote_addr: watcher_addr,
                })
            },
        );

        self.logger
            .log(LogLevels::EVENT, format_args!("accepted connection from {}", remote_addr));

        // announce before reading so a close can never overtake the connect
        let io: Arc<dyn IoHandler> = handler.clone();
        let callback = callback.clone();
        let queued = self.executor.post(move || match callback.upgrade() {
            Some(callback) => callback.on_connect(io, &remote_addr),
            None => io.shutdown(),
        });

        if queued {
            handler.start(stream);
        } else {
            handler.shutdown();
        }
    }
}

impl std::fmt::Debug for SharedTcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTcpServer")
            .field("local_addr", &self.local_addr)
            .field("acceptor", &self.acceptor)
            .field("shutdown", &self.cancel.is_cancelled())
            .finish()
    }
}
