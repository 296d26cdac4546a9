//! Transports: one connection each, one request in flight at a time.
//!
//! A transport is owned by a [`MemcacheNode`](crate::MemcacheNode) and talks
//! back to it through [`TransportHooks`]: it reports when it becomes alive or
//! dead, when it is idle again, and every failure it hits.
//!
//! [`TcpTransport`] runs one connection thread per transport:
//!
//! ```text
//!   try_send ──▶ inbox ──▶ thread: write frame ─▶ read header ─▶ read body
//!                                     │                              │
//!                                     ▼                              ▼
//!                               fail + reconnect ◀── invalid ── handle_response
//!                                                                    │
//!                                                            hooks.available()
//! ```
//!
//! On failure the in-flight request is completed with
//! [`Status::InternalError`] first, then the error is reported and the
//! transport marked dead. A dead transport sleeps `dead_timeout` and
//! reconnects, running the authenticator again on the new connection.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select};
use parking_lot::Mutex;
use protocol_memcache::{HEADER_SIZE, ResponseBody, ResponseHeader, Status};
use tracing::{debug, error, info};

use crate::config::NodeConfig;
use crate::error::Error;
use crate::metrics::{REQUESTS_FAILED, TRANSPORT_RECONNECTS};
use crate::node::TransportHooks;
use crate::request::Request;

/// Largest response body accepted from a server.
pub const MAX_BODY_LENGTH: u32 = 64 * 1024 * 1024;

/// The OS rejects a zero socket timeout.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// A single connection to a node, as seen by the node's pool.
pub trait Transport: Send + Sync {
    /// Hand a request to the transport.
    ///
    /// Succeeds only when the transport is alive and idle. On success the
    /// request's callback will run exactly once, from the transport. On
    /// failure the request is given back untouched.
    fn try_send(&self, request: Request) -> Result<(), Request>;

    fn is_alive(&self) -> bool;

    /// Stop the transport and release its connection. Queued requests are
    /// completed with [`Status::InternalError`]. Idempotent.
    fn shutdown(&self);
}

/// Everything a [`TransportFactory`](crate::TransportFactory) gets to build
/// one transport.
#[derive(Debug)]
pub struct TransportContext {
    pub endpoint: SocketAddr,
    pub config: NodeConfig,
    pub hooks: TransportHooks,
}

/// The default factory: a [`TcpTransport`] per slot.
pub(crate) fn tcp_transport(context: TransportContext) -> Arc<dyn Transport> {
    TcpTransport::new(context)
}

// -- TcpTransport ------------------------------------------------------------

/// Blocking TCP transport driven by its own connection thread.
pub struct TcpTransport {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct SlotState {
    alive: bool,
    in_flight: bool,
}

struct Inner {
    endpoint: SocketAddr,
    config: NodeConfig,
    hooks: TransportHooks,
    state: Mutex<SlotState>,
    inbox: Sender<Request>,
    closing: AtomicBool,
    /// Dropped on shutdown; the connection thread sees the disconnect.
    shutdown: Mutex<Option<Sender<()>>>,
    /// Clone of the live socket, used to unblock reads on shutdown.
    socket: Mutex<Option<TcpStream>>,
}

enum Exit {
    Failed,
    Shutdown,
}

impl TcpTransport {
    /// Connect (and authenticate) synchronously, then start the connection
    /// thread. A transport that fails to connect starts dead and keeps
    /// retrying every `dead_timeout`.
    pub fn new(context: TransportContext) -> Arc<Self> {
        let TransportContext {
            endpoint,
            config,
            hooks,
        } = context;
        let (inbox_tx, inbox_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let inner = Arc::new(Inner {
            endpoint,
            config,
            hooks,
            state: Mutex::new(SlotState::default()),
            inbox: inbox_tx,
            closing: AtomicBool::new(false),
            shutdown: Mutex::new(Some(shutdown_tx)),
            socket: Mutex::new(None),
        });

        let connection = match inner.open() {
            Ok(connection) => {
                inner.mark_alive();
                Some(connection)
            }
            Err(e) => {
                inner.report(e);
                None
            }
        };

        let runner = inner.clone();
        let worker = thread::Builder::new()
            .name(format!("memcache-{endpoint}"))
            .spawn(move || runner.run(connection, inbox_rx, shutdown_rx));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(%endpoint, error = %e, "failed to spawn connection thread");
                inner.state.lock().alive = false;
                inner.hooks.set_alive(false);
                None
            }
        };

        Arc::new(Self {
            inner,
            worker: Mutex::new(worker),
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.inner.endpoint
    }
}

impl Transport for TcpTransport {
    fn try_send(&self, request: Request) -> Result<(), Request> {
        let mut state = self.inner.state.lock();
        if !state.alive || state.in_flight || self.inner.closing.load(Ordering::Acquire) {
            return Err(request);
        }
        match self.inner.inbox.try_send(request) {
            Ok(()) => {
                state.in_flight = true;
                Ok(())
            }
            Err(e) => Err(e.into_inner()),
        }
    }

    fn is_alive(&self) -> bool {
        self.inner.state.lock().alive
    }

    fn shutdown(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.state.lock().alive = false;
        self.inner.shutdown.lock().take();
        if let Some(socket) = self.inner.socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.worker.lock().take() {
            // A callback running on the connection thread may dispose the
            // node; that thread exits on its own.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        debug!(endpoint = %self.inner.endpoint, "transport shut down");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn run(
        self: Arc<Self>,
        mut connection: Option<Connection>,
        inbox: Receiver<Request>,
        shutdown: Receiver<()>,
    ) {
        loop {
            if let Some(conn) = connection.take() {
                if let Exit::Shutdown = self.serve(conn, &inbox, &shutdown) {
                    break;
                }
            }

            match shutdown.recv_timeout(self.config.dead_timeout) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
            if self.is_closing() {
                break;
            }

            TRANSPORT_RECONNECTS.increment();
            match self.open() {
                Ok(conn) if !self.is_closing() => {
                    info!(endpoint = %self.endpoint, "transport reconnected");
                    self.mark_alive();
                    connection = Some(conn);
                }
                Ok(_) => break,
                Err(e) => self.report(e),
            }
        }

        while let Ok(request) = inbox.try_recv() {
            REQUESTS_FAILED.increment();
            request.fail(Status::InternalError);
        }
        self.state.lock().in_flight = false;
    }

    /// Process requests on `conn` until it fails or the transport closes.
    fn serve(
        &self,
        mut conn: Connection,
        inbox: &Receiver<Request>,
        shutdown: &Receiver<()>,
    ) -> Exit {
        loop {
            select! {
                recv(inbox) -> msg => {
                    let Ok(request) = msg else {
                        return Exit::Shutdown;
                    };
                    match conn.round_trip(&request) {
                        Ok(frame) => {
                            frame.complete(request);
                            self.release();
                        }
                        // nothing reached the socket; the connection stays usable
                        Err(Error::Encode(e)) => {
                            debug!(endpoint = %self.endpoint, error = %e, "request rejected");
                            REQUESTS_FAILED.increment();
                            request.fail(Status::InvalidArguments);
                            self.release();
                        }
                        Err(e) => {
                            REQUESTS_FAILED.increment();
                            request.fail(Status::InternalError);
                            self.fail(e);
                            return Exit::Failed;
                        }
                    }
                }
                recv(shutdown) -> _ => return Exit::Shutdown,
            }
        }
    }

    /// Open a connection and run the authenticator on it.
    fn open(&self) -> Result<Connection, Error> {
        if self.is_closing() {
            return Err(Error::Disposed);
        }
        let stream = match self.config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&self.endpoint, timeout)?,
            None => TcpStream::connect(self.endpoint)?,
        };
        stream.set_nodelay(true)?;
        *self.socket.lock() = Some(stream.try_clone()?);

        let mut conn = Connection { stream };
        if self.config.authenticator.is_some() {
            conn.set_timeout(Some(self.config.auth_timeout.max(MIN_SOCKET_TIMEOUT)))?;
            self.authenticate(&mut conn)?;
        }
        conn.set_timeout(self.config.socket_timeout.map(|t| t.max(MIN_SOCKET_TIMEOUT)))?;
        debug!(endpoint = %self.endpoint, "transport connected");
        Ok(conn)
    }

    /// Run the SASL exchange. Every read and write of the exchange is
    /// bounded by `auth_timeout`, so a silent server fails the handshake.
    fn authenticate(&self, conn: &mut Connection) -> Result<(), Error> {
        let Some(authenticator) = &self.config.authenticator else {
            return Ok(());
        };
        let mut token = authenticator.create_token();
        loop {
            match token.step_authenticate(self.config.auth_timeout) {
                (Status::NoError, _) => return Ok(()),
                (Status::StepRequired, Some(request)) => match conn.round_trip(&request) {
                    Ok(frame) => frame.complete(request),
                    Err(e) => {
                        request.fail(Status::InternalError);
                        return Err(e);
                    }
                },
                (status, request) => {
                    if let Some(request) = request {
                        request.fail(status);
                    }
                    return Err(Error::Auth(status));
                }
            }
        }
    }

    fn mark_alive(&self) {
        {
            let mut state = self.state.lock();
            state.alive = true;
            state.in_flight = false;
        }
        self.hooks.set_alive(true);
        self.hooks.available();
    }

    /// The in-flight request completed; accept the next one.
    fn release(&self) {
        self.state.lock().in_flight = false;
        self.hooks.available();
    }

    /// The connection broke. The in-flight request has already been
    /// completed.
    fn fail(&self, error: Error) {
        {
            let mut state = self.state.lock();
            state.alive = false;
            state.in_flight = false;
        }
        self.socket.lock().take();
        if self.is_closing() {
            debug!(endpoint = %self.endpoint, error = %error, "connection closed during shutdown");
            return;
        }
        self.hooks.set_alive(false);
        self.report(error);
    }

    fn report(&self, error: Error) {
        if self.is_closing() {
            return;
        }
        self.hooks.transport_error(error);
    }
}

// -- Connection --------------------------------------------------------------

struct Connection {
    stream: TcpStream,
}

/// A validated response.
struct Frame {
    header: ResponseHeader,
    body: Vec<u8>,
}

impl Frame {
    fn complete(self, request: Request) {
        let body = ResponseBody::split(&self.header, &self.body).unwrap_or_default();
        request.handle_response(&self.header, body);
    }
}

impl Connection {
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }

    fn round_trip(&mut self, request: &Request) -> Result<Frame, Error> {
        let query = request.query_buffer()?;
        self.stream.write_all(&query)?;
        self.stream.flush()?;
        self.receive(request)
    }

    /// Read one response and check it answers `request`: magic, then
    /// lengths, then opaque, then opcode.
    fn receive(&mut self, request: &Request) -> Result<Frame, Error> {
        let mut raw = [0u8; HEADER_SIZE];
        read_full(&mut self.stream, &mut raw)?;
        let header = ResponseHeader::parse(&raw)?;

        if header.total_body_length > MAX_BODY_LENGTH {
            return Err(Error::FrameTooLarge(header.total_body_length));
        }
        let mut body = vec![0u8; header.total_body_length as usize];
        read_full(&mut self.stream, &mut body)?;
        ResponseBody::split(&header, &body)?;

        if header.opaque != request.request_id() {
            return Err(Error::OpaqueMismatch {
                expected: request.request_id(),
                actual: header.opaque,
            });
        }
        if header.opcode != request.opcode() {
            return Err(Error::OpcodeMismatch {
                expected: request.opcode(),
                actual: header.opcode,
            });
        }
        Ok(Frame { header, body })
    }
}

fn read_full(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), Error> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TcpTransport")
            .field("endpoint", &self.inner.endpoint)
            .field("alive", &state.alive)
            .field("in_flight", &state.in_flight)
            .finish()
    }
}
