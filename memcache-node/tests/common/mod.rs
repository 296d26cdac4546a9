#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use memcache_node::{
    Request, Status, Transport, TransportContext, TransportFactory, TransportHooks,
};
use protocol_memcache::{HEADER_SIZE, Opcode, RequestHeader, ResponseHeader};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or `WAIT` elapses.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ── Mock transport ──────────────────────────────────────────────────────

/// Accepts requests while alive and holds them until completed by the test.
pub struct MockTransport {
    hooks: TransportHooks,
    alive: AtomicBool,
    held: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
        self.hooks.set_alive(alive);
        if alive {
            self.hooks.available();
        }
    }

    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Complete every held request and report the transport idle.
    pub fn complete(&self, status: Status) {
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        for request in held {
            request.fail(status);
        }
        if self.alive.load(Ordering::SeqCst) {
            self.hooks.available();
        }
    }

    pub fn hooks(&self) -> &TransportHooks {
        &self.hooks
    }
}

impl Transport for MockTransport {
    fn try_send(&self, request: Request) -> Result<(), Request> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(request);
        }
        self.held.lock().unwrap().push(request);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        for request in held {
            request.fail(Status::InternalError);
        }
    }
}

pub type Mocks = Arc<Mutex<Vec<Arc<MockTransport>>>>;

/// A factory building alive mock transports, and the list it fills.
pub fn mock_factory() -> (TransportFactory, Mocks) {
    let mocks: Mocks = Default::default();
    let registry = mocks.clone();
    let factory: TransportFactory = Arc::new(move |context: TransportContext| {
        let mock = Arc::new(MockTransport {
            hooks: context.hooks,
            alive: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        });
        mock.set_alive(true);
        registry.lock().unwrap().push(mock.clone());
        mock as Arc<dyn Transport>
    });
    (factory, mocks)
}

pub fn snapshot(mocks: &Mocks) -> Vec<Arc<MockTransport>> {
    mocks.lock().unwrap().clone()
}

// ── Mock server ─────────────────────────────────────────────────────────

pub enum Reply {
    Frame(Vec<u8>),
    Close,
}

/// Decides the reply to each request. Gets the connection index (0 for
/// the first accepted connection), the request header and its body.
pub type Responder = Arc<dyn Fn(usize, &RequestHeader, &[u8]) -> Reply + Send + Sync>;

pub struct MockServer {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn start(
        responder: impl Fn(usize, &RequestHeader, &[u8]) -> Reply + Send + Sync + 'static,
    ) -> Self {
        let responder: Responder = Arc::new(responder);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let count = connections.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                let index = count.fetch_add(1, Ordering::SeqCst);
                let responder = responder.clone();
                thread::spawn(move || serve(stream, index, responder));
            }
        });
        Self { addr, connections }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn serve(mut stream: TcpStream, index: usize, responder: Responder) {
    loop {
        let mut raw = [0u8; HEADER_SIZE];
        if stream.read_exact(&mut raw).is_err() {
            return;
        }
        let Ok(header) = RequestHeader::parse(&raw) else {
            return;
        };
        let mut body = vec![0u8; header.total_body_length as usize];
        if stream.read_exact(&mut body).is_err() {
            return;
        }
        match responder(index, &header, &body) {
            Reply::Frame(bytes) => {
                if stream.write_all(&bytes).is_err() {
                    return;
                }
            }
            Reply::Close => return,
        }
    }
}

/// A well-formed response echoing the request's opcode and opaque.
pub fn response(
    request: &RequestHeader,
    status: Status,
    extras: &[u8],
    value: &[u8],
) -> Vec<u8> {
    let mut header = ResponseHeader::new(request.opcode, status);
    header.opaque = request.opaque;
    header.extras_length = extras.len() as u8;
    header.total_body_length = (extras.len() + value.len()) as u32;
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(extras);
    out.extend_from_slice(value);
    out
}

pub fn ok(request: &RequestHeader) -> Reply {
    Reply::Frame(response(request, Status::NoError, &[], &[]))
}

/// Splits a request body into (extras, key, value).
pub fn request_parts<'a>(
    header: &RequestHeader,
    body: &'a [u8],
) -> (&'a [u8], &'a [u8], &'a [u8]) {
    let extras = header.extras_length as usize;
    let key = header.key_length as usize;
    (&body[..extras], &body[extras..extras + key], &body[extras + key..])
}

pub fn is_sasl(header: &RequestHeader) -> bool {
    header.opcode == Opcode::SaslStart || header.opcode == Opcode::SaslStep
}
