use super::{
    QueueTransport, Request, Response, Transport,
    frame::{decode, encode, read_frame, write_frame},
};
use crate::error::TransportError;
use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};
use gpuvm_common::{CallerId, map::OpenMap};
use spin::Mutex;
use std::{
    io::BufReader,
    net::Shutdown,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::PoisonError,
    thread::JoinHandle,
};

fn io_error(err: std::io::Error) -> TransportError {
    TransportError::Io(err.to_string())
}

fn spawn_named(
    name: &str,
    func: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, TransportError> {
    std::thread::Builder::new()
        .name(String::from(name))
        .spawn(func)
        .map_err(io_error)
}

/// Server side of a transport over a Unix domain socket.
///
/// Processes other than the server's connect a [SocketClientTransport] to the same path.
/// Every connection gets a reader thread feeding the requests into one in-process
/// [QueueTransport], which callers living in the server process use directly. Responses
/// go back over the connection their request came from.
#[derive(Debug)]
pub struct SocketServerTransport {
    path: PathBuf,
    queue: Arc<QueueTransport>,
    state: Mutex<Option<Listening>>,
}

#[derive(Debug)]
struct Listening {
    peers: Arc<Peers>,
    acceptor: JoinHandle<()>,
}

/// Connected processes and the callers waiting on each of them.
#[derive(Debug)]
struct Peers {
    open: AtomicBool,
    streams: Mutex<Vec<Arc<UnixStream>>>,
    routes: Mutex<OpenMap<CallerId, Arc<UnixStream>>>,
}

impl Peers {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            streams: Mutex::new(Vec::new()),
            routes: Mutex::new(OpenMap::new()),
        }
    }

    /// Returns false once closed, the stream is then left untracked.
    fn add(&self, stream: Arc<UnixStream>) -> bool {
        let mut streams = self.streams.lock();
        if !self.open.load(Ordering::Acquire) {
            return false;
        }

        streams.push(stream);
        true
    }

    fn remove(&self, stream: &Arc<UnixStream>) {
        self.streams.lock().retain(|peer| !Arc::ptr_eq(peer, stream));
        self.routes.lock().retain(|_, peer| !Arc::ptr_eq(peer, stream));
    }

    fn close(&self) {
        let mut streams = self.streams.lock();
        self.open.store(false, Ordering::Release);

        for stream in streams.drain(..) {
            stream.shutdown(Shutdown::Both).ok();
        }
        self.routes.lock().clear();
    }
}

impl SocketServerTransport {
    /// Create a transport listening on `path` once initialized.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            queue: Arc::new(QueueTransport::new()),
            state: Mutex::new(None),
        }
    }

    /// The path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connected processes.
    pub fn num_peers(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map(|listening| listening.peers.streams.lock().len())
            .unwrap_or(0)
    }

    /// Number of remote callers waiting for a response.
    pub fn num_routes(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map(|listening| listening.peers.routes.lock().len())
            .unwrap_or(0)
    }

    fn listen(&self) -> Result<Listening, TransportError> {
        // A socket left by a server that didn't shut down makes bind fail.
        if self.path.exists() {
            log::debug!("Removing stale socket {}", self.path.display());
            std::fs::remove_file(&self.path).map_err(io_error)?;
        }

        let listener = UnixListener::bind(&self.path).map_err(io_error)?;
        let peers = Arc::new(Peers::new());

        let acceptor = {
            let peers = peers.clone();
            let queue = self.queue.clone();
            spawn_named("gpuvm-acceptor", move || accept(listener, peers, queue))
        };

        match acceptor {
            Ok(acceptor) => Ok(Listening { peers, acceptor }),
            Err(err) => {
                std::fs::remove_file(&self.path).ok();
                Err(err)
            }
        }
    }
}

fn accept(listener: UnixListener, peers: Arc<Peers>, queue: Arc<QueueTransport>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => Arc::new(stream),
            Err(err) => {
                log::warn!("Can't accept an allocator connection: {err}");
                break;
            }
        };

        if !peers.add(stream.clone()) {
            break;
        }

        let reader = {
            let stream = stream.clone();
            let peers = peers.clone();
            let queue = queue.clone();
            spawn_named("gpuvm-peer", move || forward_requests(stream, peers, queue))
        };

        if let Err(err) = reader {
            log::warn!("Can't serve an allocator connection: {err}");
            peers.remove(&stream);
            stream.shutdown(Shutdown::Both).ok();
        }
    }
}

fn forward_requests(stream: Arc<UnixStream>, peers: Arc<Peers>, queue: Arc<QueueTransport>) {
    let mut reader = BufReader::new(stream.as_ref());

    loop {
        let frame = match read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                log::debug!("Allocator connection closed: {err}");
                break;
            }
        };

        let request: Request = match decode(&frame) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("Dropping an allocator connection sending invalid requests: {err}");
                break;
            }
        };

        // Registered before the request is queued, so the response always finds it.
        peers.routes.lock().insert(request.caller, stream.clone());

        if queue.send_request(request).is_err() {
            break;
        }
    }

    peers.remove(&stream);
}

impl Transport for SocketServerTransport {
    fn init(&self) -> Result<(), TransportError> {
        self.deinit();
        self.queue.init()?;

        let listening = self.listen()?;
        log::debug!("Allocator server listening on {}", self.path.display());
        *self.state.lock() = Some(listening);

        Ok(())
    }

    fn deinit(&self) {
        let listening = self.state.lock().take();

        if let Some(listening) = listening {
            listening.peers.close();

            // The acceptor only observes the closed peers on its next connection.
            match UnixStream::connect(&self.path) {
                Ok(_wake) => {
                    if listening.acceptor.join().is_err() {
                        log::warn!("Allocator acceptor thread panicked");
                    }
                }
                Err(err) => log::warn!("Can't wake the allocator acceptor: {err}"),
            }

            if let Err(err) = std::fs::remove_file(&self.path) {
                log::debug!("Can't remove socket {}: {err}", self.path.display());
            }
        }

        self.queue.deinit();
    }

    fn send_request(&self, request: Request) -> Result<(), TransportError> {
        self.queue.send_request(request)
    }

    fn recv_request(&self) -> Result<Request, TransportError> {
        self.queue.recv_request()
    }

    fn send_response(&self, response: Response) -> Result<(), TransportError> {
        let route = self
            .state
            .lock()
            .as_ref()
            .and_then(|listening| listening.peers.routes.lock().remove(&response.caller));

        let Some(stream) = route else {
            return self.queue.send_response(response);
        };

        let frame = encode(&response)?;
        if let Err(err) = write_frame(stream.as_ref(), &frame) {
            // The process of the caller is gone; the others are still served.
            log::warn!("Can't deliver the response of {}: {err}", response.caller);
        }

        Ok(())
    }

    fn recv_response(&self, caller: CallerId) -> Result<Response, TransportError> {
        self.queue.recv_response(caller)
    }
}

impl Drop for SocketServerTransport {
    fn drop(&mut self) {
        self.deinit();
    }
}

/// Client side of a [SocketServerTransport], used from another process.
///
/// Requests are written to the socket. A reader thread routes the responses to the
/// waiting callers by [CallerId].
#[derive(Debug)]
pub struct SocketClientTransport {
    path: PathBuf,
    state: Mutex<Option<Connection>>,
}

#[derive(Debug)]
struct Connection {
    writer: Arc<std::sync::Mutex<UnixStream>>,
    responses: Arc<QueueTransport>,
    reader: JoinHandle<()>,
}

impl SocketClientTransport {
    /// Create a transport connecting to `path` once initialized.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    /// Create a transport connected to the server listening on `path`.
    pub fn connect(path: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let transport = Self::new(path);
        transport.init()?;
        Ok(transport)
    }

    fn with_connection<T>(&self, func: impl FnOnce(&Connection) -> T) -> Result<T, TransportError> {
        let state = self.state.lock();
        let connection = state.as_ref().ok_or(TransportError::NotInitialized)?;
        Ok(func(connection))
    }
}

fn forward_responses(stream: UnixStream, responses: Arc<QueueTransport>) {
    let mut reader = BufReader::new(stream);

    loop {
        let frame = match read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                log::debug!("Allocator connection closed: {err}");
                break;
            }
        };

        let response: Response = match decode(&frame) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("Invalid response from the allocator server: {err}");
                break;
            }
        };

        if responses.send_response(response).is_err() {
            break;
        }
    }

    // Callers still waiting are answered with a transport error.
    responses.deinit();
}

fn server_only(operation: &str) -> TransportError {
    TransportError::Io(alloc::format!(
        "{operation} is only available on the server side"
    ))
}

impl Transport for SocketClientTransport {
    fn init(&self) -> Result<(), TransportError> {
        self.deinit();

        let stream = UnixStream::connect(&self.path).map_err(io_error)?;
        let reader_stream = stream.try_clone().map_err(io_error)?;

        let responses = Arc::new(QueueTransport::new());
        responses.init()?;

        let reader = {
            let responses = responses.clone();
            spawn_named("gpuvm-responses", move || {
                forward_responses(reader_stream, responses)
            })?
        };

        *self.state.lock() = Some(Connection {
            writer: Arc::new(std::sync::Mutex::new(stream)),
            responses,
            reader,
        });

        Ok(())
    }

    fn deinit(&self) {
        let connection = self.state.lock().take();

        if let Some(connection) = connection {
            let stream = connection
                .writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            stream.shutdown(Shutdown::Both).ok();
            drop(stream);

            connection.responses.deinit();
            if connection.reader.join().is_err() {
                log::warn!("Allocator response thread panicked");
            }
        }
    }

    fn send_request(&self, request: Request) -> Result<(), TransportError> {
        let frame = encode(&request)?;
        let writer = self.with_connection(|connection| connection.writer.clone())?;

        // Frames of concurrent callers must not interleave.
        let stream = writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_frame(&*stream, &frame).map_err(|_| TransportError::Disconnected)
    }

    fn recv_request(&self) -> Result<Request, TransportError> {
        Err(server_only("Receiving requests"))
    }

    fn send_response(&self, _response: Response) -> Result<(), TransportError> {
        Err(server_only("Sending responses"))
    }

    fn recv_response(&self, caller: CallerId) -> Result<Response, TransportError> {
        let responses = self.with_connection(|connection| connection.responses.clone())?;
        responses.recv_response(caller)
    }
}

impl Drop for SocketClientTransport {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        allocator::{AllocStrategy, AllocatorType},
        channel::MsgChannel,
        client::AllocatorClient,
        config::GlobalConfig,
        error::AllocatorError,
        id::DeviceId,
        registry::{OpenOptions, Registry},
        server::AllocatorServer,
    };
    use core::time::Duration;
    use std::time::Instant;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(alloc::format!("gpuvm-{}-{name}.sock", std::process::id()))
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let begin = Instant::now();
        while !condition() && begin.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn serve(name: &str) -> (Arc<SocketServerTransport>, AllocatorServer) {
        let config = Arc::new(GlobalConfig::default());
        let transport = Arc::new(SocketServerTransport::new(socket_path(name)));
        transport.init().unwrap();

        let server = AllocatorServer::spawn(
            Arc::new(Registry::new(config.clone())),
            transport.clone(),
            &config.server,
        )
        .unwrap();

        (transport, server)
    }

    fn connect(transport: &SocketServerTransport) -> AllocatorClient {
        let client = SocketClientTransport::connect(transport.path()).unwrap();
        AllocatorClient::new(Arc::new(MsgChannel::new(Arc::new(client))))
    }

    fn open_small(client: &AllocatorClient) -> crate::id::AllocatorHandle {
        client
            .open_with(
                OpenOptions::vm(DeviceId(0), 1)
                    .with_range(0, 0x10000)
                    .with_type(AllocatorType::Simple)
                    .with_strategy(AllocStrategy::HighToLow),
            )
            .unwrap()
    }

    #[test_log::test]
    fn socket_and_local_callers_share_the_server() {
        let (transport, mut server) = serve("share");
        let remote = connect(&transport);
        let local = AllocatorClient::new(Arc::new(MsgChannel::new(transport.clone())));

        let ahnd = open_small(&remote);
        assert_eq!(remote.alloc(ahnd, 1, 0x1000, 0x1000), Ok(Some(0xF000)));
        assert!(local.is_allocated(ahnd, 1, 0x1000, 0xF000).unwrap());
        assert_eq!(transport.num_routes(), 0);

        assert!(server.stop(Duration::from_secs(5)));
        assert!(!transport.path().exists());
    }

    #[test_log::test]
    fn stopping_the_server_releases_socket_callers() {
        let (transport, mut server) = serve("stop");
        let remote = connect(&transport);
        open_small(&remote);

        assert!(server.stop(Duration::from_secs(5)));

        assert!(matches!(
            remote.open_vm(DeviceId(0), 2, AllocatorType::Simple),
            Err(AllocatorError::Transport(
                TransportError::Disconnected | TransportError::NotInitialized
            ))
        ));
    }

    #[test_log::test]
    fn closed_connections_are_forgotten() {
        let (transport, mut server) = serve("forget");

        let first = SocketClientTransport::connect(transport.path()).unwrap();
        let second = SocketClientTransport::connect(transport.path()).unwrap();
        assert!(wait_until(|| transport.num_peers() == 2));

        drop(first);
        assert!(wait_until(|| transport.num_peers() == 1));

        second.deinit();
        assert!(wait_until(|| transport.num_peers() == 0));
        assert!(server.stop(Duration::from_secs(5)));
    }

    #[test_log::test]
    fn init_replaces_a_stale_socket() {
        let path = socket_path("stale");
        std::fs::write(&path, b"stale").unwrap();

        let transport = SocketServerTransport::new(&path);
        transport.init().unwrap();
        assert!(SocketClientTransport::connect(&path).is_ok());

        transport.deinit();
        assert!(!path.exists());
    }

    #[test]
    fn client_side_does_not_serve() {
        let client = SocketClientTransport::new(socket_path("unused"));

        assert_eq!(
            client.send_request(Request::stop()),
            Err(TransportError::NotInitialized)
        );
        assert!(matches!(client.recv_request(), Err(TransportError::Io(_))));
    }
}
