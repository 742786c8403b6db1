use crate::{
    config::server::ServerConfig,
    error::TransportError,
    registry::Registry,
    transport::{Operation, Request, Transport},
};
use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    thread::JoinHandle,
    time::Instant,
};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The thread owning the registry in multiprocess mode.
///
/// It executes requests one at a time, in the order they reach the transport, and sends
/// every response tagged with the caller of its request.
///
/// A request violating the allocator contract panics the server thread. The transport is
/// closed before the panic resumes, so every caller waiting on it fails with a transport
/// error and the server no longer reports itself as running.
#[derive(Debug)]
pub struct AllocatorServer {
    transport: Arc<dyn Transport>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl AllocatorServer {
    /// Spawn the server thread on an initialized transport.
    pub fn spawn(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        config: &ServerConfig,
    ) -> std::io::Result<Self> {
        // Set before spawning so a stop issued right away still waits for the thread.
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let transport = transport.clone();
            let running = running.clone();

            std::thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || {
                    let served =
                        catch_unwind(AssertUnwindSafe(|| serve(&registry, transport.as_ref())));

                    if served.is_err() {
                        log::error!("Allocator server panicked, closing the transport");
                        transport.deinit();
                    }
                    running.store(false, Ordering::Release);

                    match served {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            log::warn!("Allocator server stopped on a transport error: {err}");
                        }
                        Err(payload) => resume_unwind(payload),
                    }
                })
        };

        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                running.store(false, Ordering::Release);
                return Err(err);
            }
        };

        Ok(Self {
            transport,
            running,
            thread: Some(thread),
            stop_timeout: config.stop_timeout(),
        })
    }

    /// Whether the server thread is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the server thread to exit and join it.
    ///
    /// Waits at most `timeout` for the thread to observe the stop request, then closes the
    /// transport, which also releases callers still waiting on it. Returns whether the
    /// thread exited in time.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        if let Err(err) = self.transport.send_request(Request::stop()) {
            log::warn!("Can't send the stop request: {err}");
        }

        let start = Instant::now();
        while self.is_running() && start.elapsed() < timeout {
            std::thread::sleep(POLL_INTERVAL);
        }

        let stopped = !self.is_running();
        if !stopped {
            log::warn!("Allocator server didn't stop within {timeout:?}");
        }

        self.transport.deinit();

        if thread.join().is_err() {
            log::warn!("Allocator server thread panicked");
        }

        stopped
    }
}

impl Drop for AllocatorServer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop(self.stop_timeout);
        }
    }
}

fn serve(registry: &Registry, transport: &dyn Transport) -> Result<(), TransportError> {
    loop {
        let request = transport.recv_request()?;

        if let Operation::Stop = request.op {
            log::debug!("Allocator server received stop from {}", request.caller);
            return Ok(());
        }

        transport.send_response(registry.execute(request))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::GlobalConfig,
        transport::{QueueTransport, Reply},
    };
    use gpuvm_common::CallerId;

    fn start() -> (Arc<QueueTransport>, AllocatorServer) {
        let config = Arc::new(GlobalConfig::default());
        let transport = Arc::new(QueueTransport::new());
        transport.init().unwrap();

        let server = AllocatorServer::spawn(
            Arc::new(Registry::new(config.clone())),
            transport.clone(),
            &config.server,
        )
        .unwrap();

        (transport, server)
    }

    #[test_log::test]
    fn server_answers_and_stops() {
        let (transport, mut server) = start();
        let caller = CallerId::current();

        transport
            .send_request(Request::new(
                caller,
                Operation::Close {
                    handle: crate::id::AllocatorHandle::from_raw(u64::MAX),
                },
            ))
            .unwrap();
        let response = transport.recv_response(caller).unwrap();
        assert_eq!(response.reply, Reply::Close { is_empty: false });

        assert!(server.stop(Duration::from_secs(5)));
        assert!(!server.is_running());
        assert_eq!(
            transport.send_request(Request::stop()),
            Err(TransportError::NotInitialized)
        );
    }

    #[test_log::test]
    fn stop_is_idempotent() {
        let (_transport, mut server) = start();

        assert!(server.stop(Duration::from_secs(5)));
        assert!(server.stop(Duration::from_secs(5)));
    }

    #[test_log::test]
    fn panic_closes_the_transport() {
        let (transport, mut server) = start();
        let caller = CallerId::current();

        // Vm 0 is rejected by the registry.
        let open = Operation::Open(crate::registry::OpenOptions::vm(crate::id::DeviceId(0), 0));
        transport.send_request(Request::new(caller, open)).unwrap();

        assert!(matches!(
            transport.recv_response(caller),
            Err(TransportError::Disconnected | TransportError::NotInitialized)
        ));

        let begin = Instant::now();
        while server.is_running() && begin.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(POLL_INTERVAL);
        }
        assert!(!server.is_running());
        assert!(server.stop(Duration::from_secs(5)));
    }

    #[test_log::test]
    fn deinit_ends_the_loop() {
        let (transport, server) = start();

        transport.deinit();
        let begin = Instant::now();
        while server.is_running() && begin.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(POLL_INTERVAL);
        }

        assert!(!server.is_running());
    }
}
