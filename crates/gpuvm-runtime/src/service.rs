use crate::{
    channel::{MsgChannel, MutexChannel},
    client::AllocatorClient,
    config::GlobalConfig,
    error::{AllocatorError, TransportError},
    id::AllocatorHandle,
    registry::Registry,
    server::AllocatorServer,
    transport::{QueueTransport, Transport},
};
use alloc::{string::ToString, sync::Arc};
use spin::Mutex;

/// Owns the allocator state of a process and decides how clients reach it.
///
/// In-process mode is the default. In multiprocess mode a server thread owns the
/// registry and remote clients talk to it through the transport; clients from
/// [client](Self::client) keep calling the registry directly.
///
/// Switching modes destroys every allocator. Clients created before the switch keep
/// pointing at the destroyed state.
#[derive(Debug)]
pub struct AllocatorService {
    config: Arc<GlobalConfig>,
    transport: Arc<dyn Transport>,
    state: Mutex<ServiceState>,
}

#[derive(Debug)]
struct ServiceState {
    registry: Arc<Registry>,
    server: Option<AllocatorServer>,
}

impl Default for AllocatorService {
    fn default() -> Self {
        Self::new(GlobalConfig::get())
    }
}

impl AllocatorService {
    /// Create a service using a [QueueTransport] for multiprocess mode.
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self::with_transport(config, Arc::new(QueueTransport::new()))
    }

    /// Create a service using the given transport for multiprocess mode.
    pub fn with_transport(config: Arc<GlobalConfig>, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(Registry::new(config.clone()));

        Self {
            config,
            transport,
            state: Mutex::new(ServiceState {
                registry,
                server: None,
            }),
        }
    }

    /// A client calling the registry of this process directly.
    pub fn client(&self) -> AllocatorClient {
        let registry = self.registry();
        AllocatorClient::new(Arc::new(MutexChannel::new(registry)))
    }

    /// A client sending its requests to the server thread.
    pub fn remote_client(&self) -> Result<AllocatorClient, AllocatorError> {
        if !self.is_multiprocess() {
            return Err(AllocatorError::NotMultiprocess);
        }

        Ok(AllocatorClient::new(Arc::new(MsgChannel::new(
            self.transport.clone(),
        ))))
    }

    /// The current registry.
    pub fn registry(&self) -> Arc<Registry> {
        self.state.lock().registry.clone()
    }

    /// Whether the server thread runs.
    pub fn is_multiprocess(&self) -> bool {
        self.state
            .lock()
            .server
            .as_ref()
            .is_some_and(|server| server.is_running())
    }

    /// Destroy every allocator and start the server thread.
    pub fn start_multiprocess(&self) -> Result<(), AllocatorError> {
        let mut state = self.state.lock();
        self.reset(&mut state);

        self.transport.init()?;
        let server = AllocatorServer::spawn(
            state.registry.clone(),
            self.transport.clone(),
            &self.config.server,
        )
        .map_err(|err| TransportError::Io(err.to_string()))?;

        log::debug!("Allocator multiprocess mode started");
        state.server = Some(server);

        Ok(())
    }

    /// Stop the server thread, waiting for it at most the configured stop timeout.
    ///
    /// Returns whether the thread exited in time. Allocators are kept until the next
    /// [reinit](Self::reinit) or mode switch.
    pub fn stop_multiprocess(&self) -> bool {
        let server = self.state.lock().server.take();

        match server {
            Some(mut server) => server.stop(self.config.server.stop_timeout()),
            None => true,
        }
    }

    /// Stop the server thread if it runs and destroy every allocator.
    pub fn reinit(&self) {
        let mut state = self.state.lock();
        self.reset(&mut state);
    }

    /// Log the state of an allocator.
    pub fn print(&self, handle: AllocatorHandle) -> Result<(), AllocatorError> {
        self.registry().print(handle)
    }

    fn reset(&self, state: &mut ServiceState) {
        if let Some(mut server) = state.server.take() {
            server.stop(self.config.server.stop_timeout());
        }

        let closed = state.registry.close_all();
        if closed > 0 {
            log::debug!("Closed {closed} allocator handles");
        }

        state.registry = Arc::new(Registry::new(self.config.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{allocator::AllocatorType, id::DeviceId};

    fn service() -> AllocatorService {
        AllocatorService::new(Arc::new(GlobalConfig::default()))
    }

    #[test]
    fn remote_client_requires_multiprocess() {
        let service = service();

        assert_eq!(
            service.remote_client().unwrap_err(),
            AllocatorError::NotMultiprocess
        );
    }

    #[test_log::test]
    fn reinit_destroys_allocators() {
        let service = service();
        let client = service.client();
        let ahnd = client.open(DeviceId(0), 1, AllocatorType::Simple).unwrap();

        service.reinit();

        assert_eq!(service.registry().open_handles(), 0);
        assert_eq!(service.client().close(ahnd), Ok(false));
    }

    #[test_log::test]
    fn multiprocess_round_trip() {
        let service = service();
        service
            .client()
            .open(DeviceId(0), 1, AllocatorType::Simple)
            .unwrap();

        service.start_multiprocess().unwrap();
        assert!(service.is_multiprocess());
        assert_eq!(service.registry().open_handles(), 0);

        let remote = service.remote_client().unwrap();
        let ahnd = remote
            .open_vm(DeviceId(0), 1, AllocatorType::Simple)
            .unwrap();
        let offset = remote.alloc(ahnd, 1, 0x1000, 0x1000).unwrap().unwrap();
        assert!(
            service
                .client()
                .is_allocated(ahnd, 1, 0x1000, offset)
                .unwrap()
        );
        assert!(remote.free(ahnd, 1).unwrap());
        assert!(remote.close(ahnd).unwrap());

        assert!(service.stop_multiprocess());
        assert!(!service.is_multiprocess());
        assert!(remote.close(ahnd).is_err());
    }
}
