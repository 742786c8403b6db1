use super::{
    Request, Response, Transport,
    frame::{Frame, decode, encode},
};
use crate::error::TransportError;
use async_channel::{Receiver, Sender};
use gpuvm_common::{CallerId, map::OpenMap};
use spin::Mutex;

/// Message-queue transport built on unbounded channels of serialized frames.
///
/// Every message crosses the queue as bytes, exactly as it would cross a process
/// boundary. The server reads a single request queue; each caller owns a mailbox that
/// only receives the responses tagged with its [CallerId]. A caller has at most one
/// request in flight, so its mailbox is dropped once the response is received.
#[derive(Debug, Default)]
pub struct QueueTransport {
    state: Mutex<Option<QueueState>>,
}

#[derive(Debug)]
struct QueueState {
    requests: Mailbox,
    mailboxes: OpenMap<CallerId, Mailbox>,
}

#[derive(Debug, Clone)]
struct Mailbox {
    sender: Sender<Frame>,
    receiver: Receiver<Frame>,
}

impl Mailbox {
    fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self { sender, receiver }
    }

    fn close(&self) {
        self.sender.close();
    }
}

impl QueueState {
    fn new() -> Self {
        Self {
            requests: Mailbox::new(),
            mailboxes: OpenMap::new(),
        }
    }

    fn mailbox(&mut self, caller: CallerId) -> Mailbox {
        if let Some(mailbox) = self.mailboxes.get(&caller) {
            return mailbox.clone();
        }

        let mailbox = Mailbox::new();
        self.mailboxes.insert(caller, mailbox.clone());
        mailbox
    }

    fn close(self) {
        self.requests.close();
        for (_, mailbox) in self.mailboxes.iter() {
            mailbox.close();
        }
    }
}

impl QueueTransport {
    /// Create a transport, closed until [init](Transport::init) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callers with a response pending or awaited.
    pub fn num_mailboxes(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map(|state| state.mailboxes.len())
            .unwrap_or(0)
    }

    fn with_state<T>(&self, func: impl FnOnce(&mut QueueState) -> T) -> Result<T, TransportError> {
        let mut state = self.state.lock();
        let state = state.as_mut().ok_or(TransportError::NotInitialized)?;
        Ok(func(state))
    }
}

fn send(sender: Sender<Frame>, frame: Frame) -> Result<(), TransportError> {
    sender
        .send_blocking(frame)
        .map_err(|_| TransportError::Disconnected)
}

fn recv(receiver: Receiver<Frame>) -> Result<Frame, TransportError> {
    receiver
        .recv_blocking()
        .map_err(|_| TransportError::Disconnected)
}

impl Transport for QueueTransport {
    fn init(&self) -> Result<(), TransportError> {
        let previous = self.state.lock().replace(QueueState::new());

        if let Some(previous) = previous {
            log::debug!("Discarding the queues of a previous server");
            previous.close();
        }

        Ok(())
    }

    fn deinit(&self) {
        if let Some(state) = self.state.lock().take() {
            state.close();
        }
    }

    fn send_request(&self, request: Request) -> Result<(), TransportError> {
        let frame = encode(&request)?;
        // The lock is released before blocking so the server keeps serving.
        let sender = self.with_state(|state| state.requests.sender.clone())?;
        send(sender, frame)
    }

    fn recv_request(&self) -> Result<Request, TransportError> {
        let receiver = self.with_state(|state| state.requests.receiver.clone())?;
        decode(&recv(receiver)?)
    }

    fn send_response(&self, response: Response) -> Result<(), TransportError> {
        let frame = encode(&response)?;
        let sender = self.with_state(|state| state.mailbox(response.caller).sender)?;
        send(sender, frame)
    }

    fn recv_response(&self, caller: CallerId) -> Result<Response, TransportError> {
        let receiver = self.with_state(|state| state.mailbox(caller).receiver)?;
        let frame = recv(receiver)?;
        // Gone after a concurrent deinit, nothing left to drop then.
        self.with_state(|state| state.mailboxes.remove(&caller)).ok();

        let response: Response = decode(&frame)?;

        if response.caller != caller {
            return Err(TransportError::Io(alloc::format!(
                "Response for {} delivered to {caller}",
                response.caller
            )));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AllocatorHandle;
    use crate::transport::{Operation, Reply};

    fn caller(thread: u64) -> CallerId {
        CallerId {
            process: 1,
            thread,
        }
    }

    #[test]
    fn uninitialized_transport_is_rejected() {
        let transport = QueueTransport::new();

        assert_eq!(
            transport.send_request(Request::stop()),
            Err(TransportError::NotInitialized)
        );
        assert_eq!(
            transport.recv_response(caller(1)).unwrap_err(),
            TransportError::NotInitialized
        );
    }

    #[test]
    fn requests_arrive_in_order() {
        let transport = QueueTransport::new();
        transport.init().unwrap();

        let close = Operation::Close {
            handle: AllocatorHandle::from_raw(1),
        };
        transport
            .send_request(Request::new(caller(1), close.clone()))
            .unwrap();
        transport
            .send_request(Request::new(caller(2), Operation::Stop))
            .unwrap();

        assert_eq!(
            transport.recv_request().unwrap(),
            Request::new(caller(1), close)
        );
        assert_eq!(transport.recv_request().unwrap().op, Operation::Stop);
    }

    #[test]
    fn responses_are_routed_by_caller() {
        let transport = QueueTransport::new();
        transport.init().unwrap();

        transport
            .send_response(Response::new(caller(1), Reply::Free { freed: true }))
            .unwrap();
        transport
            .send_response(Response::new(caller(2), Reply::Free { freed: false }))
            .unwrap();

        assert_eq!(transport.num_mailboxes(), 2);

        assert_eq!(
            transport.recv_response(caller(2)).unwrap().reply,
            Reply::Free { freed: false }
        );
        assert_eq!(
            transport.recv_response(caller(1)).unwrap().reply,
            Reply::Free { freed: true }
        );
        assert_eq!(transport.num_mailboxes(), 0);
    }

    #[test]
    fn mailboxes_of_finished_callers_are_dropped() {
        let transport = std::sync::Arc::new(QueueTransport::new());
        transport.init().unwrap();

        let callers: Vec<_> = (0..16)
            .map(|_| {
                let transport = transport.clone();
                std::thread::spawn(move || {
                    let caller = CallerId::current();
                    transport
                        .send_response(Response::new(caller, Reply::Free { freed: true }))
                        .unwrap();
                    transport.recv_response(caller).unwrap().reply
                })
            })
            .collect();

        for caller in callers {
            assert_eq!(caller.join().unwrap(), Reply::Free { freed: true });
        }
        assert_eq!(transport.num_mailboxes(), 0);
    }

    #[test]
    fn init_discards_stale_messages() {
        let transport = QueueTransport::new();
        transport.init().unwrap();
        transport.send_request(Request::stop()).unwrap();

        transport.init().unwrap();
        transport
            .send_response(Response::new(caller(1), Reply::Stopped))
            .unwrap();

        assert_eq!(transport.num_mailboxes(), 1);
        assert_eq!(
            transport.recv_response(caller(1)).unwrap().reply,
            Reply::Stopped
        );
    }

    #[test]
    fn deinit_wakes_blocked_receiver() {
        let transport = std::sync::Arc::new(QueueTransport::new());
        transport.init().unwrap();

        let handle = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.recv_request())
        };

        std::thread::sleep(core::time::Duration::from_millis(20));
        transport.deinit();

        // Depending on timing the receiver saw the closed queue or no queue at all.
        assert!(matches!(
            handle.join().unwrap(),
            Err(TransportError::Disconnected | TransportError::NotInitialized)
        ));
    }
}
