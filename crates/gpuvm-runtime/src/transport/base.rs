use super::{Request, Response};
use crate::error::TransportError;
use gpuvm_common::CallerId;

/// Carries requests from clients to the allocator server and responses back.
///
/// Requests from every caller share one queue consumed by the server. Responses are
/// routed by the [CallerId] of their request, so a caller only ever receives the
/// answer to its own request even when many requests are in flight.
pub trait Transport: Send + Sync + core::fmt::Debug {
    /// Prepare the transport for a new server, discarding messages of a previous one.
    fn init(&self) -> Result<(), TransportError>;

    /// Close the transport. Callers blocked on it return [TransportError::Disconnected].
    fn deinit(&self);

    /// Queue a request for the server.
    fn send_request(&self, request: Request) -> Result<(), TransportError>;

    /// Block until the next request arrives.
    fn recv_request(&self) -> Result<Request, TransportError>;

    /// Send a response to the caller tagged in it.
    fn send_response(&self, response: Response) -> Result<(), TransportError>;

    /// Block until a response tagged with `caller` arrives.
    fn recv_response(&self, caller: CallerId) -> Result<Response, TransportError>;
}
