use super::AllocatorChannel;
use crate::{
    error::AllocatorError,
    transport::{Operation, Reply, Request, Transport},
};
use alloc::sync::Arc;
use gpuvm_common::CallerId;

/// The MsgChannel sends every operation to the
/// [allocator server](crate::server::AllocatorServer) and blocks until the response
/// tagged with the calling thread arrives.
#[derive(new, Debug, Clone)]
pub struct MsgChannel {
    transport: Arc<dyn Transport>,
}

impl AllocatorChannel for MsgChannel {
    fn call(&self, op: Operation) -> Result<Reply, AllocatorError> {
        let caller = CallerId::current();
        let is_stop = matches!(op, Operation::Stop);

        self.transport.send_request(Request::new(caller, op))?;

        // The server exits on stop without answering.
        if is_stop {
            return Ok(Reply::Stopped);
        }

        let response = self.transport.recv_response(caller)?;
        response.reply.into_result()
    }
}
