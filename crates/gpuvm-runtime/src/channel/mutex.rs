use super::AllocatorChannel;
use crate::{
    error::AllocatorError,
    registry::Registry,
    transport::{Operation, Reply, Request},
};
use alloc::sync::Arc;
use gpuvm_common::CallerId;

/// The MutexChannel executes operations on the calling thread, relying on the locks of
/// the [Registry].
#[derive(new, Debug, Clone)]
pub struct MutexChannel {
    registry: Arc<Registry>,
}

impl AllocatorChannel for MutexChannel {
    fn call(&self, op: Operation) -> Result<Reply, AllocatorError> {
        let response = self.registry.execute(Request::new(CallerId::current(), op));
        response.reply.into_result()
    }
}
