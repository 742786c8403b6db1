use crate::{
    error::AllocatorError,
    transport::{Operation, Reply},
};

/// The AllocatorChannel trait links the [AllocatorClient](crate::client::AllocatorClient)
/// to the registry while ensuring thread-safety.
pub trait AllocatorChannel: Send + Sync + core::fmt::Debug {
    /// Execute an operation and wait for its reply.
    ///
    /// [Reply::Failed] is turned into an error.
    fn call(&self, op: Operation) -> Result<Reply, AllocatorError>;
}
