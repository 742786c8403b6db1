use alloc::string::String;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the allocator API.
///
/// Caller bugs that could corrupt shared allocator state are not represented here;
/// they panic. Running out of address space is reported with `None` by
/// [alloc](crate::client::AllocatorClient::alloc).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocatorError {
    /// The open-handle is not known to the registry, most likely already closed.
    #[error("Unknown allocator handle {0:#x}")]
    UnknownHandle(u64),

    /// `open_as` was called on an allocator keyed by context instead of vm.
    #[error("Allocator handle {0:#x} is not keyed by vm, only <device, vm> can be opened as")]
    OpenAsRequiresVm(u64),

    /// A remote client was requested while the service runs in-process.
    #[error("The allocator service is not running in multiprocess mode")]
    NotMultiprocess,

    /// The server answered with a reply that doesn't match the request.
    #[error("Unexpected reply, expected {expected} but got {got}")]
    UnexpectedReply {
        /// The name of the expected reply.
        expected: String,
        /// The name of the reply that was received.
        got: String,
    },

    /// The transport between the client and the server failed.
    #[error("Transport error\nCaused by:\n  {0}")]
    Transport(#[from] TransportError),
}

/// Errors of a [Transport](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    /// The other side of the transport is gone.
    #[error("The transport is disconnected")]
    Disconnected,

    /// The transport was used before `init` or after `deinit`.
    #[error("The transport is not initialized")]
    NotInitialized,

    /// A message couldn't be sent, received or decoded.
    #[error("Transport I/O failure: {0}")]
    Io(String),
}
