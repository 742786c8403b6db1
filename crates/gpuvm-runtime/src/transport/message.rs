use crate::{
    allocator::AllocStrategy,
    error::AllocatorError,
    id::AllocatorHandle,
    registry::{OpenOptions, ReserveOutcome},
};
use alloc::string::{String, ToString};
use core::fmt::Display;
use gpuvm_common::CallerId;
use serde::{Deserialize, Serialize};

/// A request sent to the allocator registry, tagged with its caller.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// The thread that issued the request and waits for its response.
    pub caller: CallerId,
    /// The operation to execute.
    pub op: Operation,
}

impl Request {
    /// The request asking the server thread to exit.
    pub fn stop() -> Self {
        Self::new(CallerId::current(), Operation::Stop)
    }
}

/// A response of the allocator registry, tagged with the caller of its request.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// The caller of the request this response answers.
    pub caller: CallerId,
    /// The result of the operation.
    pub reply: Reply,
}

/// Every operation of the allocator registry.
///
/// Object handles (`object`) are caller-supplied buffer handles, `handle` is the
/// open-handle of the allocator.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Open(OpenOptions),
    OpenAs {
        handle: AllocatorHandle,
        new_vm: u32,
    },
    Close {
        handle: AllocatorHandle,
    },
    AddressRange {
        handle: AllocatorHandle,
    },
    Alloc {
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        alignment: u64,
        strategy: AllocStrategy,
    },
    Free {
        handle: AllocatorHandle,
        object: u32,
    },
    IsAllocated {
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        offset: u64,
    },
    Reserve {
        handle: AllocatorHandle,
        object: u32,
        start: u64,
        end: u64,
    },
    Unreserve {
        handle: AllocatorHandle,
        object: u32,
        start: u64,
        end: u64,
    },
    IsReserved {
        handle: AllocatorHandle,
        start: u64,
        end: u64,
    },
    ReserveIfNotAllocated {
        handle: AllocatorHandle,
        object: u32,
        start: u64,
        end: u64,
    },
    /// Ask the server thread to exit. Executed in-process, it does nothing.
    Stop,
}

impl Operation {
    /// Short name of the operation, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Open(_) => "open",
            Operation::OpenAs { .. } => "open as",
            Operation::Close { .. } => "close",
            Operation::AddressRange { .. } => "address range",
            Operation::Alloc { .. } => "alloc",
            Operation::Free { .. } => "free",
            Operation::IsAllocated { .. } => "is allocated",
            Operation::Reserve { .. } => "reserve",
            Operation::Unreserve { .. } => "unreserve",
            Operation::IsReserved { .. } => "is reserved",
            Operation::ReserveIfNotAllocated { .. } => "reserve if not allocated",
            Operation::Stop => "stop",
        }
    }

    /// Whether the operation opens or closes an allocator.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Operation::Open(_)
                | Operation::OpenAs { .. }
                | Operation::Close { .. }
                | Operation::Stop
        )
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "<{}>", self.name())?;

        match self {
            Operation::Open(options) => write!(
                f,
                " device: {}, {}, range: [{:#x}, {:#x}), type: {:?}, strategy: {:?}",
                options.device,
                options.space,
                options.start,
                options.end,
                options.allocator_type,
                options.strategy
            ),
            Operation::OpenAs { handle, new_vm } => write!(f, " ahnd: {handle}, new vm: {new_vm}"),
            Operation::Close { handle } | Operation::AddressRange { handle } => {
                write!(f, " ahnd: {handle}")
            }
            Operation::Alloc {
                handle,
                object,
                size,
                alignment,
                strategy,
            } => write!(
                f,
                " ahnd: {handle}, handle: {object}, size: {size:#x}, alignment: {alignment:#x}, strategy: {strategy:?}"
            ),
            Operation::Free { handle, object } => write!(f, " ahnd: {handle}, handle: {object}"),
            Operation::IsAllocated {
                handle,
                object,
                size,
                offset,
            } => write!(
                f,
                " ahnd: {handle}, handle: {object}, size: {size:#x}, offset: {offset:#x}"
            ),
            Operation::Reserve {
                handle,
                object,
                start,
                end,
            }
            | Operation::Unreserve {
                handle,
                object,
                start,
                end,
            }
            | Operation::ReserveIfNotAllocated {
                handle,
                object,
                start,
                end,
            } => write!(
                f,
                " ahnd: {handle}, handle: {object}, start: {start:#x}, end: {end:#x}"
            ),
            Operation::IsReserved { handle, start, end } => {
                write!(f, " ahnd: {handle}, start: {start:#x}, end: {end:#x}")
            }
            Operation::Stop => Ok(()),
        }
    }
}

/// The result of an [Operation], mirroring its variant.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Open(AllocatorHandle),
    OpenAs(AllocatorHandle),
    Close { is_empty: bool },
    AddressRange { start: u64, end: u64 },
    Alloc { offset: Option<u64> },
    Free { freed: bool },
    IsAllocated { allocated: bool },
    Reserve { reserved: bool },
    Unreserve { unreserved: bool },
    IsReserved { reserved: bool },
    ReserveIfNotAllocated(ReserveOutcome),
    Stopped,
    /// The operation couldn't be executed.
    Failed(AllocatorError),
}

impl Reply {
    /// Short name of the reply, matching [Operation::name].
    pub fn name(&self) -> &'static str {
        match self {
            Reply::Open(_) => "open",
            Reply::OpenAs(_) => "open as",
            Reply::Close { .. } => "close",
            Reply::AddressRange { .. } => "address range",
            Reply::Alloc { .. } => "alloc",
            Reply::Free { .. } => "free",
            Reply::IsAllocated { .. } => "is allocated",
            Reply::Reserve { .. } => "reserve",
            Reply::Unreserve { .. } => "unreserve",
            Reply::IsReserved { .. } => "is reserved",
            Reply::ReserveIfNotAllocated(_) => "reserve if not allocated",
            Reply::Stopped => "stop",
            Reply::Failed(_) => "failed",
        }
    }

    /// Turn [Reply::Failed] into an error.
    pub fn into_result(self) -> Result<Self, AllocatorError> {
        match self {
            Reply::Failed(err) => Err(err),
            reply => Ok(reply),
        }
    }

    /// The error for a reply that doesn't answer the expected operation.
    pub fn unexpected(self, expected: &str) -> AllocatorError {
        AllocatorError::UnexpectedReply {
            expected: expected.to_string(),
            got: String::from(self.name()),
        }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Reply::Open(handle) | Reply::OpenAs(handle) => write!(f, "ahnd: {handle}"),
            Reply::Close { is_empty } => write!(f, "is_empty: {is_empty}"),
            Reply::AddressRange { start, end } => write!(f, "start: {start:#x}, end: {end:#x}"),
            Reply::Alloc { offset: Some(offset) } => write!(f, "offset: {offset:#x}"),
            Reply::Alloc { offset: None } => write!(f, "offset: invalid"),
            Reply::Free { freed } => write!(f, "freed: {freed}"),
            Reply::IsAllocated { allocated } => write!(f, "allocated: {allocated}"),
            Reply::Reserve { reserved } | Reply::IsReserved { reserved } => {
                write!(f, "reserved: {reserved}")
            }
            Reply::Unreserve { unreserved } => write!(f, "unreserved: {unreserved}"),
            Reply::ReserveIfNotAllocated(outcome) => write!(
                f,
                "allocated: {}, reserved: {}",
                outcome.allocated, outcome.reserved
            ),
            Reply::Stopped => write!(f, "stopped"),
            Reply::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}
