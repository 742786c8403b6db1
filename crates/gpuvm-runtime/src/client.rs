use crate::{
    allocator::{AllocStrategy, AllocatorType},
    channel::AllocatorChannel,
    error::AllocatorError,
    id::{AddressSpace, AllocatorHandle, DeviceId},
    registry::{OpenOptions, ReserveOutcome},
    transport::{Operation, Reply},
};
use alloc::sync::Arc;

/// The AllocatorClient is the entry point of the allocator API.
///
/// It behaves the same in-process and in multiprocess mode, only its channel differs.
/// It should be obtained from an [AllocatorService](crate::service::AllocatorService).
#[derive(Clone, Debug)]
pub struct AllocatorClient {
    channel: Arc<dyn AllocatorChannel>,
}

impl AllocatorClient {
    /// Create a client calling through the given channel.
    pub fn new(channel: Arc<dyn AllocatorChannel>) -> Self {
        Self { channel }
    }

    /// Open the high-to-low allocator of `<device, ctx>` over the default range.
    pub fn open(
        &self,
        device: DeviceId,
        ctx: u32,
        allocator_type: AllocatorType,
    ) -> Result<AllocatorHandle, AllocatorError> {
        self.open_full(device, ctx, 0, 0, allocator_type, AllocStrategy::HighToLow)
    }

    /// Open the allocator of `<device, ctx>` over `[start, end)`.
    pub fn open_full(
        &self,
        device: DeviceId,
        ctx: u32,
        start: u64,
        end: u64,
        allocator_type: AllocatorType,
        strategy: AllocStrategy,
    ) -> Result<AllocatorHandle, AllocatorError> {
        self.open_with(OpenOptions::new(
            device,
            AddressSpace::Context(ctx),
            start,
            end,
            allocator_type,
            strategy,
        ))
    }

    /// Open the high-to-low allocator of `<device, vm>` over the default range.
    pub fn open_vm(
        &self,
        device: DeviceId,
        vm: u32,
        allocator_type: AllocatorType,
    ) -> Result<AllocatorHandle, AllocatorError> {
        self.open_vm_full(device, vm, 0, 0, allocator_type, AllocStrategy::HighToLow)
    }

    /// Open the allocator of `<device, vm>` over `[start, end)`.
    pub fn open_vm_full(
        &self,
        device: DeviceId,
        vm: u32,
        start: u64,
        end: u64,
        allocator_type: AllocatorType,
        strategy: AllocStrategy,
    ) -> Result<AllocatorHandle, AllocatorError> {
        self.open_with(OpenOptions::new(
            device,
            AddressSpace::Vm(vm),
            start,
            end,
            allocator_type,
            strategy,
        ))
    }

    /// Open an allocator described by `options`.
    pub fn open_with(&self, options: OpenOptions) -> Result<AllocatorHandle, AllocatorError> {
        match self.channel.call(Operation::Open(options))? {
            Reply::Open(handle) => Ok(handle),
            reply => Err(reply.unexpected("open")),
        }
    }

    /// Bind `new_vm` to the allocator of `handle`, sharing its address space.
    pub fn open_as(
        &self,
        handle: AllocatorHandle,
        new_vm: u32,
    ) -> Result<AllocatorHandle, AllocatorError> {
        match self.channel.call(Operation::OpenAs { handle, new_vm })? {
            Reply::OpenAs(handle) => Ok(handle),
            reply => Err(reply.unexpected("open as")),
        }
    }

    /// Release an open-handle, returning whether the allocator was destroyed empty.
    pub fn close(&self, handle: AllocatorHandle) -> Result<bool, AllocatorError> {
        match self.channel.call(Operation::Close { handle })? {
            Reply::Close { is_empty } => Ok(is_empty),
            reply => Err(reply.unexpected("close")),
        }
    }

    /// The `[start, end)` range the allocator hands out addresses from.
    pub fn address_range(&self, handle: AllocatorHandle) -> Result<(u64, u64), AllocatorError> {
        match self.channel.call(Operation::AddressRange { handle })? {
            Reply::AddressRange { start, end } => Ok((start, end)),
            reply => Err(reply.unexpected("address range")),
        }
    }

    /// Allocate `size` bytes for `object` with the default strategy of the allocator.
    ///
    /// Returns `None` when the address space is exhausted. Allocating an object twice
    /// returns its current offset.
    pub fn alloc(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        alignment: u64,
    ) -> Result<Option<u64>, AllocatorError> {
        self.alloc_with_strategy(handle, object, size, alignment, AllocStrategy::None)
    }

    /// Allocate `size` bytes for `object` with the given strategy.
    pub fn alloc_with_strategy(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        alignment: u64,
        strategy: AllocStrategy,
    ) -> Result<Option<u64>, AllocatorError> {
        let op = Operation::Alloc {
            handle,
            object,
            size,
            alignment,
            strategy,
        };

        match self.channel.call(op)? {
            Reply::Alloc { offset } => Ok(offset),
            reply => Err(reply.unexpected("alloc")),
        }
    }

    /// Allocate like [alloc](Self::alloc).
    ///
    /// # Panics
    ///
    /// When the address space is exhausted.
    pub fn alloc_or_panic(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        alignment: u64,
    ) -> Result<u64, AllocatorError> {
        match self.alloc(handle, object, size, alignment)? {
            Some(offset) => Ok(offset),
            None => panic!(
                "Can't allocate {size:#x} bytes for handle {object} on allocator {handle}"
            ),
        }
    }

    /// Free the range of `object`, returning whether anything was freed.
    pub fn free(&self, handle: AllocatorHandle, object: u32) -> Result<bool, AllocatorError> {
        match self.channel.call(Operation::Free { handle, object })? {
            Reply::Free { freed } => Ok(freed),
            reply => Err(reply.unexpected("free")),
        }
    }

    /// Whether `object` is allocated with exactly this size and offset.
    pub fn is_allocated(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        offset: u64,
    ) -> Result<bool, AllocatorError> {
        let op = Operation::IsAllocated {
            handle,
            object,
            size,
            offset,
        };

        match self.channel.call(op)? {
            Reply::IsAllocated { allocated } => Ok(allocated),
            reply => Err(reply.unexpected("is allocated")),
        }
    }

    /// Reserve `[offset, offset + size)`.
    pub fn reserve(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        offset: u64,
    ) -> Result<bool, AllocatorError> {
        let op = Operation::Reserve {
            handle,
            object,
            start: offset,
            end: offset.wrapping_add(size),
        };

        match self.channel.call(op)? {
            Reply::Reserve { reserved } => Ok(reserved),
            reply => Err(reply.unexpected("reserve")),
        }
    }

    /// Release the reservation `[offset, offset + size)` made for `object`.
    pub fn unreserve(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        offset: u64,
    ) -> Result<bool, AllocatorError> {
        let op = Operation::Unreserve {
            handle,
            object,
            start: offset,
            end: offset.wrapping_add(size),
        };

        match self.channel.call(op)? {
            Reply::Unreserve { unreserved } => Ok(unreserved),
            reply => Err(reply.unexpected("unreserve")),
        }
    }

    /// Whether `[offset, offset + size)` is exactly one reservation.
    pub fn is_reserved(
        &self,
        handle: AllocatorHandle,
        size: u64,
        offset: u64,
    ) -> Result<bool, AllocatorError> {
        let op = Operation::IsReserved {
            handle,
            start: offset,
            end: offset.wrapping_add(size),
        };

        match self.channel.call(op)? {
            Reply::IsReserved { reserved } => Ok(reserved),
            reply => Err(reply.unexpected("is reserved")),
        }
    }

    /// Reserve `[offset, offset + size)` unless `object` is allocated exactly there.
    pub fn reserve_if_not_allocated(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        offset: u64,
    ) -> Result<ReserveOutcome, AllocatorError> {
        let op = Operation::ReserveIfNotAllocated {
            handle,
            object,
            start: offset,
            end: offset.wrapping_add(size),
        };

        match self.channel.call(op)? {
            Reply::ReserveIfNotAllocated(outcome) => Ok(outcome),
            reply => Err(reply.unexpected("reserve if not allocated")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::MutexChannel, config::GlobalConfig, registry::Registry};

    #[derive(Debug)]
    struct WrongReplyChannel;

    impl AllocatorChannel for WrongReplyChannel {
        fn call(&self, _op: Operation) -> Result<Reply, AllocatorError> {
            Ok(Reply::Stopped)
        }
    }

    fn client() -> AllocatorClient {
        let registry = Arc::new(Registry::new(Arc::new(GlobalConfig::default())));
        AllocatorClient::new(Arc::new(MutexChannel::new(registry)))
    }

    #[test]
    fn reservations_take_size_and_offset() {
        let client = client();
        let ahnd = client
            .open_full(
                DeviceId(0),
                0,
                0,
                0x10000,
                AllocatorType::Simple,
                AllocStrategy::HighToLow,
            )
            .unwrap();

        assert!(client.reserve(ahnd, 0xffffffff, 0x1000, 0x2000).unwrap());
        assert!(client.is_reserved(ahnd, 0x1000, 0x2000).unwrap());
        assert!(!client.is_allocated(ahnd, 1, 0x1000, 0x2000).unwrap());
        assert!(!client.unreserve(ahnd, 0xffffffff, 0xfff, 0x2000).unwrap());
        assert!(!client.unreserve(ahnd, 1, 0x1000, 0x2000).unwrap());
        assert!(client.unreserve(ahnd, 0xffffffff, 0x1000, 0x2000).unwrap());
        assert!(client.close(ahnd).unwrap());
    }

    #[test]
    fn alloc_returns_none_when_exhausted() {
        let client = client();
        let ahnd = client
            .open_vm_full(
                DeviceId(0),
                1,
                0,
                0x2000,
                AllocatorType::Simple,
                AllocStrategy::LowToHigh,
            )
            .unwrap();

        assert_eq!(client.alloc(ahnd, 1, 0x1000, 0x1000), Ok(Some(0)));
        assert_eq!(client.alloc_or_panic(ahnd, 2, 0x1000, 0x1000), Ok(0x1000));
        assert_eq!(client.alloc(ahnd, 3, 0x1000, 0x1000), Ok(None));
    }

    #[test]
    #[should_panic(expected = "Can't allocate")]
    fn alloc_or_panic_panics_when_exhausted() {
        let client = client();
        let ahnd = client
            .open_vm_full(
                DeviceId(0),
                1,
                0,
                0x1000,
                AllocatorType::Simple,
                AllocStrategy::HighToLow,
            )
            .unwrap();

        client.alloc_or_panic(ahnd, 1, 0x2000, 0x1000).ok();
    }

    #[test]
    fn mismatched_reply_is_an_error() {
        let client = AllocatorClient::new(Arc::new(WrongReplyChannel));

        assert_eq!(
            client.free(AllocatorHandle::from_raw(1), 1),
            Err(AllocatorError::UnexpectedReply {
                expected: "free".into(),
                got: "stop".into(),
            })
        );
    }
}
