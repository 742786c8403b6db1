use super::{
    AllocStrategy, AllocatorBackend, AllocatorStats, AllocatorType, random::RandomAllocator,
    reloc::RelocAllocator, simple::SimpleAllocator,
};

/// An allocator back-end chosen at open time.
#[derive(Debug)]
pub enum DynamicAllocator {
    /// See [SimpleAllocator].
    Simple(SimpleAllocator),
    /// See [RelocAllocator].
    Reloc(RelocAllocator),
    /// See [RandomAllocator].
    Random(RandomAllocator),
}

impl DynamicAllocator {
    /// Create the back-end of the given type over `[start, end)`.
    ///
    /// # Panics
    /// Panics on [AllocatorType::None], which cannot back an allocator.
    pub fn new(kind: AllocatorType, start: u64, end: u64, strategy: AllocStrategy) -> Self {
        match kind {
            AllocatorType::None => panic!("We cannot use NONE allocator"),
            AllocatorType::Simple => Self::Simple(SimpleAllocator::new(start, end, strategy)),
            AllocatorType::Reloc => Self::Reloc(RelocAllocator::new(start, end)),
            AllocatorType::Random => Self::Random(RandomAllocator::new(start, end)),
        }
    }

    /// The type of the back-end.
    pub fn kind(&self) -> AllocatorType {
        match self {
            DynamicAllocator::Simple(_) => AllocatorType::Simple,
            DynamicAllocator::Reloc(_) => AllocatorType::Reloc,
            DynamicAllocator::Random(_) => AllocatorType::Random,
        }
    }
}

impl AllocatorBackend for DynamicAllocator {
    fn address_range(&self) -> (u64, u64) {
        match self {
            DynamicAllocator::Simple(m) => m.address_range(),
            DynamicAllocator::Reloc(m) => m.address_range(),
            DynamicAllocator::Random(m) => m.address_range(),
        }
    }

    fn alloc(
        &mut self,
        handle: u32,
        size: u64,
        alignment: u64,
        strategy: AllocStrategy,
    ) -> Option<u64> {
        match self {
            DynamicAllocator::Simple(m) => m.alloc(handle, size, alignment, strategy),
            DynamicAllocator::Reloc(m) => m.alloc(handle, size, alignment, strategy),
            DynamicAllocator::Random(m) => m.alloc(handle, size, alignment, strategy),
        }
    }

    fn free(&mut self, handle: u32) -> bool {
        match self {
            DynamicAllocator::Simple(m) => m.free(handle),
            DynamicAllocator::Reloc(m) => m.free(handle),
            DynamicAllocator::Random(m) => m.free(handle),
        }
    }

    fn is_allocated(&self, handle: u32, size: u64, offset: u64) -> bool {
        match self {
            DynamicAllocator::Simple(m) => m.is_allocated(handle, size, offset),
            DynamicAllocator::Reloc(m) => m.is_allocated(handle, size, offset),
            DynamicAllocator::Random(m) => m.is_allocated(handle, size, offset),
        }
    }

    fn reserve(&mut self, handle: u32, start: u64, end: u64) -> bool {
        match self {
            DynamicAllocator::Simple(m) => m.reserve(handle, start, end),
            DynamicAllocator::Reloc(m) => m.reserve(handle, start, end),
            DynamicAllocator::Random(m) => m.reserve(handle, start, end),
        }
    }

    fn unreserve(&mut self, handle: u32, start: u64, end: u64) -> bool {
        match self {
            DynamicAllocator::Simple(m) => m.unreserve(handle, start, end),
            DynamicAllocator::Reloc(m) => m.unreserve(handle, start, end),
            DynamicAllocator::Random(m) => m.unreserve(handle, start, end),
        }
    }

    fn is_reserved(&self, start: u64, end: u64) -> bool {
        match self {
            DynamicAllocator::Simple(m) => m.is_reserved(start, end),
            DynamicAllocator::Reloc(m) => m.is_reserved(start, end),
            DynamicAllocator::Random(m) => m.is_reserved(start, end),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            DynamicAllocator::Simple(m) => m.is_empty(),
            DynamicAllocator::Reloc(m) => m.is_empty(),
            DynamicAllocator::Random(m) => m.is_empty(),
        }
    }

    fn print(&self, full: bool) {
        match self {
            DynamicAllocator::Simple(m) => m.print(full),
            DynamicAllocator::Reloc(m) => m.print(full),
            DynamicAllocator::Random(m) => m.print(full),
        }
    }

    fn stats(&self) -> AllocatorStats {
        match self {
            DynamicAllocator::Simple(m) => m.stats(),
            DynamicAllocator::Reloc(m) => m.stats(),
            DynamicAllocator::Random(m) => m.stats(),
        }
    }
}
