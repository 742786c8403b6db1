use super::{AllocStrategy, AllocatorBackend, AllocatorStats, align_up};

/// Keep the low 256 KiB clear, for negative deltas.
pub(crate) const BIAS: u64 = 256 << 10;

/// Bump allocator for callers relying on relocations.
///
/// Offsets grow until the next object would pass the end of the range, then wrap back
/// to the start. Nothing is tracked, so ranges may be handed out twice.
#[derive(Debug)]
pub struct RelocAllocator {
    start: u64,
    end: u64,
    offset: u64,
    allocated_objects: u64,
}

impl RelocAllocator {
    /// Create an allocator over `[max(start, 256 KiB), end)`.
    pub fn new(start: u64, end: u64) -> Self {
        log::debug!("Using reloc allocator");

        let start = start.max(BIAS);
        assert!(start < end, "Allocator range [{start:#x}, {end:#x}) is empty");

        Self {
            start,
            end,
            offset: start,
            allocated_objects: 0,
        }
    }
}

impl AllocatorBackend for RelocAllocator {
    fn address_range(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    fn alloc(
        &mut self,
        _handle: u32,
        size: u64,
        alignment: u64,
        _strategy: AllocStrategy,
    ) -> Option<u64> {
        let fits = |offset: u64| offset.checked_add(size).is_some_and(|end| end <= self.end);

        let mut offset = align_up(self.offset, alignment);
        if !fits(offset) {
            offset = align_up(self.start, alignment);
        }
        if !fits(offset) {
            return None;
        }

        self.offset = offset + size;
        self.allocated_objects += 1;

        Some(offset)
    }

    fn free(&mut self, _handle: u32) -> bool {
        self.allocated_objects = self.allocated_objects.saturating_sub(1);
        false
    }

    fn is_allocated(&self, _handle: u32, _size: u64, _offset: u64) -> bool {
        false
    }

    fn reserve(&mut self, _handle: u32, _start: u64, _end: u64) -> bool {
        false
    }

    fn unreserve(&mut self, _handle: u32, _start: u64, _end: u64) -> bool {
        false
    }

    fn is_reserved(&self, _start: u64, _end: u64) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.allocated_objects == 0
    }

    fn print(&self, _full: bool) {
        log::info!(
            "Reloc allocator on [{:#x} : {:#x}], allocated objects: {}",
            self.start,
            self.end,
            self.allocated_objects
        );
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            total_size: self.end - self.start,
            free_size: self.end - self.start,
            allocated_objects: self.allocated_objects,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_and_wraps_around() {
        let mut allocator = RelocAllocator::new(0, BIAS + 0x3000);

        assert_eq!(allocator.address_range(), (BIAS, BIAS + 0x3000));
        assert_eq!(allocator.alloc(1, 0x1000, 0x1000, AllocStrategy::None), Some(BIAS));
        assert_eq!(allocator.alloc(2, 0x1000, 0x1000, AllocStrategy::None), Some(BIAS + 0x1000));
        assert_eq!(allocator.alloc(3, 0x2000, 0x1000, AllocStrategy::None), Some(BIAS));
        assert_eq!(allocator.alloc(4, 0x4000, 0x1000, AllocStrategy::None), None);
        assert_eq!(allocator.stats().allocated_objects, 3);
    }

    #[test]
    fn never_tracks_objects() {
        let mut allocator = RelocAllocator::new(0, 1 << 32);
        let offset = allocator.alloc(1, 0x1000, 0x1000, AllocStrategy::None).unwrap();

        assert!(!allocator.is_allocated(1, 0x1000, offset));
        assert!(!allocator.reserve(1, offset, offset + 0x1000));
        assert!(!allocator.is_empty());
        assert!(!allocator.free(1));
        assert!(allocator.is_empty());
    }
}
