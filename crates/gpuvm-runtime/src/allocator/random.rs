use super::{AllocStrategy, AllocatorBackend, AllocatorStats, align_up, reloc::BIAS};
use gpuvm_common::rand::{Rng, SmallRng, get_fixed_rng};

const RETRIES: u32 = 8;

/// Allocator picking random aligned offsets, for callers relying on relocations.
///
/// Nothing is tracked, so ranges may be handed out twice.
#[derive(Debug)]
pub struct RandomAllocator {
    rng: SmallRng,
    start: u64,
    end: u64,
    allocated_objects: u64,
}

impl RandomAllocator {
    /// Create an allocator over `[max(start, 256 KiB), end)` seeded from entropy.
    pub fn new(start: u64, end: u64) -> Self {
        Self::with_seed(start, end, gpuvm_common::rand::gen_random())
    }

    /// Create an allocator with a reproducible offset sequence.
    pub fn with_seed(start: u64, end: u64, seed: u64) -> Self {
        log::debug!("Using random allocator");

        let start = start.max(BIAS);
        assert!(start < end, "Allocator range [{start:#x}, {end:#x}) is empty");

        Self {
            rng: get_fixed_rng(seed),
            start,
            end,
            allocated_objects: 0,
        }
    }
}

impl AllocatorBackend for RandomAllocator {
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
        for attempt in 1..=RETRIES {
            // The last attempt starts at the range start, the most likely to fit.
            let offset = match attempt {
                RETRIES => 0,
                _ => self.rng.random::<u64>(),
            };
            let offset = align_up(offset % (self.end - self.start) + self.start, alignment);

            if offset.checked_add(size).is_some_and(|end| end <= self.end) {
                self.allocated_objects += 1;
                return Some(offset);
            }
        }

        None
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
            "Random allocator on [{:#x} : {:#x}], allocated objects: {}",
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
