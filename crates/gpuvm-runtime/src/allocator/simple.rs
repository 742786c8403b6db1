use super::{
    AllocStrategy, AllocatorBackend, AllocatorStats, decanonical, reservation_range,
    vma_heap::VmaHeap,
};
use gpuvm_common::map::{GoldenRatio32, GoldenRatio64, OpenMap};

/// A range owned by an object handle, allocated or reserved.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// The object handle owning the range.
    pub handle: u32,
    /// First address of the range.
    pub offset: u64,
    /// Size of the range.
    pub size: u64,
}

impl Record {
    fn matches(&self, handle: u32, size: u64, offset: u64) -> bool {
        self.handle == handle
            && self.size == size
            && decanonical(self.offset) == decanonical(offset)
    }
}

/// Hole-tracking allocator with per-handle allocations and address-keyed reservations.
#[derive(Debug)]
pub struct SimpleAllocator {
    objects: OpenMap<u32, Record, GoldenRatio32>,
    reserved: OpenMap<u64, Record, GoldenRatio64>,
    heap: VmaHeap,
    start: u64,
    end: u64,
    total_size: u64,
    allocated_size: u64,
    allocated_objects: u64,
    reserved_size: u64,
    reserved_areas: u64,
}

impl SimpleAllocator {
    /// Create an allocator over `[start, end)`.
    pub fn new(start: u64, end: u64, strategy: AllocStrategy) -> Self {
        assert!(start < end, "Allocator range [{start:#x}, {end:#x}) is empty");
        log::debug!("Using simple allocator on [{start:#x}, {end:#x})");

        let total_size = end - start;

        Self {
            objects: OpenMap::new(),
            reserved: OpenMap::new(),
            heap: VmaHeap::new(start, total_size, strategy),
            start,
            end,
            total_size,
            allocated_size: 0,
            allocated_objects: 0,
            reserved_size: 0,
            reserved_areas: 0,
        }
    }

    /// The free list of the allocator.
    pub fn heap(&self) -> &VmaHeap {
        &self.heap
    }

    /// Iterate over the allocation records.
    pub fn objects(&self) -> impl Iterator<Item = &Record> {
        self.objects.values()
    }

    /// Iterate over the reservation records.
    pub fn reservations(&self) -> impl Iterator<Item = &Record> {
        self.reserved.values()
    }
}

impl AllocatorBackend for SimpleAllocator {
    fn address_range(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    fn alloc(
        &mut self,
        handle: u32,
        size: u64,
        alignment: u64,
        strategy: AllocStrategy,
    ) -> Option<u64> {
        assert!(handle != 0, "Object handle 0 is not valid");

        if let Some(record) = self.objects.get(&handle) {
            assert_eq!(
                record.size, size,
                "Object {handle} is already allocated with another size"
            );
            return Some(record.offset);
        }

        let offset = self.heap.alloc(size, alignment, strategy)?;

        self.objects.insert(handle, Record::new(handle, offset, size));
        self.allocated_objects += 1;
        self.allocated_size += size;

        Some(offset)
    }

    fn free(&mut self, handle: u32) -> bool {
        let Some(record) = self.objects.remove(&handle) else {
            return false;
        };

        self.heap.free(record.offset, record.size);
        self.allocated_objects -= 1;
        self.allocated_size -= record.size;

        true
    }

    fn is_allocated(&self, handle: u32, size: u64, offset: u64) -> bool {
        assert!(handle != 0, "Object handle 0 is not valid");

        self.objects
            .get(&handle)
            .is_some_and(|record| record.matches(handle, size, offset))
    }

    fn reserve(&mut self, handle: u32, start: u64, end: u64) -> bool {
        let (start, size) = reservation_range(start, end);

        if !self.heap.alloc_at(start, size) {
            log::debug!("Failed to reserve {start:#x} + {size:#x}");
            return false;
        }

        self.reserved.insert(start, Record::new(handle, start, size));
        self.reserved_areas += 1;
        self.reserved_size += size;

        true
    }

    fn unreserve(&mut self, handle: u32, start: u64, end: u64) -> bool {
        let (start, size) = reservation_range(start, end);

        let Some(record) = self.reserved.get(&start) else {
            log::debug!("Only reserved blocks can be unreserved");
            return false;
        };

        if record.size != size {
            log::debug!("Only the whole block unreservation allowed");
            return false;
        }

        if record.handle != handle {
            log::debug!(
                "Handle {handle} doesn't match reservation handle: {}",
                record.handle
            );
            return false;
        }

        self.reserved.remove(&start);
        self.reserved_areas -= 1;
        self.reserved_size -= size;
        self.heap.free(start, size);

        true
    }

    fn is_reserved(&self, start: u64, end: u64) -> bool {
        let (start, size) = reservation_range(start, end);

        self.reserved
            .get(&start)
            .is_some_and(|record| record.offset == start && record.size == size)
    }

    fn is_empty(&self) -> bool {
        log::debug!(
            "Simple allocator objects: {}, reserved areas: {}",
            self.allocated_objects,
            self.reserved_areas
        );

        self.allocated_objects == 0 && self.reserved_areas == 0
    }

    fn print(&self, full: bool) {
        log::info!(
            "Simple allocator on [{:#x} : {:#x}]:",
            self.start,
            self.end
        );

        let mut total_free = 0;

        if full {
            log::info!("holes:");
            for hole in self.heap.holes() {
                log::info!(
                    "offset = {0} ({0:#x}), size = {1} ({1:#x})",
                    hole.offset,
                    hole.size
                );
                total_free += hole.size;
            }
            assert!(total_free <= self.total_size);
            log::info!(
                "total_free: {total_free:#x}, total_size: {:#x}, allocated_size: {:#x}, reserved_size: {:#x}",
                self.total_size,
                self.allocated_size,
                self.reserved_size
            );
            assert_eq!(
                total_free,
                self.total_size - self.allocated_size - self.reserved_size
            );

            let (mut allocated_objects, mut allocated_size) = (0, 0);
            log::info!("objects:");
            for record in self.objects.values() {
                log::info!(
                    "handle = {}, offset = {1} ({1:#x}), size = {2} ({2:#x})",
                    record.handle,
                    record.offset,
                    record.size
                );
                allocated_objects += 1;
                allocated_size += record.size;
            }
            assert_eq!(self.allocated_size, allocated_size);
            assert_eq!(self.allocated_objects, allocated_objects);

            let (mut reserved_areas, mut reserved_size) = (0, 0);
            log::info!("reserved areas:");
            for record in self.reserved.values() {
                log::info!(
                    "offset = {0} ({0:#x}), size = {1} ({1:#x})",
                    record.offset,
                    record.size
                );
                reserved_areas += 1;
                reserved_size += record.size;
            }
            assert_eq!(self.reserved_areas, reserved_areas);
            assert_eq!(self.reserved_size, reserved_size);
        } else {
            total_free = self.heap.free_size();
        }

        log::info!(
            "free space: {total_free}B ({total_free:#x}) ({:.2}% full)\nallocated objects: {}, reserved areas: {}",
            (self.total_size - total_free) as f64 / self.total_size as f64 * 100.0,
            self.allocated_objects,
            self.reserved_areas
        );
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            total_size: self.total_size,
            free_size: self.heap.free_size(),
            allocated_objects: self.allocated_objects,
            allocated_size: self.allocated_size,
            reserved_areas: self.reserved_areas,
            reserved_size: self.reserved_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuvm_common::rand::{Rng, get_fixed_rng};

    fn allocator() -> SimpleAllocator {
        SimpleAllocator::new(0, 0x10000, AllocStrategy::HighToLow)
    }

    fn assert_conserved(allocator: &SimpleAllocator) {
        let stats = allocator.stats();
        assert_eq!(
            stats.free_size + stats.allocated_size + stats.reserved_size,
            stats.total_size
        );
    }

    #[test_log::test]
    fn allocation_scenario() {
        let mut allocator = allocator();

        assert_eq!(allocator.alloc(1, 0x1000, 0x1000, AllocStrategy::None), Some(0xF000));
        assert_eq!(allocator.alloc(2, 0x1000, 0x1000, AllocStrategy::None), Some(0xE000));
        assert!(allocator.free(1));
        assert_eq!(allocator.alloc(3, 0x2000, 0x1000, AllocStrategy::None), Some(0xC000));

        allocator.print(true);
        assert_conserved(&allocator);
    }

    #[test]
    fn realloc_same_handle_is_idempotent() {
        let mut allocator = allocator();

        let first = allocator.alloc(7, 0x1000, 0x1000, AllocStrategy::None);
        let free_size = allocator.stats().free_size;
        let second = allocator.alloc(7, 0x1000, 0x1000, AllocStrategy::None);

        assert_eq!(first, second);
        assert_eq!(allocator.stats().free_size, free_size);
        assert_eq!(allocator.stats().allocated_objects, 1);
    }

    #[test]
    #[should_panic]
    fn realloc_with_other_size_is_invalid() {
        let mut allocator = allocator();

        allocator.alloc(7, 0x1000, 0x1000, AllocStrategy::None);
        allocator.alloc(7, 0x2000, 0x1000, AllocStrategy::None);
    }

    #[test]
    fn alloc_free_round_trip_restores_free_space() {
        let mut allocator = allocator();
        let free_size = allocator.stats().free_size;

        allocator.alloc(1, 0x3000, 0x1000, AllocStrategy::None);
        assert!(allocator.free(1));
        assert!(!allocator.free(1));

        assert_eq!(allocator.stats().free_size, free_size);
        assert_eq!(allocator.heap().num_holes(), 1);
        assert!(allocator.alloc(1, 0x3000, 0x1000, AllocStrategy::None).is_some());
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut allocator = allocator();

        assert!(allocator.alloc(1, 0x10000, 0x1000, AllocStrategy::None).is_some());
        assert_eq!(allocator.alloc(2, 0x1000, 0x1000, AllocStrategy::None), None);
        assert_eq!(allocator.stats().allocated_objects, 1);
    }

    #[test]
    fn is_allocated_compares_decanonical_offsets() {
        let mut allocator = SimpleAllocator::new(0, 1 << 48, AllocStrategy::HighToLow);
        let offset = allocator
            .alloc(1, 0x1000, 0x1000, AllocStrategy::None)
            .unwrap();

        assert_eq!(offset, (1 << 48) - 0x1000);
        assert!(allocator.is_allocated(1, 0x1000, offset));
        assert!(allocator.is_allocated(1, 0x1000, super::super::canonical(offset)));
        assert!(!allocator.is_allocated(1, 0x2000, offset));
        assert!(!allocator.is_allocated(2, 0x1000, offset));
    }

    #[test]
    fn reserved_is_not_allocated() {
        let mut allocator = allocator();

        assert!(allocator.reserve(0xffffffff, 0x2000, 0x3000));
        assert!(allocator.is_reserved(0x2000, 0x3000));
        assert!(!allocator.is_allocated(1, 0x1000, 0x2000));
        assert!(!allocator.reserve(1, 0x2800, 0x3800));
        assert!(!allocator.is_empty());
    }

    #[test_log::test]
    fn unreserve_requires_exact_match() {
        let mut allocator = allocator();
        assert!(allocator.reserve(5, 0x2000, 0x4000));
        let free_size = allocator.stats().free_size;

        assert!(!allocator.unreserve(5, 0x2000, 0x3fff));
        assert!(!allocator.unreserve(6, 0x2000, 0x4000));
        assert!(!allocator.unreserve(5, 0x3000, 0x4000));
        assert_eq!(allocator.stats().free_size, free_size);
        assert!(allocator.is_reserved(0x2000, 0x4000));

        assert!(allocator.unreserve(5, 0x2000, 0x4000));
        assert!(!allocator.is_reserved(0x2000, 0x4000));
        assert!(allocator.is_empty());
        assert_eq!(allocator.heap().num_holes(), 1);
    }

    #[test]
    fn reserve_up_to_top_of_address_space() {
        let mut allocator = SimpleAllocator::new(0, 1 << 48, AllocStrategy::HighToLow);
        let start = (1 << 48) - 0x2000;

        // End wraps to 0 once decanonicalized, which stands for 2^48.
        assert!(allocator.reserve(1, super::super::canonical(start), 0xffff_0000_0000_0000));
        assert!(allocator.is_reserved(start, 1 << 48));
        assert_eq!(allocator.stats().reserved_size, 0x2000);
    }

    #[test]
    fn random_operations_never_overlap() {
        let mut rng = get_fixed_rng(11);
        let mut allocator = SimpleAllocator::new(0, 0x40_0000, AllocStrategy::HighToLow);
        let mut reserved: Vec<(u64, u64)> = Vec::new();

        for _ in 0..3000 {
            match rng.random_range(0..4) {
                0 => {
                    let handle = rng.random_range(1..64);
                    let size = 0x1000 * (handle as u64 % 8 + 1);
                    allocator.alloc(handle, size, 0x1000, AllocStrategy::None);
                }
                1 => {
                    allocator.free(rng.random_range(1..64));
                }
                2 => {
                    let start = rng.random_range(0..0x400u64) * 0x1000;
                    let end = start + 0x1000 * rng.random_range(1..4);
                    if end <= 0x40_0000 && allocator.reserve(0, start, end) {
                        reserved.push((start, end));
                    }
                }
                _ => {
                    if !reserved.is_empty() {
                        let index = rng.random_range(0..reserved.len());
                        let (start, end) = reserved.swap_remove(index);
                        assert!(allocator.unreserve(0, start, end));
                    }
                }
            }

            assert_conserved(&allocator);
        }

        let mut ranges: Vec<(u64, u64)> = allocator
            .objects()
            .chain(allocator.reservations())
            .map(|record| (record.offset, record.offset + record.size))
            .collect();
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{pair:x?} overlap");
        }

        allocator.print(true);
    }
}
