use super::AllocStrategy;
use alloc::collections::BTreeMap;

/// A maximal free range of a [VmaHeap].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hole {
    /// First address of the hole.
    pub offset: u64,
    /// Size of the hole, never 0.
    pub size: u64,
}

impl Hole {
    /// One past the last address of the hole; may be exactly 2^64.
    pub fn end(&self) -> u128 {
        self.offset as u128 + self.size as u128
    }
}

/// Free list of an address range, kept as holes ordered by offset.
///
/// Holes never overlap nor touch: freeing a range adjacent to a hole merges it into
/// that hole. The top-most hole may end exactly at 2^64, every other hole ends
/// strictly below the start of the next one.
#[derive(Debug, Clone)]
pub struct VmaHeap {
    // offset -> size
    holes: BTreeMap<u64, u64>,
    strategy: AllocStrategy,
}

impl VmaHeap {
    /// Create a heap with a single hole covering `[start, start + size)`.
    ///
    /// Only [AllocStrategy::LowToHigh] is kept as the default strategy, anything else
    /// selects [AllocStrategy::HighToLow].
    pub fn new(start: u64, size: u64, strategy: AllocStrategy) -> Self {
        let strategy = match strategy {
            AllocStrategy::LowToHigh => AllocStrategy::LowToHigh,
            _ => AllocStrategy::HighToLow,
        };
        let mut heap = Self {
            holes: BTreeMap::new(),
            strategy,
        };
        heap.free(start, size);
        heap
    }

    /// The strategy used when `alloc` is called with [AllocStrategy::None].
    pub fn strategy(&self) -> AllocStrategy {
        self.strategy
    }

    /// Iterate over the holes, highest first.
    pub fn holes(&self) -> impl Iterator<Item = Hole> + '_ {
        self.holes
            .iter()
            .rev()
            .map(|(offset, size)| Hole {
                offset: *offset,
                size: *size,
            })
    }

    /// Number of holes.
    pub fn num_holes(&self) -> usize {
        self.holes.len()
    }

    /// Sum of the hole sizes.
    pub fn free_size(&self) -> u64 {
        self.holes.values().sum()
    }

    /// Find an aligned range of `size` bytes and take it out of the free list.
    ///
    /// Returns `None` without touching the heap when no hole fits.
    ///
    /// # Panics
    /// Panics if `size` or `alignment` is 0.
    pub fn alloc(&mut self, size: u64, alignment: u64, strategy: AllocStrategy) -> Option<u64> {
        assert!(size > 0, "Allocating something with a size of 0 is not valid");
        assert!(alignment > 0, "Alignment must be greater than 0");

        self.debug_validate();

        let strategy = match strategy {
            AllocStrategy::None => self.strategy,
            strategy => strategy,
        };

        let (hole, offset) = match strategy {
            AllocStrategy::LowToHigh => self.find_low_to_high(size, alignment),
            _ => self.find_high_to_low(size, alignment),
        }?;

        self.carve(hole, offset, size);
        self.debug_validate();

        Some(offset)
    }

    // Highest aligned-down address where `size` still fits under the top of the hole.
    fn find_high_to_low(&self, size: u64, alignment: u64) -> Option<(Hole, u64)> {
        self.holes().find_map(|hole| {
            if size > hole.size {
                return None;
            }

            // `offset + size` can only reach 2^64, never pass it.
            let offset = (hole.size - size) + hole.offset;
            let offset = (offset / alignment) * alignment;

            (offset >= hole.offset).then_some((hole, offset))
        })
    }

    // Lowest aligned-up address of the first hole with enough room after padding.
    fn find_low_to_high(&self, size: u64, alignment: u64) -> Option<(Hole, u64)> {
        self.holes.iter().find_map(|(offset, hole_size)| {
            let hole = Hole {
                offset: *offset,
                size: *hole_size,
            };
            if size > hole.size {
                return None;
            }

            let misalign = hole.offset % alignment;
            if misalign == 0 {
                return Some((hole, hole.offset));
            }

            let pad = alignment - misalign;
            (pad <= hole.size - size).then_some((hole, hole.offset + pad))
        })
    }

    /// Take the exact range `[offset, offset + size)` out of the free list.
    ///
    /// Returns false when the range isn't entirely inside a single hole, e.g. because
    /// part of it is already allocated or reserved.
    ///
    /// # Panics
    /// Panics if `size` is 0 or if the range runs past 2^64.
    pub fn alloc_at(&mut self, offset: u64, size: u64) -> bool {
        assert!(size > 0, "Allocating something with a size of 0 is not valid");
        assert!(
            offset as u128 + size as u128 <= 1 << 64,
            "Range {offset:#x} + {size:#x} goes past the top of the address space"
        );

        // The hole with the greatest start <= offset is the only one that can contain it.
        let Some((hole_offset, hole_size)) = self.holes.range(..=offset).next_back() else {
            return false;
        };
        let hole = Hole {
            offset: *hole_offset,
            size: *hole_size,
        };

        if (hole.size as u128) < (offset - hole.offset) as u128 + size as u128 {
            return false;
        }

        self.carve(hole, offset, size);
        self.debug_validate();

        true
    }

    fn carve(&mut self, hole: Hole, offset: u64, size: u64) {
        assert!(hole.offset <= offset);
        assert!(hole.size as u128 >= (offset - hole.offset) as u128 + size as u128);

        if offset == hole.offset && size == hole.size {
            self.holes.remove(&hole.offset);
            return;
        }

        let waste = (hole.size - size) - (offset - hole.offset);
        if waste == 0 {
            // Allocated at the top, shrink the hole down.
            self.holes.insert(hole.offset, hole.size - size);
            return;
        }

        if offset == hole.offset {
            // Allocated at the bottom, shrink the hole up.
            self.holes.remove(&hole.offset);
            self.holes.insert(offset + size, hole.size - size);
            return;
        }

        // Allocated in the middle, split the hole in two.
        self.holes.insert(hole.offset, offset - hole.offset);
        self.holes.insert(offset + size, waste);
    }

    /// Return `[offset, offset + size)` to the free list, merging with the neighbouring
    /// holes when they are adjacent.
    ///
    /// # Panics
    /// Panics if `size` is 0, if the range runs past 2^64 or if it overlaps a hole,
    /// which means it was freed twice.
    pub fn free(&mut self, offset: u64, size: u64) {
        assert!(size > 0, "Freeing something with a size of 0 is not valid");
        let end = offset as u128 + size as u128;
        assert!(
            end <= 1 << 64,
            "Range {offset:#x} + {size:#x} goes past the top of the address space"
        );

        self.debug_validate();

        let low = self
            .holes
            .range(..=offset)
            .next_back()
            .map(|(offset, size)| Hole {
                offset: *offset,
                size: *size,
            });
        let high = self
            .holes
            .range((core::ops::Bound::Excluded(offset), core::ops::Bound::Unbounded))
            .next()
            .map(|(offset, size)| Hole {
                offset: *offset,
                size: *size,
            });

        if let Some(high) = high {
            assert!(
                end <= high.offset as u128,
                "Freed range {offset:#x} + {size:#x} overlaps the hole at {:#x}",
                high.offset
            );
        }
        if let Some(low) = low {
            assert!(
                low.end() <= offset as u128,
                "Freed range {offset:#x} + {size:#x} overlaps the hole at {:#x}",
                low.offset
            );
        }

        let high_adjacent = high.filter(|high| end == high.offset as u128);
        let low_adjacent = low.filter(|low| low.end() == offset as u128);

        match (low_adjacent, high_adjacent) {
            (Some(low), Some(high)) => {
                self.holes.remove(&high.offset);
                self.holes.insert(low.offset, low.size + size + high.size);
            }
            (Some(low), None) => {
                self.holes.insert(low.offset, low.size + size);
            }
            (None, Some(high)) => {
                self.holes.remove(&high.offset);
                self.holes.insert(offset, size + high.size);
            }
            (None, None) => {
                self.holes.insert(offset, size);
            }
        }

        self.debug_validate();
    }

    /// Assert the free list invariants.
    ///
    /// # Panics
    /// Panics if a hole is empty, runs past 2^64, or touches or overlaps the hole above it.
    pub fn validate(&self) {
        let mut previous: Option<Hole> = None;

        for hole in self.holes() {
            assert!(hole.size > 0, "Hole at {:#x} is empty", hole.offset);

            match previous {
                // The top-most hole may only end exactly at 2^64.
                None => assert!(hole.end() <= 1 << 64),
                // Touching holes means a free failed to merge them.
                Some(above) => assert!(
                    hole.end() < above.offset as u128,
                    "Hole at {:#x} touches or overlaps the hole at {:#x}",
                    hole.offset,
                    above.offset
                ),
            }

            previous = Some(hole);
        }
    }

    fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        self.validate();
    }
}
