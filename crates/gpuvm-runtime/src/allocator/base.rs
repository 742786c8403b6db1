use serde::{Deserialize, Serialize};

/// Number of meaningful bits of a GPU virtual address.
pub const ADDRESS_WIDTH: u32 = 48;

/// Size of the whole `ADDRESS_WIDTH`-bit address space.
pub const ADDRESS_SPACE_SIZE: u64 = 1 << ADDRESS_WIDTH;

/// Clear bits `[63:48]`, turning a canonical (sign-extended) address into a plain offset.
pub fn decanonical(address: u64) -> u64 {
    address & (ADDRESS_SPACE_SIZE - 1)
}

/// Sign-extend bit 47, turning a plain offset into its canonical form.
pub fn canonical(address: u64) -> u64 {
    let shift = 64 - ADDRESS_WIDTH;
    (((address << shift) as i64) >> shift) as u64
}

/// Bias used when searching holes for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AllocStrategy {
    /// Use the strategy the allocator was opened with.
    None,
    /// Prefer the lowest addresses.
    LowToHigh,
    /// Prefer the highest addresses.
    #[default]
    HighToLow,
}

/// The algorithm backing an allocator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocatorType {
    /// No allocator; callers rely on relocations. Cannot be opened.
    None,
    /// Hole-tracking allocator with reservations.
    Simple,
    /// Bump allocator that wraps around and never tracks overlap.
    Reloc,
    /// Random offsets that never track overlap.
    Random,
}

/// Running counters of an allocator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocatorStats {
    /// Size of the managed range.
    pub total_size: u64,
    /// Sum of the hole sizes.
    pub free_size: u64,
    /// Number of allocated objects.
    pub allocated_objects: u64,
    /// Sum of the allocated object sizes.
    pub allocated_size: u64,
    /// Number of reserved areas.
    pub reserved_areas: u64,
    /// Sum of the reserved area sizes.
    pub reserved_size: u64,
}

/// Algorithm interface of an allocator instance.
///
/// Object handles are caller-supplied 32-bit buffer handles, unrelated to the
/// open-handles minted by the registry. Implementations are never shared between
/// threads without the instance lock.
pub trait AllocatorBackend: Send + core::fmt::Debug {
    /// The `[start, end)` range the allocator hands out addresses from.
    fn address_range(&self) -> (u64, u64);

    /// Allocate `size` bytes for the object `handle`.
    ///
    /// Returns `None` when no range fits.
    fn alloc(&mut self, handle: u32, size: u64, alignment: u64, strategy: AllocStrategy)
    -> Option<u64>;

    /// Free the range of the object `handle`, returning whether a range was released.
    fn free(&mut self, handle: u32) -> bool;

    /// Whether `handle` is allocated with exactly the given size and offset.
    fn is_allocated(&self, handle: u32, size: u64, offset: u64) -> bool;

    /// Withhold `[start, end)` from allocation.
    fn reserve(&mut self, handle: u32, start: u64, end: u64) -> bool;

    /// Release a reservation made with the exact same handle and range.
    fn unreserve(&mut self, handle: u32, start: u64, end: u64) -> bool;

    /// Whether `[start, end)` is exactly one reservation.
    fn is_reserved(&self, start: u64, end: u64) -> bool;

    /// Whether no object is allocated and no range is reserved.
    fn is_empty(&self) -> bool;

    /// Log the state of the allocator, cross-checking its counters when `full`.
    fn print(&self, full: bool);

    /// The running counters of the allocator.
    fn stats(&self) -> AllocatorStats;
}

/// Normalize the bounds of a reservation-family request into `(start, size)`.
///
/// `end == 0` is rejected before masking; after masking, `end == 0` stands for the top
/// of the address space.
pub(crate) fn reservation_range(start: u64, end: u64) -> (u64, u64) {
    assert!(end != 0, "Reservation end can't be 0 before decanonicalization");

    let start = decanonical(start);
    let end = decanonical(end);
    assert!(
        end > start || end == 0,
        "Reservation end {end:#x} must be above its start {start:#x}"
    );

    let end = if end == 0 { ADDRESS_SPACE_SIZE } else { end };

    (start, end - start)
}

/// Round `value` up to a multiple of `alignment`.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_round_trip() {
        let high = 0x0000_8000_0000_1000;

        assert_eq!(canonical(high), 0xffff_8000_0000_1000);
        assert_eq!(decanonical(canonical(high)), high);
        assert_eq!(canonical(0x1000), 0x1000);
    }

    #[test]
    fn reservation_range_masks_canonical_bounds() {
        assert_eq!(
            reservation_range(0xffff_8000_0000_0000, 0xffff_8000_0000_2000),
            (0x8000_0000_0000, 0x2000)
        );
        assert_eq!(
            reservation_range(0xffff_0000_0000, 0xffff_0000_0000_0000),
            (0xffff_0000_0000, ADDRESS_SPACE_SIZE - 0xffff_0000_0000)
        );
    }

    #[test]
    #[should_panic]
    fn reservation_end_zero_is_invalid() {
        reservation_range(0x1000, 0);
    }

    #[test]
    #[should_panic]
    fn reservation_end_below_start_is_invalid() {
        reservation_range(0x2000, 0x1000);
    }

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0x1001, 0x1000), 0x2000);
        assert_eq!(align_up(0x1000, 0x1000), 0x1000);
        assert_eq!(align_up(7, 0), 7);
    }
}
