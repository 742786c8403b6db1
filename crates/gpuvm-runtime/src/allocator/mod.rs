pub(crate) mod dynamic;
mod random;
mod reloc;
mod simple;
/// Free list of address ranges.
pub mod vma_heap;

mod base;

pub use base::*;
pub use dynamic::DynamicAllocator;
pub use random::RandomAllocator;
pub use reloc::RelocAllocator;
pub use simple::{Record, SimpleAllocator};
