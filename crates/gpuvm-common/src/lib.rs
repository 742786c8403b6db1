#![warn(missing_docs)]

//! Common utilities shared by the gpuvm crates: an open-addressing hash map,
//! caller identity and random helpers.

/// Open-addressing hash map with cached hashes and tombstone deletion.
pub mod map;

/// Identity of the thread issuing an allocator request.
pub mod caller;

/// Random number generation utilities.
pub mod rand;

pub use caller::CallerId;
