mod base;
mod hasher;
mod sizes;

pub use base::*;
pub use hasher::*;
pub use sizes::TableSize;
