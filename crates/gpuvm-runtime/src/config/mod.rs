/// Allocator config module.
pub mod allocator;
/// Server config module.
pub mod server;

mod base;
mod logger;

pub use base::*;
pub use logger::*;
