mod base;
mod frame;
mod message;
mod queue;
#[cfg(unix)]
mod socket;

pub use base::*;
pub use message::*;
pub use queue::*;
#[cfg(unix)]
pub use socket::*;
