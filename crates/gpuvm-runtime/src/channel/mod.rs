mod base;
mod msg;
mod mutex;

pub use base::*;
pub use msg::*;
pub use mutex::*;
