#![warn(missing_docs)]

//! GPU virtual address space allocator service.
//!
//! Allocators are keyed by `<device, ctx>` or `<device, vm>` and reached through an
//! [AllocatorClient](client::AllocatorClient), either by calling the registry directly or
//! through a server thread owning it.

extern crate alloc;

#[macro_use]
extern crate derive_new;

/// Allocator algorithms and the free list they are built on.
pub mod allocator;
/// Channels linking clients to the registry.
pub mod channel;
/// Allocator client module.
pub mod client;
/// Configuration module.
pub mod config;
/// Error types.
pub mod error;
/// Request logging.
pub mod logging;
/// The registry of allocator instances.
pub mod registry;
/// Server thread of the multiprocess mode.
pub mod server;
/// Service owning the allocator state of a process.
pub mod service;
/// Request/response protocol and its transports.
pub mod transport;

mod id;

pub use id::*;
