#![allow(dead_code)]

use gpuvm_runtime::{
    AllocatorHandle, DeviceId,
    allocator::{AllocStrategy, AllocatorType},
    client::AllocatorClient,
    config::GlobalConfig,
    registry::OpenOptions,
    service::AllocatorService,
};
use std::sync::Arc;

pub const DEVICE: DeviceId = DeviceId(0);

pub fn test_service() -> AllocatorService {
    AllocatorService::new(Arc::new(GlobalConfig::default()))
}

pub fn open_small(client: &AllocatorClient, vm: u32, size: u64) -> AllocatorHandle {
    client
        .open_with(
            OpenOptions::vm(DEVICE, vm)
                .with_range(0, size)
                .with_type(AllocatorType::Simple)
                .with_strategy(AllocStrategy::HighToLow),
        )
        .unwrap()
}

/// Panics when two `(offset, size)` ranges overlap.
pub fn assert_disjoint(mut ranges: Vec<(u64, u64)>) {
    ranges.sort();

    for pair in ranges.windows(2) {
        let (offset, size) = pair[0];
        let (next, _) = pair[1];
        assert!(
            offset + size <= next,
            "[{offset:#x}, {:#x}) overlaps {next:#x}",
            offset + size
        );
    }
}
