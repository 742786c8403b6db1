use serde::{Deserialize, Serialize};

#[macro_export(local_inner_macros)]
/// Create a new open-handle ID type.
///
/// Values come from a process-wide counter starting at 1, so they are never reused and
/// `0` is never a valid handle.
macro_rules! handle_id_type {
    ($name:ident) => {
        /// Open-handle ID.
        #[derive(
            Copy,
            Clone,
            Hash,
            PartialEq,
            Eq,
            Debug,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name {
            value: u64,
        }

        impl $name {
            /// Create a new ID.
            pub(crate) fn new() -> Self {
                use core::sync::atomic::{AtomicU64, Ordering};

                static COUNTER: AtomicU64 = AtomicU64::new(1);

                let value = COUNTER.fetch_add(1, Ordering::Relaxed);
                if value == u64::MAX {
                    core::panic!("Handle ID overflowed");
                }
                Self { value }
            }

            /// Rebuild an ID from its raw value, e.g. after it crossed a process boundary.
            pub fn from_raw(value: u64) -> Self {
                Self { value }
            }

            /// The raw value of the ID.
            pub fn value(&self) -> u64 {
                self.value
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::write!(f, "{:#x}", self.value)
            }
        }
    };
}

handle_id_type!(AllocatorHandle);

/// Identifies the device a set of address spaces belongs to.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which identifier an allocator instance is keyed by, next to its device.
///
/// Instances keyed by context and by vm live in separate tables, so `Context(1)` and
/// `Vm(1)` on the same device are two unrelated address spaces.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum AddressSpace {
    /// Keyed by a context id.
    Context(u32),
    /// Keyed by a vm id, which must not be 0.
    Vm(u32),
}

impl AddressSpace {
    /// Whether the address space is keyed by vm.
    pub fn is_vm(&self) -> bool {
        matches!(self, AddressSpace::Vm(_))
    }
}

impl core::fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AddressSpace::Context(ctx) => write!(f, "ctx: {ctx}"),
            AddressSpace::Vm(vm) => write!(f, "vm: {vm}"),
        }
    }
}
