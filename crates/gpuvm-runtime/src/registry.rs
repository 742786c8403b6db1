use crate::{
    allocator::{AllocStrategy, AllocatorBackend, AllocatorStats, AllocatorType, DynamicAllocator},
    config::GlobalConfig,
    error::AllocatorError,
    id::{AddressSpace, AllocatorHandle, DeviceId},
    logging::RequestLogger,
    transport::{Operation, Reply, Request, Response},
};
use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicI32, Ordering};
use gpuvm_common::map::{GoldenRatio32, OpenMap};
use serde::{Deserialize, Serialize};
use spin::Mutex;

/// Everything needed to open an allocator.
///
/// `start == end == 0` selects the default range of the
/// [allocator config](crate::config::allocator::AllocatorConfig).
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// The device owning the address space.
    pub device: DeviceId,
    /// The context or vm the allocator is keyed by.
    pub space: AddressSpace,
    /// Start of the managed range.
    pub start: u64,
    /// End of the managed range, exclusive.
    pub end: u64,
    /// The algorithm of the allocator.
    pub allocator_type: AllocatorType,
    /// The default strategy of the allocator.
    pub strategy: AllocStrategy,
}

impl OpenOptions {
    /// A simple high-to-low allocator over the default range, keyed by context.
    pub fn context(device: DeviceId, ctx: u32) -> Self {
        Self::new(
            device,
            AddressSpace::Context(ctx),
            0,
            0,
            AllocatorType::Simple,
            AllocStrategy::HighToLow,
        )
    }

    /// A simple high-to-low allocator over the default range, keyed by vm.
    pub fn vm(device: DeviceId, vm: u32) -> Self {
        Self {
            space: AddressSpace::Vm(vm),
            ..Self::context(device, 0)
        }
    }

    /// Manage `[start, end)` instead of the default range.
    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Use another allocator type.
    pub fn with_type(mut self, allocator_type: AllocatorType) -> Self {
        self.allocator_type = allocator_type;
        self
    }

    /// Use another default strategy.
    pub fn with_strategy(mut self, strategy: AllocStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// The result of [reserve_if_not_allocated](Registry::reserve_if_not_allocated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReserveOutcome {
    /// The object was already allocated at exactly this range; nothing was reserved.
    pub allocated: bool,
    /// The range was reserved.
    pub reserved: bool,
}

/// One independent address space and its bookkeeping.
#[derive(Debug)]
struct Instance {
    kind: AllocatorType,
    strategy: AllocStrategy,
    refcount: AtomicI32,
    backend: Mutex<DynamicAllocator>,
}

/// A `<device, ctx|vm>` key bound to an instance.
///
/// Several bindings share one instance after `open_as`.
#[derive(Debug)]
struct Binding {
    device: DeviceId,
    space: AddressSpace,
    refcount: AtomicI32,
    instance: Arc<Instance>,
}

impl Binding {
    fn new(device: DeviceId, space: AddressSpace, instance: Arc<Instance>) -> Self {
        Self {
            device,
            space,
            refcount: AtomicI32::new(0),
            instance,
        }
    }

    fn acquire(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        let refcount = self.instance.refcount.fetch_add(1, Ordering::AcqRel);
        assert!(refcount >= 0);
    }

    /// Returns whether the last reference to the instance was dropped.
    fn release(&self) -> bool {
        let binding_refcount = self.refcount.fetch_sub(1, Ordering::AcqRel);
        let refcount = self.instance.refcount.fetch_sub(1, Ordering::AcqRel);
        assert!(refcount >= 1);

        if refcount == 1 {
            assert_eq!(
                binding_refcount, 1,
                "The last binding of a released allocator must hold a single reference"
            );
            return true;
        }

        false
    }

    fn key(&self) -> (DeviceId, u32) {
        space_key(self.device, self.space)
    }
}

fn space_key(device: DeviceId, space: AddressSpace) -> (DeviceId, u32) {
    match space {
        AddressSpace::Context(id) | AddressSpace::Vm(id) => (device, id),
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    handles: OpenMap<u64, Arc<Binding>, GoldenRatio32>,
    contexts: OpenMap<(DeviceId, u32), Arc<Binding>>,
    vms: OpenMap<(DeviceId, u32), Arc<Binding>>,
}

impl RegistryState {
    fn bindings(&mut self, space: AddressSpace) -> &mut OpenMap<(DeviceId, u32), Arc<Binding>> {
        match space {
            AddressSpace::Context(_) => &mut self.contexts,
            AddressSpace::Vm(_) => &mut self.vms,
        }
    }

    fn register(&mut self, binding: Arc<Binding>) -> AllocatorHandle {
        binding.acquire();
        let handle = AllocatorHandle::new();
        self.handles.insert(handle.value(), binding);
        handle
    }
}

/// The registry of allocator instances, keyed by `<device, ctx>` or `<device, vm>`.
///
/// Open-handles resolve to bindings under the registry lock. Allocator operations run
/// under the lock of the resolved instance only, so independent instances can be used
/// concurrently.
#[derive(Debug)]
pub struct Registry {
    state: Mutex<RegistryState>,
    config: Arc<GlobalConfig>,
    logger: RequestLogger,
}

impl Registry {
    /// Create an empty registry.
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        let logger = RequestLogger::new(&config);

        Self {
            state: Mutex::new(RegistryState::default()),
            config,
            logger,
        }
    }

    /// The config the registry was created with.
    pub fn config(&self) -> &Arc<GlobalConfig> {
        &self.config
    }

    /// Open the allocator of the given key, creating it when it doesn't exist yet.
    ///
    /// Every call returns a fresh open-handle, to be released with [close](Self::close).
    ///
    /// # Panics
    ///
    /// - On [AllocatorType::None] and on vm 0.
    /// - When the key is already open with another allocator type or strategy.
    pub fn open(&self, options: OpenOptions) -> AllocatorHandle {
        assert!(
            options.allocator_type != AllocatorType::None,
            "We cannot use NONE allocator"
        );
        if let AddressSpace::Vm(vm) = options.space {
            assert!(vm != 0, "Vm 0 is not a valid vm id");
        }

        let mut state = self.state.lock();
        let key = space_key(options.device, options.space);

        let existing = state.bindings(options.space).get(&key).cloned();
        let binding = match existing {
            Some(existing) => existing,
            None => {
                log::debug!(
                    "Allocator device: {}, {}, [{:#x}, {:#x}) not found, creating one",
                    options.device,
                    options.space,
                    options.start,
                    options.end
                );
                let binding = Arc::new(Binding::new(
                    options.device,
                    options.space,
                    Arc::new(self.create_instance(&options)),
                ));
                state.bindings(options.space).insert(key, binding.clone());
                binding
            }
        };

        let space = if options.space.is_vm() { "vm" } else { "ctx" };
        assert_eq!(
            binding.instance.kind, options.allocator_type,
            "Allocator type must be same for device/{space}"
        );
        assert_eq!(
            binding.instance.strategy, options.strategy,
            "Allocator strategy must be same for device/{space}"
        );

        state.register(binding)
    }

    /// Bind `new_vm` to the allocator of `handle`, returning a handle to the shared instance.
    ///
    /// # Panics
    ///
    /// On vm 0, and when `new_vm` is already bound to another allocator.
    pub fn open_as(
        &self,
        handle: AllocatorHandle,
        new_vm: u32,
    ) -> Result<AllocatorHandle, AllocatorError> {
        assert!(new_vm != 0, "Vm 0 is not a valid vm id");

        let mut state = self.state.lock();
        let base = state
            .handles
            .get(&handle.value())
            .cloned()
            .ok_or(AllocatorError::UnknownHandle(handle.value()))?;

        if !base.space.is_vm() {
            return Err(AllocatorError::OpenAsRequiresVm(handle.value()));
        }

        let key = (base.device, new_vm);
        let existing = state.vms.get(&key).cloned();
        let binding = match existing {
            Some(existing) => {
                assert!(
                    Arc::ptr_eq(&existing.instance, &base.instance),
                    "Vm {new_vm} is already bound to another allocator"
                );
                existing
            }
            None => {
                let binding = Arc::new(Binding::new(
                    base.device,
                    AddressSpace::Vm(new_vm),
                    base.instance.clone(),
                ));
                state.vms.insert(key, binding.clone());
                binding
            }
        };

        Ok(state.register(binding))
    }

    /// Release an open-handle.
    ///
    /// The allocator is destroyed with its last handle. Returns whether it was empty when
    /// destroyed, and false when it survives the close or the handle is unknown.
    pub fn close(&self, handle: AllocatorHandle) -> bool {
        let mut state = self.state.lock();

        let Some(binding) = state.handles.remove(&handle.value()) else {
            log::warn!("Cannot find handle: {handle}");
            return false;
        };

        let mut is_empty = false;
        if binding.release() {
            is_empty = binding.instance.backend.lock().is_empty();
            if !is_empty && self.config.allocator.warn_if_not_empty {
                log::warn!("Allocator not clear before destroy!");
            }
            log::debug!("Destroying allocator (empty: {is_empty})");
        }

        if binding.refcount.load(Ordering::Acquire) == 0 {
            let key = binding.key();
            let bindings = state.bindings(binding.space);
            if bindings
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &binding))
            {
                bindings.remove(&key);
            }
        }

        is_empty
    }

    /// Close every open-handle, destroying every allocator. Returns the number of handles closed.
    pub fn close_all(&self) -> usize {
        let handles: Vec<u64> = self.state.lock().handles.keys().copied().collect();

        for handle in handles.iter() {
            self.close(AllocatorHandle::from_raw(*handle));
        }

        handles.len()
    }

    /// Number of open-handles.
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// The `[start, end)` range of the allocator.
    pub fn address_range(&self, handle: AllocatorHandle) -> Result<(u64, u64), AllocatorError> {
        self.with_backend(handle, |backend| backend.address_range())
    }

    /// Allocate `size` bytes for `object`, `None` when the address space is exhausted.
    pub fn alloc(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        alignment: u64,
        strategy: AllocStrategy,
    ) -> Result<Option<u64>, AllocatorError> {
        self.with_backend(handle, |backend| {
            backend.alloc(object, size, alignment, strategy)
        })
    }

    /// Free the range of `object`, returning whether anything was freed.
    pub fn free(&self, handle: AllocatorHandle, object: u32) -> Result<bool, AllocatorError> {
        self.with_backend(handle, |backend| backend.free(object))
    }

    /// Whether `object` is allocated with exactly this size and offset.
    pub fn is_allocated(
        &self,
        handle: AllocatorHandle,
        object: u32,
        size: u64,
        offset: u64,
    ) -> Result<bool, AllocatorError> {
        self.with_backend(handle, |backend| backend.is_allocated(object, size, offset))
    }

    /// Withhold `[start, end)` from allocation.
    pub fn reserve(
        &self,
        handle: AllocatorHandle,
        object: u32,
        start: u64,
        end: u64,
    ) -> Result<bool, AllocatorError> {
        self.with_backend(handle, |backend| backend.reserve(object, start, end))
    }

    /// Release a reservation made with the same object and range.
    pub fn unreserve(
        &self,
        handle: AllocatorHandle,
        object: u32,
        start: u64,
        end: u64,
    ) -> Result<bool, AllocatorError> {
        self.with_backend(handle, |backend| backend.unreserve(object, start, end))
    }

    /// Whether `[start, end)` is exactly one reservation.
    pub fn is_reserved(
        &self,
        handle: AllocatorHandle,
        start: u64,
        end: u64,
    ) -> Result<bool, AllocatorError> {
        self.with_backend(handle, |backend| backend.is_reserved(start, end))
    }

    /// Reserve `[start, end)` unless `object` is already allocated there.
    ///
    /// Both steps run under a single acquisition of the allocator lock.
    pub fn reserve_if_not_allocated(
        &self,
        handle: AllocatorHandle,
        object: u32,
        start: u64,
        end: u64,
    ) -> Result<ReserveOutcome, AllocatorError> {
        self.with_backend(handle, |backend| {
            let size = end.wrapping_sub(start);

            if backend.is_allocated(object, size, start) {
                return ReserveOutcome {
                    allocated: true,
                    reserved: false,
                };
            }

            ReserveOutcome {
                allocated: false,
                reserved: backend.reserve(object, start, end),
            }
        })
    }

    /// Log the state of the allocator, cross-checking its counters.
    pub fn print(&self, handle: AllocatorHandle) -> Result<(), AllocatorError> {
        let binding = self.resolve(handle)?;
        log::info!(
            "Allocator handle: {handle}, device: {}, {}, refcount: {}",
            binding.device,
            binding.space,
            binding.instance.refcount.load(Ordering::Acquire)
        );
        binding.instance.backend.lock().print(true);
        Ok(())
    }

    /// The running counters of the allocator.
    pub fn stats(&self, handle: AllocatorHandle) -> Result<AllocatorStats, AllocatorError> {
        self.with_backend(handle, |backend| backend.stats())
    }

    /// Execute a request, answering with a response tagged with the same caller.
    pub fn execute(&self, request: Request) -> Response {
        let reply = self
            .execute_operation(&request.op)
            .unwrap_or_else(Reply::Failed);

        self.logger.log_request(&request.caller, &request.op, &reply);

        Response::new(request.caller, reply)
    }

    fn execute_operation(&self, op: &Operation) -> Result<Reply, AllocatorError> {
        let reply = match op.clone() {
            Operation::Open(options) => Reply::Open(self.open(options)),
            Operation::OpenAs { handle, new_vm } => Reply::OpenAs(self.open_as(handle, new_vm)?),
            Operation::Close { handle } => Reply::Close {
                is_empty: self.close(handle),
            },
            Operation::AddressRange { handle } => {
                let (start, end) = self.address_range(handle)?;
                Reply::AddressRange { start, end }
            }
            Operation::Alloc {
                handle,
                object,
                size,
                alignment,
                strategy,
            } => Reply::Alloc {
                offset: self.alloc(handle, object, size, alignment, strategy)?,
            },
            Operation::Free { handle, object } => Reply::Free {
                freed: self.free(handle, object)?,
            },
            Operation::IsAllocated {
                handle,
                object,
                size,
                offset,
            } => Reply::IsAllocated {
                allocated: self.is_allocated(handle, object, size, offset)?,
            },
            Operation::Reserve {
                handle,
                object,
                start,
                end,
            } => Reply::Reserve {
                reserved: self.reserve(handle, object, start, end)?,
            },
            Operation::Unreserve {
                handle,
                object,
                start,
                end,
            } => Reply::Unreserve {
                unreserved: self.unreserve(handle, object, start, end)?,
            },
            Operation::IsReserved { handle, start, end } => Reply::IsReserved {
                reserved: self.is_reserved(handle, start, end)?,
            },
            Operation::ReserveIfNotAllocated {
                handle,
                object,
                start,
                end,
            } => Reply::ReserveIfNotAllocated(
                self.reserve_if_not_allocated(handle, object, start, end)?,
            ),
            Operation::Stop => Reply::Stopped,
        };

        Ok(reply)
    }

    fn create_instance(&self, options: &OpenOptions) -> Instance {
        let (start, end) = match (options.start, options.end) {
            (0, 0) => (
                self.config.allocator.default_start,
                self.config.allocator.default_end,
            ),
            range => range,
        };

        Instance {
            kind: options.allocator_type,
            strategy: options.strategy,
            refcount: AtomicI32::new(0),
            backend: Mutex::new(DynamicAllocator::new(
                options.allocator_type,
                start,
                end,
                options.strategy,
            )),
        }
    }

    fn resolve(&self, handle: AllocatorHandle) -> Result<Arc<Binding>, AllocatorError> {
        self.state
            .lock()
            .handles
            .get(&handle.value())
            .cloned()
            .ok_or(AllocatorError::UnknownHandle(handle.value()))
    }

    fn with_backend<T>(
        &self,
        handle: AllocatorHandle,
        func: impl FnOnce(&mut DynamicAllocator) -> T,
    ) -> Result<T, AllocatorError> {
        // The registry lock is released before the instance lock is taken.
        let binding = self.resolve(handle)?;
        let mut backend = binding.instance.backend.lock();
        Ok(func(&mut backend))
    }
}
