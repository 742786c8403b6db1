use crate::allocator::ADDRESS_WIDTH;

/// Configuration of the allocator instances created by a registry.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AllocatorConfig {
    /// Start of the range used when an allocator is opened with `start == end == 0`.
    #[serde(default)]
    pub default_start: u64,

    /// End of the range used when an allocator is opened with `start == end == 0`.
    ///
    /// Defaults to the top of the 48-bit address space minus one page, so the last page
    /// is never handed out.
    #[serde(default = "default_end")]
    pub default_end: u64,

    /// Warn when an allocator still holding objects or reservations is destroyed.
    #[serde(default)]
    pub warn_if_not_empty: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_start: 0,
            default_end: default_end(),
            warn_if_not_empty: false,
        }
    }
}

const PAGE_SIZE: u64 = 4096;

fn default_end() -> u64 {
    (1 << ADDRESS_WIDTH) - PAGE_SIZE
}
