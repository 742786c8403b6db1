use serde::{Deserialize, Serialize};

/// Identity of the thread issuing a request, unique across processes sharing a
/// transport.
///
/// Responses are tagged with the caller id of their request, so many callers can
/// have a request in flight on the same transport at once.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallerId {
    /// The id of the process the caller lives in.
    pub process: u32,
    /// The value representing the thread id.
    pub thread: u64,
}

impl CallerId {
    /// Get the id of the current thread.
    pub fn current() -> Self {
        Self {
            process: std::process::id(),
            thread: Self::from_current_thread(),
        }
    }

    fn from_current_thread() -> u64 {
        use core::hash::Hash;

        std::thread_local! {
            static ID: std::cell::OnceCell::<u64> = const { std::cell::OnceCell::new() };
        };

        // Getting the current thread is expensive, so it is cached in a thread local.
        ID.with(|cell| {
            *cell.get_or_init(|| {
                let mut hasher = std::hash::DefaultHasher::default();
                let id = std::thread::current().id();
                id.hash(&mut hasher);
                std::hash::Hasher::finish(&hasher)
            })
        })
    }
}

impl core::fmt::Display for CallerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CallerId({}:{:x})", self.process, self.thread)
    }
}
