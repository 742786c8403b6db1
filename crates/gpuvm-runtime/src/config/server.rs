use alloc::string::{String, ToString};

/// Configuration of the server thread used in multiprocess mode.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    /// How long `stop` waits for the server thread to exit, in milliseconds.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Name given to the server thread.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
            thread_name: default_thread_name(),
        }
    }
}

impl ServerConfig {
    /// The stop timeout as a [Duration](core::time::Duration).
    pub fn stop_timeout(&self) -> core::time::Duration {
        core::time::Duration::from_millis(self.stop_timeout_ms)
    }
}

fn default_stop_timeout_ms() -> u64 {
    100
}

fn default_thread_name() -> String {
    "gpuvm-allocator".to_string()
}
