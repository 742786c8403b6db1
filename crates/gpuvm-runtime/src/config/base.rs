use super::{
    RequestLogLevel,
    allocator::AllocatorConfig,
    logger::{LogCrateLevel, LoggerConfig},
    server::ServerConfig,
};
use alloc::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static GPUVM_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// Represents the global configuration for gpuvm, combining allocator, server and logging settings.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Configuration of allocator instances.
    #[serde(default)]
    pub allocator: AllocatorConfig,

    /// Configuration of the multiprocess server thread.
    #[serde(default)]
    pub server: ServerConfig,

    /// Configuration of the request logger.
    #[serde(default)]
    pub logger: LoggerConfig<RequestLogLevel>,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from `gpuvm.toml` or `GpuVm.toml` in the
    /// current directory or its parents. If no file is found, a default configuration is used.
    ///
    /// # Notes
    ///
    /// Calling this function takes a global lock. Registries read it once at creation and keep
    /// their own [Arc].
    pub fn get() -> Arc<Self> {
        let mut state = GPUVM_GLOBAL_CONFIG.lock();
        if state.as_ref().is_none() {
            cfg_if::cfg_if! {
                if #[cfg(std_io)]  {
                    let config = Self::from_current_dir();
                    let config = config.override_from_env();
                } else {
                    let config = Self::default();
                }
            }

            *state = Some(Arc::new(config));
        }

        match state.as_ref() {
            Some(config) => config.clone(),
            None => unreachable!("The global config is initialized above"),
        }
    }

    #[cfg(std_io)]
    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        use std::io::Write;

        let config = Self::get();
        let content = toml::to_string_pretty(config.as_ref())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(content.as_bytes())?;

        Ok(())
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    ///
    /// # Warning
    /// This method must be called at the start of the program, before any calls to `get`. Attempting
    /// to set the configuration after it has been initialized will cause a panic.
    pub fn set(config: Self) {
        let mut state = GPUVM_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    #[cfg(std_io)]
    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(self) -> Self {
        self.override_from(|name| std::env::var(name).ok())
    }

    /// Overrides configuration fields from the given variable lookup.
    ///
    /// Recognized variables are `GPUVM_LOG`, `GPUVM_WARN_IF_NOT_EMPTY` and
    /// `GPUVM_STOP_TIMEOUT_MS`. Unparsable values are ignored.
    pub fn override_from<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<alloc::string::String>,
    {
        if let Some(val) = var("GPUVM_LOG") {
            match val.as_str() {
                "0" | "false" => {
                    self.logger.level = RequestLogLevel::Disabled;
                }
                "1" | "true" | "basic" => {
                    self.logger.level = RequestLogLevel::Basic;
                    self.logger.log.get_or_insert(LogCrateLevel::Info);
                }
                "full" => {
                    self.logger.level = RequestLogLevel::Full;
                    self.logger.log.get_or_insert(LogCrateLevel::Info);
                }
                "stdout" => {
                    self.logger.level = RequestLogLevel::Full;
                    self.logger.stdout = true;
                }
                "stderr" => {
                    self.logger.level = RequestLogLevel::Full;
                    self.logger.stderr = true;
                }
                _ => {}
            }
        }

        if let Some(val) = var("GPUVM_WARN_IF_NOT_EMPTY") {
            match val.as_str() {
                "1" | "true" => self.allocator.warn_if_not_empty = true,
                "0" | "false" => self.allocator.warn_if_not_empty = false,
                _ => {}
            }
        }

        if let Some(Ok(timeout)) = var("GPUVM_STOP_TIMEOUT_MS").map(|val| val.parse::<u64>()) {
            self.server.stop_timeout_ms = timeout;
        }

        self
    }

    // Loads configuration from `gpuvm.toml` or `GpuVm.toml` in the current directory or its parents.
    //
    // Traverses up the directory tree until a valid configuration file is found or the root is reached.
    // Returns a default configuration if no file is found.
    #[cfg(std_io)]
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            if let Ok(content) = Self::from_file_path(dir.join("gpuvm.toml")) {
                return content;
            }

            if let Ok(content) = Self::from_file_path(dir.join("GpuVm.toml")) {
                return content;
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    // Loads configuration from a specified file path.
    #[cfg(std_io)]
    fn from_file_path<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content))
    }

    /// Parses a configuration from toml.
    ///
    /// # Panics
    /// Panics if the content isn't a valid gpuvm configuration.
    #[cfg(std_io)]
    pub fn from_toml(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(val) => val,
            Err(err) => panic!("The file provided doesn't have the right format => {err:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_last_page_free() {
        let config = GlobalConfig::default();

        assert_eq!(config.allocator.default_start, 0);
        assert_eq!(config.allocator.default_end, (1 << 48) - 4096);
        assert_eq!(config.server.stop_timeout_ms, 100);
        assert!(matches!(config.logger.level, RequestLogLevel::Disabled));
    }

    #[test]
    fn env_overrides_apply() {
        let config = GlobalConfig::default().override_from(|name| match name {
            "GPUVM_LOG" => Some("full".into()),
            "GPUVM_WARN_IF_NOT_EMPTY" => Some("1".into()),
            "GPUVM_STOP_TIMEOUT_MS" => Some("250".into()),
            _ => None,
        });

        assert!(matches!(config.logger.level, RequestLogLevel::Full));
        assert_eq!(config.logger.log, Some(LogCrateLevel::Info));
        assert!(config.allocator.warn_if_not_empty);
        assert_eq!(config.server.stop_timeout_ms, 250);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let config = GlobalConfig::default().override_from(|name| match name {
            "GPUVM_STOP_TIMEOUT_MS" => Some("soon".into()),
            "GPUVM_LOG" => Some("loud".into()),
            _ => None,
        });

        assert_eq!(config.server.stop_timeout_ms, 100);
        assert!(matches!(config.logger.level, RequestLogLevel::Disabled));
    }

    #[cfg(std_io)]
    #[test]
    fn parses_partial_toml() {
        let config = GlobalConfig::from_toml(
            r#"
            [allocator]
            default_end = 0x100000
            warn_if_not_empty = true

            [logger]
            level = "basic"
            log = "debug"
            "#,
        );

        assert_eq!(config.allocator.default_start, 0);
        assert_eq!(config.allocator.default_end, 0x100000);
        assert!(config.allocator.warn_if_not_empty);
        assert_eq!(config.server.thread_name, "gpuvm-allocator");
        assert!(matches!(config.logger.level, RequestLogLevel::Basic));
        assert_eq!(config.logger.log, Some(LogCrateLevel::Debug));
    }
}
