use crate::{
    config::{GlobalConfig, Logger, RequestLogLevel},
    transport::{Operation, Reply},
};
use alloc::format;
use gpuvm_common::CallerId;
use spin::Mutex;

/// Logs the requests executed by the allocator registry.
///
/// With the `basic` level only the open, open-as, close and stop requests are logged,
/// with `full` every request is.
#[derive(Debug)]
pub struct RequestLogger {
    kind: RequestLoggerKind,
}

#[derive(Debug)]
enum RequestLoggerKind {
    Activated(Mutex<Logger>, RequestLogLevel),
    None,
}

impl RequestLogger {
    /// Create a request logger from the `logger` section of the config.
    pub fn new(config: &GlobalConfig) -> Self {
        let level = config.logger.level;
        let logger = Logger::new(&config.logger, level != RequestLogLevel::Disabled);

        if !logger.is_active() {
            return Self::disabled();
        }

        Self {
            kind: RequestLoggerKind::Activated(Mutex::new(logger), level),
        }
    }

    /// A logger that never logs.
    pub fn disabled() -> Self {
        Self {
            kind: RequestLoggerKind::None,
        }
    }

    /// Whether the operation would be logged.
    pub fn is_logged(&self, op: &Operation) -> bool {
        match &self.kind {
            RequestLoggerKind::Activated(_, RequestLogLevel::Full) => true,
            RequestLoggerKind::Activated(_, RequestLogLevel::Basic) => op.is_lifecycle(),
            RequestLoggerKind::Activated(_, RequestLogLevel::Disabled)
            | RequestLoggerKind::None => false,
        }
    }

    /// Log an executed operation with its reply.
    pub fn log_request(&self, caller: &CallerId, op: &Operation, reply: &Reply) {
        if !self.is_logged(op) {
            return;
        }

        if let RequestLoggerKind::Activated(logger, _) = &self.kind {
            logger.lock().log(&format!("[{caller}] {op} => {reply}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogCrateLevel;
    use crate::id::AllocatorHandle;

    fn config(level: RequestLogLevel) -> GlobalConfig {
        let mut config = GlobalConfig::default();
        config.logger.level = level;
        config.logger.log = Some(LogCrateLevel::Debug);
        config
    }

    #[test]
    fn basic_level_logs_lifecycle_only() {
        let logger = RequestLogger::new(&config(RequestLogLevel::Basic));
        let handle = AllocatorHandle::from_raw(1);

        assert!(logger.is_logged(&Operation::Close { handle }));
        assert!(logger.is_logged(&Operation::Stop));
        assert!(!logger.is_logged(&Operation::Free { handle, object: 1 }));
    }

    #[test]
    fn full_level_logs_everything() {
        let logger = RequestLogger::new(&config(RequestLogLevel::Full));
        let handle = AllocatorHandle::from_raw(1);

        assert!(logger.is_logged(&Operation::Free { handle, object: 1 }));
    }

    #[test]
    fn disabled_level_or_missing_output_logs_nothing() {
        let disabled = RequestLogger::new(&config(RequestLogLevel::Disabled));
        assert!(!disabled.is_logged(&Operation::Stop));

        let mut no_output = config(RequestLogLevel::Full);
        no_output.logger.log = None;
        assert!(!RequestLogger::new(&no_output).is_logged(&Operation::Stop));
    }
}
