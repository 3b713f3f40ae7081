use std::io;

#[derive(Debug, thiserror::Error)]
pub enum VfnetError {
    #[error("Network device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Network device '{0}' is not capable of creating VFs")]
    NotSriovCapable(String),

    #[error("Invalid VF count {requested}: must be between 0 and {total_vfs}")]
    InvalidTargetCount { requested: u32, total_vfs: u32 },

    #[error("VF count did not converge on {what}: expected {expected}, found {observed}")]
    ConvergenceTimeout {
        what: &'static str,
        expected: u32,
        observed: u32,
    },

    #[error("Failed to reload VF driver module '{module}': {reason}")]
    DriverReloadFailed { module: String, reason: String },

    #[error("Sysfs read failed for {path}: {source}")]
    SysfsRead { path: String, source: io::Error },

    #[error("Sysfs write failed for {path}: {source}. Try running as root.")]
    SysfsWrite { path: String, source: io::Error },

    #[error("Failed to run '{command}': {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Failed to parse {what}: {reason}")]
    ParseError { what: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON parse error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
