pub mod backend;
pub mod discovery;
pub mod error;
pub mod ip_link;
pub mod mac;
pub mod persist;
pub mod poll;
pub mod provision;
pub mod sysfs;
pub mod tables;

pub use error::VfnetError;

pub type Result<T> = std::result::Result<T, VfnetError>;

// Convenience re-exports for the CLI
pub use backend::{Backend, SystemBackend};
pub use discovery::{PhysicalFunction, Snapshot, VirtualFunction, discover};
pub use provision::{Provisioned, Provisioner};
pub use sysfs::SysfsNet;
