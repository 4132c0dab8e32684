//! rhelpatch-inventory: Host fact collection
//!
//! Reads the facts a patch session reports on and decides with: kernel
//! versions, boot id, disk, memory and uptime. Everything is gathered with
//! stock RHEL tooling and `/proc`, nothing has to be installed on the host.

pub mod collector;
pub mod error;
pub mod parse;
pub mod types;

pub use collector::FactCollector;
pub use error::InventoryError;
pub use types::{DiskUsage, HostFacts, KernelVersion, MemoryInfo};
