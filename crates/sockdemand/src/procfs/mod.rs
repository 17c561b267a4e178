//! Readers for the proc filesystem.
//!
//! All paths are taken relative to a configurable root so that tests can
//! point them at a fixture tree.

pub mod inventory;
pub mod net;
pub mod stat;
pub mod system;

pub use inventory::{FdInfo, ProcessInfo, ProcessInventory};
pub use stat::ProcStat;
pub use system::SystemInfo;
