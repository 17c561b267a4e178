//! Utility functions.

pub mod addr;

pub use addr::LocalAddrs;
