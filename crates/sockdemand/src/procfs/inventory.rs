//! Process inventory: stat counters plus the socket inodes each process holds.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;

use procfs::process::{FDTarget, Process};

use super::stat::{ProcStat, parse_stat};
use crate::netlink::error::{Error, Result};

/// Metadata of one socket file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdInfo {
    /// Descriptor number.
    pub fd: u32,
    /// Socket inode.
    pub inode: u64,
    /// Permission bits of the descriptor link.
    pub mode: u16,
}

/// One process at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Parsed stat counters.
    pub stat: ProcStat,
    /// Socket inode to descriptor metadata.
    pub sockets: BTreeMap<u64, FdInfo>,
}

impl ProcessInfo {
    /// Process ID.
    pub fn pid(&self) -> u32 {
        self.stat.pid
    }

    /// Command name.
    pub fn name(&self) -> &str {
        &self.stat.name
    }

    /// Whether this process holds a descriptor for `inode`.
    pub fn holds(&self, inode: u64) -> bool {
        self.sockets.contains_key(&inode)
    }
}

/// List the socket descriptors of one process.
///
/// A descriptor that disappears while it is being resolved is skipped;
/// failing to list the directory is an error.
pub fn read_socket_fds(proc_root: &Path, pid: u32) -> Result<BTreeMap<u64, FdInfo>> {
    let dir = proc_root.join(pid.to_string());
    let fds = Process::new_with_root(dir)?.fd()?;

    let mut sockets = BTreeMap::new();
    for info in fds.flatten() {
        let FDTarget::Socket(inode) = info.target else {
            continue;
        };
        let Ok(fd) = u32::try_from(info.fd) else {
            continue;
        };
        sockets.insert(
            inode,
            FdInfo {
                fd,
                inode,
                mode: info.mode().bits(),
            },
        );
    }

    Ok(sockets)
}

/// Read one process: descriptors first, then stat.
pub fn read_process(proc_root: &Path, pid: u32) -> Result<ProcessInfo> {
    let sockets = read_socket_fds(proc_root, pid)?;

    let path = proc_root.join(pid.to_string()).join("stat");
    let line = fs::read_to_string(&path).map_err(|e| Error::source_open(&path, e))?;
    let stat = parse_stat(&line)?;

    Ok(ProcessInfo { stat, sockets })
}

/// Numeric names from a directory listing. Entries that fail to read are
/// skipped.
fn pids<I>(names: I) -> Vec<u32>
where
    I: IntoIterator<Item = io::Result<OsString>>,
{
    names
        .into_iter()
        .filter_map(|name| match name {
            Ok(name) => name.to_str().and_then(|s| s.parse::<u32>().ok()),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable proc entry");
                None
            }
        })
        .collect()
}

/// Every readable process, grouped by command name then pid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInventory {
    by_name: BTreeMap<String, BTreeMap<u32, ProcessInfo>>,
}

impl ProcessInventory {
    /// Scan the numeric directories of `proc_root`.
    ///
    /// Processes whose descriptors or stat cannot be read are dropped from
    /// this inventory and the scan continues.
    pub fn scan(proc_root: &Path) -> Result<Self> {
        let entries = fs::read_dir(proc_root).map_err(|e| Error::source_open(proc_root, e))?;

        let names = entries.map(|entry| entry.map(|e| e.file_name()));

        let mut inventory = Self::default();
        for pid in pids(names) {
            match read_process(proc_root, pid) {
                Ok(proc) => inventory.insert(proc),
                Err(e) => tracing::debug!(pid, error = %e, "dropping process"),
            }
        }

        Ok(inventory)
    }

    /// Add a process.
    pub fn insert(&mut self, proc: ProcessInfo) {
        self.by_name
            .entry(proc.stat.name.clone())
            .or_default()
            .insert(proc.stat.pid, proc);
    }

    /// Processes sharing a command name, keyed by pid.
    pub fn by_name(&self, name: &str) -> Option<&BTreeMap<u32, ProcessInfo>> {
        self.by_name.get(name)
    }

    /// All processes, ordered by name then pid.
    pub fn processes(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.by_name.values().flat_map(|m| m.values())
    }

    /// Number of processes.
    pub fn len(&self) -> usize {
        self.by_name.values().map(|m| m.len()).sum()
    }

    /// Check if the inventory is empty.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
