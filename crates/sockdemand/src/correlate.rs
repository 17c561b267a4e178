//! Join socket records to the processes that hold them.

use std::collections::{BTreeMap, BTreeSet};

use crate::procfs::inventory::{ProcessInfo, ProcessInventory};
use crate::sockdiag::record::SocketTable;

/// Socket inode to the pids holding a descriptor for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationIndex {
    owners: BTreeMap<u64, BTreeSet<u32>>,
}

impl CorrelationIndex {
    /// Find the owners of every decoded inode and write the display name
    /// back onto each record.
    ///
    /// Every process is searched for every inode, so the cost grows with
    /// sockets times processes times descriptors. When several processes
    /// share a socket the lowest pid names it.
    pub fn build(tables: &mut [SocketTable], inventory: &ProcessInventory) -> Self {
        let mut index = Self::default();

        for table in tables.iter_mut() {
            for rec in table.records_mut() {
                let holders: Vec<&ProcessInfo> = inventory
                    .processes()
                    .filter(|p| p.holds(rec.inode))
                    .collect();

                let Some(first) = holders.iter().min_by_key(|p| p.pid()) else {
                    rec.owner = None;
                    continue;
                };
                rec.owner = Some(first.name().to_string());

                index
                    .owners
                    .entry(rec.inode)
                    .or_default()
                    .extend(holders.iter().map(|p| p.pid()));
            }
        }

        index
    }

    /// Pids owning `inode`.
    pub fn owners(&self, inode: u64) -> Option<&BTreeSet<u32>> {
        self.owners.get(&inode)
    }

    /// Number of inodes with at least one owner.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Check if no inode was matched.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
