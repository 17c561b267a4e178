//! One snapshot cycle, from raw sources to a [`Demand`].
//!
//! Each cycle owns freshly built tables, inventory and index; nothing is
//! kept between cycles.

use std::path::Path;

use tokio::task::JoinHandle;

use crate::config::{CycleConfig, Source};
use crate::correlate::CorrelationIndex;
use crate::netlink::addr::interface_addresses;
use crate::netlink::error::{Error, Result};
use crate::netlink::sockdiag::dump_sockets;
use crate::procfs::inventory::ProcessInventory;
use crate::procfs::net::read_table;
use crate::procfs::system::SystemInfo;
use crate::sockdiag::record::SocketTable;
use crate::topology::{Demand, TopologyBuilder};
use crate::util::addr::LocalAddrs;

/// Everything gathered for one snapshot.
#[derive(Debug, Clone)]
pub struct Cycle {
    /// Addresses that belong to this host.
    pub local: LocalAddrs,
    /// Decoded socket tables, in configuration order, with owners resolved.
    pub tables: Vec<SocketTable>,
    /// Processes readable during this cycle.
    pub inventory: ProcessInventory,
    /// Boot time, CPU total and unit sizes.
    pub system: SystemInfo,
    /// Inode to owning pids.
    pub index: CorrelationIndex,
}

impl Cycle {
    /// Gather every source and correlate them.
    ///
    /// Text tables, netlink dumps and the process scan run as independent
    /// tasks. A source that fails is logged and left out; only bootstrap
    /// failures abort the cycle.
    pub async fn collect(config: &CycleConfig, local: LocalAddrs) -> Result<Self> {
        let root = config.proc_root.clone();
        let scan = tokio::task::spawn_blocking(move || {
            (ProcessInventory::scan(&root), SystemInfo::read(&root))
        });

        let mut tables = match config.source {
            Source::Text => collect_text(config).await,
            Source::Netlink => collect_netlink(config).await?,
        };

        let (inventory, system) = match scan.await {
            Ok((Ok(inventory), system)) => (inventory, system),
            Ok((Err(e), system)) => {
                tracing::warn!(error = %e, "process scan failed");
                (ProcessInventory::default(), system)
            }
            Err(e) => {
                tracing::warn!(error = %e, "process scan task failed");
                (ProcessInventory::default(), SystemInfo::read(&config.proc_root))
            }
        };

        let index = CorrelationIndex::build(&mut tables, &inventory);

        Ok(Self {
            local,
            tables,
            inventory,
            system,
            index,
        })
    }

    /// Classify the correlated records.
    pub fn demand(&self, config: &CycleConfig) -> Demand {
        TopologyBuilder::new(&self.local, self.system)
            .precision(config.cpu_precision)
            .build(&self.tables, &self.inventory)
    }

    /// Total decoded records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }
}

async fn collect_text(config: &CycleConfig) -> Vec<SocketTable> {
    let handles: Vec<_> = config
        .tables()
        .map(|(family, transport)| {
            let root = config.proc_root.clone();
            let handle: JoinHandle<Result<SocketTable>> =
                tokio::task::spawn_blocking(move || read_table(&root, family, transport));
            handle
        })
        .collect();

    let mut tables = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(table)) => tables.push(table),
            Ok(Err(e)) => tracing::warn!(error = %e, "socket table unavailable"),
            Err(e) => tracing::warn!(error = %e, "socket table task failed"),
        }
    }
    tables
}

async fn collect_netlink(config: &CycleConfig) -> Result<Vec<SocketTable>> {
    let handles: Vec<_> = config
        .dump_requests()
        .into_iter()
        .map(|request| {
            let (depth, buf) = (config.pool_depth, config.recv_buffer);
            tokio::spawn(async move { dump_sockets(request, depth, buf).await })
        })
        .collect();

    let mut tables = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(table)) => tables.push(table),
            Ok(Err(e)) if e.is_fatal() => return Err(e),
            Ok(Err(e)) => tracing::warn!(error = %e, "diag dump aborted"),
            Err(e) => tracing::warn!(error = %e, "diag dump task failed"),
        }
    }
    Ok(tables)
}

/// Runs snapshot cycles for one configuration.
///
/// # Example
///
/// ```ignore
/// use sockdemand::{Collector, CycleConfig};
///
/// let collector = Collector::new(CycleConfig::default());
/// let demand = collector.snapshot().await?;
/// for (name, service) in demand.listen() {
///     println!("{}: {} clients", name, service.clients.len());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Collector {
    config: CycleConfig,
    local: Option<LocalAddrs>,
}

impl Collector {
    /// Create a collector. Interface addresses are enumerated every cycle.
    pub fn new(config: CycleConfig) -> Self {
        Self {
            config,
            local: None,
        }
    }

    /// Use a fixed set of local addresses instead of enumerating interfaces.
    pub fn with_local_addrs(mut self, local: LocalAddrs) -> Self {
        self.local = Some(local);
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Proc root the collector reads.
    pub fn proc_root(&self) -> &Path {
        &self.config.proc_root
    }

    async fn local_addrs(&self) -> Result<LocalAddrs> {
        let mut local = match &self.local {
            Some(local) => local.clone(),
            None => LocalAddrs::new(interface_addresses().await.map_err(|e| {
                Error::Bootstrap(format!("cannot enumerate interface addresses: {}", e))
            })?),
        };
        for addr in &self.config.extra_local_addrs {
            local.insert(*addr);
        }
        Ok(local)
    }

    /// Gather and correlate one cycle without classifying it.
    pub async fn collect(&self) -> Result<Cycle> {
        let local = self.local_addrs().await?;
        Cycle::collect(&self.config, local).await
    }

    /// Run one full cycle.
    pub async fn snapshot(&self) -> Result<Demand> {
        let cycle = self.collect().await?;
        let demand = cycle.demand(&self.config);

        tracing::info!(
            tables = cycle.tables.len(),
            records = cycle.record_count(),
            processes = cycle.inventory.len(),
            owned = cycle.index.len(),
            services = demand.listen().len(),
            estab = demand.estab().len(),
            "snapshot complete"
        );

        Ok(demand)
    }
}
