//! Classification of correlated socket records into a [`Demand`].

use crate::config::{CpuPrecision, MAX_CPU_DECIMALS};
use crate::procfs::inventory::{ProcessInfo, ProcessInventory};
use crate::procfs::stat::state_label;
use crate::procfs::system::SystemInfo;
use crate::sockdiag::record::{SocketRecord, SocketTable};
use crate::util::addr::LocalAddrs;

use super::demand::{Demand, EstabTopology, ListenTopology, ResourceSnapshot};

/// Find the record on the other end of `current`'s connection.
///
/// Only connections to a local host have a peer in the tables. The peer is
/// the first owned record, other than `current`, whose local port equals
/// `current`'s remote port.
pub fn find_peer<'a>(
    tables: &'a [SocketTable],
    current: &SocketRecord,
    local: &LocalAddrs,
) -> Option<&'a SocketRecord> {
    if !local.is_local(&current.remote.addr) {
        return None;
    }

    tables
        .iter()
        .flat_map(|t| t.records())
        .filter(|c| !std::ptr::eq(*c, current))
        .find(|c| c.owner.is_some() && c.local.port == current.remote.port)
}

/// Truncate `value` to `decimals` decimal places, at most [`MAX_CPU_DECIMALS`].
fn truncate(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals.min(MAX_CPU_DECIMALS) as i32);
    (value * scale).trunc() / scale
}

/// Resource usage of one process, with its CPU share truncated to `decimals`.
pub fn resource_snapshot(proc: &ProcessInfo, system: &SystemInfo, decimals: u32) -> ResourceSnapshot {
    let stat = &proc.stat;
    let busy = stat.utime + stat.stime;
    let cpu_fraction = if system.total_cpu_ticks == 0 {
        0.0
    } else {
        truncate(busy as f64 / system.total_cpu_ticks as f64, decimals)
    };

    ResourceSnapshot {
        state: state_label(stat.state).to_string(),
        start_time: system.boot_time + stat.starttime / system.clk_tck.max(1),
        cpu_fraction,
        virtual_size: stat.vsize,
        resident_bytes: u64::try_from(stat.rss).unwrap_or(0) * system.page_size,
    }
}

/// Builds one [`Demand`] from correlated socket tables.
///
/// # Example
///
/// ```ignore
/// let demand = TopologyBuilder::new(&local, system)
///     .precision(CpuPrecision::Uniform(4))
///     .build(&tables, &inventory);
/// ```
#[derive(Debug, Clone)]
pub struct TopologyBuilder<'a> {
    local: &'a LocalAddrs,
    system: SystemInfo,
    precision: CpuPrecision,
}

impl<'a> TopologyBuilder<'a> {
    /// Create a builder with legacy CPU precision.
    pub fn new(local: &'a LocalAddrs, system: SystemInfo) -> Self {
        Self {
            local,
            system,
            precision: CpuPrecision::default(),
        }
    }

    /// Set the CPU share precision.
    pub fn precision(mut self, precision: CpuPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Run every phase and return the snapshot.
    pub fn build(&self, tables: &[SocketTable], inventory: &ProcessInventory) -> Demand {
        let mut demand = Demand::default();
        self.register_listeners(&mut demand, tables);
        self.classify_established(&mut demand, tables);
        self.attach_resources(&mut demand, inventory);
        demand
    }

    fn register_listeners(&self, demand: &mut Demand, tables: &[SocketTable]) {
        for rec in tables.iter().flat_map(|t| t.records()) {
            if !rec.is_listen() {
                continue;
            }
            let Some(owner) = rec.owner() else {
                continue;
            };
            demand
                .listen
                .entry(owner.to_string())
                .or_default()
                .addresses
                .insert(rec.local);
        }
    }

    fn classify_established(&self, demand: &mut Demand, tables: &[SocketTable]) {
        for rec in tables.iter().flat_map(|t| t.records()) {
            if !rec.is_established() {
                continue;
            }
            let Some(owner) = rec.owner() else {
                continue;
            };

            if let Some(service) = demand.listen.get_mut(owner) {
                classify_service(service, rec, tables, self.local);
                continue;
            }

            // Mirror side of a connection the listener already classified.
            if self.local.is_local(&rec.remote.addr) && demand.is_port_listening(rec.remote.port) {
                continue;
            }

            *demand
                .estab
                .entry(owner.to_string())
                .or_insert_with(EstabTopology::default)
                .remote_counts
                .entry(rec.remote)
                .or_insert(0) += 1;
        }
    }

    fn attach_resources(&self, demand: &mut Demand, inventory: &ProcessInventory) {
        let listen_decimals = self.precision.listen_decimals();
        let estab_decimals = self.precision.estab_decimals();

        for (name, topo) in demand.listen.iter_mut() {
            for (&pid, proc) in inventory.by_name(name).into_iter().flatten() {
                topo.resources
                    .insert(pid, resource_snapshot(proc, &self.system, listen_decimals));
            }
        }
        for (name, topo) in demand.estab.iter_mut() {
            for (&pid, proc) in inventory.by_name(name).into_iter().flatten() {
                topo.resources
                    .insert(pid, resource_snapshot(proc, &self.system, estab_decimals));
            }
        }
    }
}

fn classify_service(
    service: &mut ListenTopology,
    rec: &SocketRecord,
    tables: &[SocketTable],
    local: &LocalAddrs,
) {
    let inbound = service.listens_on(rec.local.port);
    let name = match find_peer(tables, rec, local).and_then(|peer| peer.owner()) {
        Some(peer) => peer.to_string(),
        None => rec.remote.to_string(),
    };

    if inbound {
        service.add_client(name);
    } else {
        service.add_upstream(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::stat::ProcStat;
    use crate::sockdiag::record::Endpoint;
    use crate::sockdiag::types::{AddressFamily, TcpState, Transport};
    use std::collections::BTreeMap;

    fn local() -> LocalAddrs {
        LocalAddrs::new(["127.0.0.1".parse().unwrap(), "192.168.1.10".parse().unwrap()])
    }

    fn system() -> SystemInfo {
        SystemInfo {
            boot_time: 1_700_000_000,
            total_cpu_ticks: 1024,
            clk_tck: 100,
            page_size: 4096,
        }
    }

    struct Tables {
        table: SocketTable,
        next_inode: u64,
    }

    impl Tables {
        fn new() -> Self {
            Self {
                table: SocketTable::new(AddressFamily::Inet, Transport::Tcp),
                next_inode: 1000,
            }
        }

        fn add(&mut self, owner: Option<&str>, state: TcpState, local: &str, remote: &str) {
            let parse = |s: &str| {
                let (host, port) = s.rsplit_once(':').unwrap();
                Endpoint::new(host.parse().unwrap(), port.parse().unwrap())
            };
            let mut rec = SocketRecord::new(AddressFamily::Inet, Transport::Tcp);
            rec.inode = self.next_inode;
            self.next_inode += 1;
            rec.state = state;
            rec.local = parse(local);
            rec.remote = parse(remote);
            rec.owner = owner.map(String::from);
            self.table.insert(rec);
        }

        fn listen(&mut self, owner: &str, local: &str) {
            self.add(Some(owner), TcpState::Listen, local, "0.0.0.0:0");
        }

        fn estab(&mut self, owner: &str, local: &str, remote: &str) {
            self.add(Some(owner), TcpState::Established, local, remote);
        }

        fn build(self) -> Demand {
            let local = local();
            TopologyBuilder::new(&local, system())
                .build(&[self.table], &ProcessInventory::default())
        }
    }

    #[test]
    fn test_outbound_from_service_is_upstream() {
        let remotes = ["203.0.113.5:80", "203.0.113.6:80", "203.0.113.7:80"];
        let mut t = Tables::new();
        t.listen("svcA", "0.0.0.0:80");
        for (i, remote) in remotes.iter().enumerate() {
            t.estab("svcA", &format!("192.168.1.10:{}", 41000 + i), remote);
        }

        let demand = t.build();
        let svc = &demand.listen()["svcA"];
        assert!(svc.clients.is_empty());
        assert_eq!(svc.upstream.len(), remotes.len());
        assert_eq!(svc.upstream.iter().collect::<Vec<_>>(), remotes);
        assert!(demand.estab().is_empty());
    }

    #[test]
    fn test_inbound_from_remote_client_falls_back_to_endpoint() {
        let mut t = Tables::new();
        t.listen("svcA", "0.0.0.0:80");
        t.estab("svcA", "192.168.1.10:80", "198.51.100.7:51000");
        t.estab("svcA", "192.168.1.10:80", "198.51.100.8:51001");

        let demand = t.build();
        let svc = &demand.listen()["svcA"];
        assert!(svc.upstream.is_empty());
        assert_eq!(
            svc.clients.iter().collect::<Vec<_>>(),
            vec!["198.51.100.7:51000", "198.51.100.8:51001"]
        );
        assert!(demand.estab().is_empty());
    }

    #[test]
    fn test_loopback_client_is_not_double_counted() {
        let mut t = Tables::new();
        t.listen("nginx", "127.0.0.1:8080");
        t.estab("curl", "127.0.0.1:50000", "127.0.0.1:8080");
        t.estab("nginx", "127.0.0.1:8080", "127.0.0.1:50000");

        let demand = t.build();
        assert!(demand.estab().get("curl").is_none());
        let nginx = &demand.listen()["nginx"];
        assert_eq!(nginx.clients.iter().collect::<Vec<_>>(), vec!["curl"]);
        assert!(nginx.upstream.is_empty());
    }

    #[test]
    fn test_service_to_service() {
        let mut t = Tables::new();
        t.listen("app", "0.0.0.0:9000");
        t.listen("postgres", "127.0.0.1:5432");
        t.estab("app", "127.0.0.1:40000", "127.0.0.1:5432");
        t.estab("postgres", "127.0.0.1:5432", "127.0.0.1:40000");

        let demand = t.build();
        let app = &demand.listen()["app"];
        assert_eq!(app.upstream.iter().collect::<Vec<_>>(), vec!["postgres"]);
        let pg = &demand.listen()["postgres"];
        assert_eq!(pg.clients.iter().collect::<Vec<_>>(), vec!["app"]);
        assert!(pg.upstream.is_empty());
    }

    #[test]
    fn test_remote_counts_and_unowned_records() {
        let mut t = Tables::new();
        t.estab("curl", "192.168.1.10:50001", "10.0.0.9:443");
        t.estab("curl", "192.168.1.10:50002", "10.0.0.9:443");
        t.estab("curl", "192.168.1.10:50003", "10.0.0.7:443");
        t.add(None, TcpState::Listen, "0.0.0.0:22", "0.0.0.0:0");
        t.add(None, TcpState::Established, "192.168.1.10:22", "10.0.0.1:6000");

        let demand = t.build();
        assert!(demand.listen().is_empty());
        let curl = &demand.estab()["curl"];
        let counts: BTreeMap<String, u64> = curl
            .remote_counts
            .iter()
            .map(|(ep, n)| (ep.to_string(), *n))
            .collect();
        assert_eq!(counts["10.0.0.9:443"], 2);
        assert_eq!(counts["10.0.0.7:443"], 1);
    }

    #[test]
    fn test_unowned_peer_falls_back_to_endpoint() {
        let mut t = Tables::new();
        t.listen("api", "0.0.0.0:8000");
        t.add(None, TcpState::Established, "127.0.0.1:6379", "127.0.0.1:45000");
        t.estab("api", "127.0.0.1:45000", "127.0.0.1:6379");

        let demand = t.build();
        let api = &demand.listen()["api"];
        assert_eq!(
            api.upstream.iter().collect::<Vec<_>>(),
            vec!["127.0.0.1:6379"]
        );
    }

    fn inventory() -> ProcessInventory {
        let mut inv = ProcessInventory::default();
        inv.insert(ProcessInfo {
            stat: ProcStat {
                pid: 42,
                name: "svc".into(),
                state: 'S',
                utime: 2,
                stime: 1,
                starttime: 4200,
                vsize: 104857600,
                rss: 2560,
                ..Default::default()
            },
            sockets: Default::default(),
        });
        inv
    }

    #[test]
    fn test_resource_precision() {
        let inv = inventory();
        let proc = &inv.by_name("svc").unwrap()[&42];

        let snap = resource_snapshot(proc, &system(), 4);
        assert_eq!(snap.state, "Sleeping");
        assert_eq!(snap.start_time, 1_700_000_042);
        assert_eq!(snap.cpu_fraction, 0.0029);
        assert_eq!(snap.virtual_size, 104857600);
        assert_eq!(snap.resident_bytes, 2560 * 4096);

        assert_eq!(resource_snapshot(proc, &system(), 5).cpu_fraction, 0.00292);

        let idle = SystemInfo {
            total_cpu_ticks: 0,
            ..system()
        };
        assert_eq!(resource_snapshot(proc, &idle, 4).cpu_fraction, 0.0);
    }

    #[test]
    fn test_oversized_precision_stays_finite() {
        assert_eq!(truncate(0.0, 400), 0.0);
        assert_eq!(truncate(0.5, u32::MAX), 0.5);

        let inv = inventory();
        let proc = &inv.by_name("svc").unwrap()[&42];
        let snap = resource_snapshot(proc, &system(), 400);
        assert!(snap.cpu_fraction.is_finite());
        assert!((snap.cpu_fraction - 3.0 / 1024.0).abs() < 1e-12);
    }

    #[test]
    fn test_resources_attached_per_side() {
        let mut table = SocketTable::new(AddressFamily::Inet, Transport::Tcp);
        let mut rec = SocketRecord::new(AddressFamily::Inet, Transport::Tcp);
        rec.inode = 1;
        rec.state = TcpState::Listen;
        rec.local = Endpoint::new("0.0.0.0".parse().unwrap(), 80);
        rec.owner = Some("svc".into());
        table.insert(rec);

        let local = local();
        let tables = [table];
        let legacy = TopologyBuilder::new(&local, system()).build(&tables, &inventory());
        assert_eq!(legacy.listen()["svc"].resources[&42].cpu_fraction, 0.0029);

        let uniform = TopologyBuilder::new(&local, system())
            .precision(CpuPrecision::Uniform(2))
            .build(&tables, &inventory());
        assert_eq!(uniform.listen()["svc"].resources[&42].cpu_fraction, 0.0);
    }
}
