//! The demand snapshot produced by one cycle.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::sockdiag::record::Endpoint;

/// Serialize a set as an object whose values are all `true`.
fn as_flag_map<T, S>(set: &BTreeSet<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(set.len()))?;
    for item in set {
        map.serialize_entry(&item.to_string(), &true)?;
    }
    map.end()
}

/// Resource usage of one process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    /// Lifecycle state label.
    pub state: String,
    /// Start time in seconds since the epoch.
    #[serde(rename = "starttime")]
    pub start_time: u64,
    /// Share of total CPU time spent by the process, truncated.
    #[serde(rename = "loadavg")]
    pub cpu_fraction: f64,
    /// Virtual memory size in bytes.
    #[serde(rename = "vmsize")]
    pub virtual_size: u64,
    /// Resident memory in bytes.
    #[serde(rename = "vmrss")]
    pub resident_bytes: u64,
}

/// A listening service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListenTopology {
    /// Processes behind the service, by pid.
    #[serde(rename = "procinfo")]
    pub resources: BTreeMap<u32, ResourceSnapshot>,
    /// Who connects to the service.
    #[serde(
        skip_serializing_if = "BTreeSet::is_empty",
        serialize_with = "as_flag_map"
    )]
    pub clients: BTreeSet<String>,
    /// What the service connects out to.
    #[serde(
        skip_serializing_if = "BTreeSet::is_empty",
        serialize_with = "as_flag_map"
    )]
    pub upstream: BTreeSet<String>,
    /// Local endpoints in LISTEN state.
    #[serde(rename = "addrs", serialize_with = "as_flag_map")]
    pub addresses: BTreeSet<Endpoint>,
}

impl ListenTopology {
    /// Record `name` as a client. A client is never also an upstream.
    pub fn add_client(&mut self, name: String) {
        self.upstream.remove(&name);
        self.clients.insert(name);
    }

    /// Record `name` as an upstream unless it is already a client.
    pub fn add_upstream(&mut self, name: String) {
        if !self.clients.contains(&name) {
            self.upstream.insert(name);
        }
    }

    /// Whether one of the listening endpoints uses `port`.
    pub fn listens_on(&self, port: u16) -> bool {
        self.addresses.iter().any(|ep| ep.port == port)
    }
}

/// A process with established connections but no listening socket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EstabTopology {
    /// Processes sharing the name, by pid.
    #[serde(rename = "procinfo")]
    pub resources: BTreeMap<u32, ResourceSnapshot>,
    /// Connection count per remote endpoint.
    #[serde(rename = "upstream")]
    pub remote_counts: BTreeMap<Endpoint, u64>,
}

/// Listen and Estab views keyed by process name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Demand {
    pub(crate) listen: BTreeMap<String, ListenTopology>,
    pub(crate) estab: BTreeMap<String, EstabTopology>,
}

impl Demand {
    /// Listening services.
    pub fn listen(&self) -> &BTreeMap<String, ListenTopology> {
        &self.listen
    }

    /// Non-service processes with established connections.
    pub fn estab(&self) -> &BTreeMap<String, EstabTopology> {
        &self.estab
    }

    /// Whether any known service listens on `port`.
    pub fn is_port_listening(&self, port: u16) -> bool {
        self.listen.values().any(|t| t.listens_on(port))
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
