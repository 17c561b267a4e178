//! Integration tests against the running kernel.
//!
//! These open NETLINK_ROUTE and NETLINK_SOCK_DIAG sockets and read the real
//! /proc, so they are gated behind the `integration` feature.
//! Run with: `cargo test -p sockdemand --test live --features integration`

#![cfg(feature = "integration")]

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};

use sockdemand::netlink::addr::interface_addresses;
use sockdemand::netlink::sockdiag::{DumpRequest, dump_sockets};
use sockdemand::procfs::net::read_table;
use sockdemand::sockdiag::record::Endpoint;
use sockdemand::sockdiag::types::{AddressFamily, TcpState, Transport};
use sockdemand::{Collector, CycleConfig, Source};

/// A listener on loopback with one accepted connection.
struct Pair {
    listener: TcpListener,
    _client: TcpStream,
    _served: TcpStream,
}

impl Pair {
    fn open() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (served, _) = listener.accept().unwrap();
        Self {
            listener,
            _client: client,
            _served: served,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr().ip(), self.addr().port())
    }
}

#[tokio::test]
async fn test_interface_addresses_include_loopback() {
    let addrs = interface_addresses().await.unwrap();
    assert!(addrs.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
}

#[tokio::test]
async fn test_dump_finds_listener() {
    let pair = Pair::open();
    let table = dump_sockets(DumpRequest::new(AddressFamily::Inet, Transport::Tcp), 16, 8192)
        .await
        .unwrap();

    let listen = table
        .records()
        .find(|r| r.is_listen() && r.local == pair.endpoint())
        .expect("listener missing from dump");
    assert_ne!(listen.inode, 0);
    assert!(listen.diag.is_some());

    let peers = table
        .records()
        .filter(|r| r.state == TcpState::Established && r.local.port == pair.addr().port())
        .count();
    assert_eq!(peers, 1);
}

#[tokio::test]
async fn test_text_and_netlink_agree_on_listener() {
    let pair = Pair::open();
    let text = read_table("/proc".as_ref(), AddressFamily::Inet, Transport::Tcp).unwrap();
    let dump = dump_sockets(DumpRequest::new(AddressFamily::Inet, Transport::Tcp), 4, 8192)
        .await
        .unwrap();

    let from_text = text.records().find(|r| r.is_listen() && r.local == pair.endpoint());
    let from_dump = dump.records().find(|r| r.is_listen() && r.local == pair.endpoint());
    assert_eq!(
        from_text.map(|r| r.inode),
        from_dump.map(|r| r.inode),
        "sources disagree on the listener inode"
    );
}

async fn assert_snapshot_sees_listener(source: Source) {
    let pair = Pair::open();
    let collector = Collector::new(
        CycleConfig::new()
            .source(source)
            .families(&[AddressFamily::Inet]),
    );
    let demand = collector.snapshot().await.unwrap();

    let ours = demand
        .listen()
        .values()
        .find(|svc| svc.addresses.contains(&pair.endpoint()))
        .expect("own listener not attributed");
    assert!(ours.resources.contains_key(&std::process::id()));
    assert!(demand.is_port_listening(pair.addr().port()));
}

#[tokio::test]
async fn test_snapshot_from_text_source() {
    assert_snapshot_sees_listener(Source::Text).await;
}

#[tokio::test]
async fn test_snapshot_from_netlink_source() {
    assert_snapshot_sees_listener(Source::Netlink).await;
}
