//! demand command - service demand topology.
//!
//! Prints which local services talk to which, built from the kernel socket
//! tables and the process tree.

mod output;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use sockdemand::sockdiag::types::{AddressFamily, Transport};
use sockdemand::config::MAX_CPU_DECIMALS;
use sockdemand::{Collector, CpuPrecision, CycleConfig, Source};

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    /// /proc/net text tables.
    Text,
    /// INET_DIAG netlink dumps.
    Netlink,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Text => Source::Text,
            SourceArg::Netlink => Source::Netlink,
        }
    }
}

#[derive(Parser)]
#[command(name = "demand", version, about = "Service demand topology snapshot")]
struct Cli {
    /// Where socket records come from.
    #[arg(short, long, value_enum)]
    source: Option<SourceArg>,

    /// Root of the proc filesystem.
    #[arg(long)]
    proc_root: Option<PathBuf>,

    /// Collect IPv4 sockets only.
    #[arg(short = '4', long, conflicts_with = "ipv6")]
    ipv4: bool,

    /// Collect IPv6 sockets only.
    #[arg(short = '6', long)]
    ipv6: bool,

    /// Also collect UDP sockets.
    #[arg(short, long)]
    udp: bool,

    /// Truncate every CPU share to this many decimals (0-15).
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=MAX_CPU_DECIMALS as i64))]
    precision: Option<u32>,

    /// Load settings from a JSON file; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output in JSON format.
    #[arg(short, long)]
    json: bool,

    /// Pretty-print JSON output.
    #[arg(short, long, requires = "json")]
    pretty: bool,

    /// Seconds between snapshots.
    #[arg(short, long, default_value_t = 5)]
    interval: u64,

    /// Number of snapshots, 0 to run until interrupted.
    #[arg(short, long, default_value_t = 1)]
    count: u64,
}

impl Cli {
    fn cycle_config(&self) -> anyhow::Result<CycleConfig> {
        let mut config = match &self.config {
            Some(path) => CycleConfig::load(path)?,
            None => CycleConfig::default(),
        };

        if let Some(source) = self.source {
            config = config.source(source.into());
        }
        if let Some(root) = &self.proc_root {
            config = config.proc_root(root);
        }
        if self.ipv4 {
            config = config.families(&[AddressFamily::Inet]);
        } else if self.ipv6 {
            config = config.families(&[AddressFamily::Inet6]);
        }
        if self.udp {
            config = config.transports(&[Transport::Tcp, Transport::Udp]);
        }
        if let Some(n) = self.precision {
            config = config.cpu_precision(CpuPrecision::Uniform(n));
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let collector = Collector::new(cli.cycle_config()?);
    let interval = Duration::from_secs(cli.interval);

    let mut taken = 0u64;
    loop {
        let demand = collector.snapshot().await?;
        if cli.json {
            output::print_json(&demand, cli.pretty)?;
        } else {
            output::print_text(&demand)?;
        }

        taken += 1;
        if cli.count != 0 && taken >= cli.count {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}
