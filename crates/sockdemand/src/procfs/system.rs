//! System-wide constants used to scale per-process counters.

use std::path::Path;

use procfs::{FromReadSI, KernelStats};

/// Boot time, CPU totals and unit sizes for one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemInfo {
    /// Boot time in seconds since the epoch (`btime`).
    pub boot_time: u64,
    /// Sum of the aggregate `cpu` line, in clock ticks.
    pub total_cpu_ticks: u64,
    /// Clock ticks per second.
    pub clk_tck: u64,
    /// Page size in bytes.
    pub page_size: u64,
}

/// Aggregate CPU ticks: user, nice, system, idle, iowait, irq, softirq and
/// steal. Guest time is already part of user and nice.
pub fn total_ticks(stats: &KernelStats) -> u64 {
    let cpu = &stats.total;
    let optional = [cpu.iowait, cpu.irq, cpu.softirq, cpu.steal];
    cpu.user + cpu.nice + cpu.system + cpu.idle + optional.into_iter().flatten().sum::<u64>()
}

impl SystemInfo {
    /// Read `<proc_root>/stat` and the host's tick rate and page size.
    ///
    /// An unreadable stat file leaves boot time and CPU total at zero.
    pub fn read(proc_root: &Path) -> Self {
        let path = proc_root.join("stat");
        let (boot_time, total_cpu_ticks) =
            match KernelStats::from_file(&path, procfs::current_system_info()) {
                Ok(stats) => (stats.btime, total_ticks(&stats)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read system stat");
                    (0, 0)
                }
            };

        Self {
            boot_time,
            total_cpu_ticks,
            clk_tck: procfs::ticks_per_second().max(1),
            page_size: procfs::page_size(),
        }
    }
}
