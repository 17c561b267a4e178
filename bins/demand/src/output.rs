//! Output formatting for the demand command.

use std::collections::BTreeMap;
use std::io::{self, Write};

use sockdemand::Demand;
use sockdemand::topology::ResourceSnapshot;

/// Format bytes as a human-readable size.
fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

fn write_resources<W: Write>(w: &mut W, resources: &BTreeMap<u32, ResourceSnapshot>) -> io::Result<()> {
    writeln!(w, "\t\tProcInfo")?;
    for (pid, res) in resources {
        writeln!(w, "\t\t\tPid:{}", pid)?;
        writeln!(w, "\t\t\t\tState:{}", res.state)?;
        writeln!(w, "\t\t\t\tAvgLoad:{:.3}%", res.cpu_fraction * 100.0)?;
        writeln!(
            w,
            "\t\t\t\tVmSize:{} VmRSS:{}",
            format_bytes(res.virtual_size),
            format_bytes(res.resident_bytes)
        )?;
    }
    Ok(())
}

/// Write the Listen/Estab tree.
pub fn write_text<W: Write>(w: &mut W, demand: &Demand) -> io::Result<()> {
    writeln!(w, "Listen")?;
    for (name, svc) in demand.listen() {
        writeln!(w, "\t{}", name)?;
        write_resources(w, &svc.resources)?;

        writeln!(w, "\t\tAddrs")?;
        for addr in &svc.addresses {
            writeln!(w, "\t\t\t{}", addr)?;
        }
        if !svc.clients.is_empty() {
            writeln!(w, "\t\tClients")?;
            for client in &svc.clients {
                writeln!(w, "\t\t\t{}", client)?;
            }
        }
        if !svc.upstream.is_empty() {
            writeln!(w, "\t\tUpstream")?;
            for up in &svc.upstream {
                writeln!(w, "\t\t\t{}", up)?;
            }
        }
    }

    writeln!(w, "Estab")?;
    for (name, topo) in demand.estab() {
        writeln!(w, "\t{}", name)?;
        write_resources(w, &topo.resources)?;
        writeln!(w, "\t\tRemote")?;
        for (remote, count) in &topo.remote_counts {
            writeln!(w, "\t\t\t{} (count:{})", remote, count)?;
        }
    }

    Ok(())
}

/// Print the tree to stdout.
pub fn print_text(demand: &Demand) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_text(&mut handle, demand)
}

/// Print the snapshot as JSON.
pub fn print_json(demand: &Demand, pretty: bool) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();

    if pretty {
        serde_json::to_writer_pretty(&mut handle, demand)?;
    } else {
        serde_json::to_writer(&mut handle, demand)?;
    }
    writeln!(handle)?;
    Ok(())
}
