//! `/proc/[pid]/stat` parsing.

use crate::netlink::error::{Error, Result};

/// Number of fields a complete stat line carries.
pub const STAT_FIELDS: usize = 52;

/// The subset of `/proc/[pid]/stat` used for resource snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcStat {
    /// Process ID.
    pub pid: u32,
    /// Command name without the surrounding parentheses.
    pub name: String,
    /// Single-character state code.
    pub state: char,
    /// Parent process ID.
    pub ppid: u32,
    /// User-mode time in clock ticks.
    pub utime: u64,
    /// Kernel-mode time in clock ticks.
    pub stime: u64,
    /// Children's user-mode time in clock ticks.
    pub cutime: i64,
    /// Children's kernel-mode time in clock ticks.
    pub cstime: i64,
    /// Number of threads.
    pub num_threads: i64,
    /// Start time in clock ticks since boot.
    pub starttime: u64,
    /// Virtual memory size in bytes.
    pub vsize: u64,
    /// Resident set size in pages.
    pub rss: i64,
}

fn num<T: std::str::FromStr>(rest: &[&str], field: usize, name: &str) -> Result<T> {
    // `rest` starts at field 3 (state).
    let s = rest
        .get(field - 3)
        .ok_or_else(|| Error::Parse(format!("stat: missing {}", name)))?;
    s.parse()
        .map_err(|_| Error::Parse(format!("stat: bad {}: {:?}", name, s)))
}

/// Parse a stat line.
///
/// The command name sits between the first `(` and the last `)` and may
/// contain spaces or parentheses itself. Lines with fewer than
/// [`STAT_FIELDS`] fields are rejected.
pub fn parse_stat(line: &str) -> Result<ProcStat> {
    let line = line.trim_end();
    let open = line
        .find('(')
        .ok_or_else(|| Error::Parse("stat: no command name".into()))?;
    let close = line
        .rfind(')')
        .filter(|&c| c > open)
        .ok_or_else(|| Error::Parse("stat: unterminated command name".into()))?;

    let pid: u32 = line[..open]
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("stat: bad pid: {:?}", &line[..open])))?;
    let name = line[open + 1..close].to_string();
    let rest: Vec<&str> = line[close + 1..].split_whitespace().collect();

    let total = rest.len() + 2;
    if total < STAT_FIELDS {
        return Err(Error::Parse(format!(
            "stat: {} fields, expected {}",
            total, STAT_FIELDS
        )));
    }

    let state = rest[0]
        .chars()
        .next()
        .ok_or_else(|| Error::Parse("stat: empty state".into()))?;

    Ok(ProcStat {
        pid,
        name,
        state,
        ppid: num(&rest, 4, "ppid")?,
        utime: num(&rest, 14, "utime")?,
        stime: num(&rest, 15, "stime")?,
        cutime: num(&rest, 16, "cutime")?,
        cstime: num(&rest, 17, "cstime")?,
        num_threads: num(&rest, 20, "num_threads")?,
        starttime: num(&rest, 22, "starttime")?,
        vsize: num(&rest, 23, "vsize")?,
        rss: num(&rest, 24, "rss")?,
    })
}

/// Human label for a state code.
pub fn state_label(state: char) -> &'static str {
    match state {
        'R' => "Running",
        'S' => "Sleeping",
        'D' => "Waiting",
        'Z' => "Zombie",
        'T' => "Stopped",
        't' => "Tracing",
        'X' | 'x' => "Dead",
        'K' => "Wakekill",
        'W' => "Waking",
        'P' => "Parked",
        _ => "Unknown",
    }
}
