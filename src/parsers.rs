//! Pure parsing functions kept separate from I/O so they can be exercised with plain string
//! fixtures instead of a [`crate::backend::Backend`].

use regex::Regex;

use crate::error::{Error, ErrorKind, Result};

/// Parses the textual form of `cpuset.cpus`/`cpuset.cpus.effective` (`"0-3,7,9-11"`) into an
/// ordered, deduplicated list of CPU ids.
///
/// An empty string, or any input that resolves to zero ids, is an error: a cpuset with no CPUs
/// cannot run anything, so a host reporting one is misconfigured rather than merely "empty".
pub fn parse_cpuset(raw: &str) -> Result<Vec<u32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::parse(raw));
    }

    let mut ids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().map_err(|_| Error::parse(raw))?;
            let end: u32 = end.trim().parse().map_err(|_| Error::parse(raw))?;
            if start > end {
                return Err(Error::parse(raw));
            }
            ids.extend(start..=end);
        } else {
            ids.push(part.parse().map_err(|_| Error::parse(raw))?);
        }
    }

    ids.sort_unstable();
    ids.dedup();

    if ids.is_empty() {
        return Err(Error::parse(raw));
    }
    Ok(ids)
}

/// Renders a CPU id list back into the compact `"0-3,7,9-11"` form, the inverse of
/// [`parse_cpuset`]. Assumes the input is already sorted and deduplicated.
pub fn format_cpuset(ids: &[u32]) -> String {
    let mut ranges: Vec<String> = Vec::new();
    let mut i = 0;
    while i < ids.len() {
        let start = ids[i];
        let mut end = start;
        while i + 1 < ids.len() && ids[i + 1] == end + 1 {
            end = ids[i + 1];
            i += 1;
        }
        if start == end {
            ranges.push(start.to_string());
        } else {
            ranges.push(format!("{}-{}", start, end));
        }
        i += 1;
    }
    ranges.join(",")
}

/// A CPU allowance as read from a v1 `cpu.shares`/`cpu.cfs_quota_us`/`cpu.cfs_period_us` triple
/// or a v2 `cpu.weight`/`cpu.max` pair, normalized to a single shape both backends can encode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuAllowance {
    /// Relative share, 2-262144 on v1 (`cpu.shares`), 1-10000 on v2 (`cpu.weight`).
    pub shares: u64,
    /// Absolute ceiling as `(quota_us, period_us)`, or `None` for "no ceiling".
    pub quota: Option<(u64, u64)>,
}

const DEFAULT_PERIOD_US: u64 = 100_000;

/// Parses a user-supplied allowance string, in one of two forms:
///
/// - `"<pct>%"` — a percentage of one CPU, converted directly to a share of `max_shares`; no
///   quota ceiling is set.
/// - `"<quota>ms/<period>ms"` — an explicit quota/period pair; shares are left at `max_shares`
///   (adjusted by `priority` like the percent form).
///
/// `priority` (0-10, lower means higher priority, matching `nice`) adjusts the derived share
/// value downwards by `10 - priority`; `max_shares` is the backend's ceiling (262144 on v1, 10000
/// on v2) so the same priority produces a proportionally similar share on either backend.
pub fn parse_cpu_allowance(value: &str, priority: u8, max_shares: u64) -> Result<CpuAllowance> {
    let percent_re = Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*%\s*$").unwrap();
    let quota_re = Regex::new(r"^\s*(\d+)\s*ms\s*/\s*(\d+)\s*ms\s*$").unwrap();

    let adjustment = 10u64.saturating_sub(u64::from(priority.min(10)));

    if let Some(caps) = percent_re.captures(value) {
        let pct: f64 = caps[1].parse().map_err(|_| Error::parse(value))?;
        if !(0.0..=100.0).contains(&pct) {
            return Err(Error::invalid_argument(format!("percentage out of range: {}", value)));
        }
        let shares = ((max_shares as f64) * pct / 100.0).round() as u64;
        return Ok(CpuAllowance {
            shares: shares.saturating_sub(adjustment),
            quota: None,
        });
    }

    if let Some(caps) = quota_re.captures(value) {
        let quota_ms: u64 = caps[1].parse().map_err(|_| Error::parse(value))?;
        let period_ms: u64 = caps[2].parse().map_err(|_| Error::parse(value))?;
        if period_ms == 0 {
            return Err(Error::invalid_argument("period must be non-zero"));
        }
        return Ok(CpuAllowance {
            shares: max_shares.saturating_sub(adjustment),
            quota: Some((quota_ms * 1000, period_ms * 1000)),
        });
    }

    Err(Error::parse(value))
}

/// `memory.stat`, decoded into a fixed output vocabulary shared by both backends.
///
/// `rss` is v1-only; v2's `memory.stat` has no equivalent counter (anonymous memory is folded
/// into `active_anon`/`inactive_anon` instead) and the field is left at zero on that backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStat {
    pub active_anon: u64,
    pub active_file: u64,
    pub inactive_anon: u64,
    pub inactive_file: u64,
    pub unevictable: u64,
    pub writeback: u64,
    pub dirty: u64,
    pub mapped: u64,
    pub rss: u64,
    pub shmem: u64,
    pub cache: u64,
    /// `active_anon + active_file`.
    pub active: u64,
    /// `inactive_anon + inactive_file`.
    pub inactive: u64,
}

// (canonical field, v1 key, v2 key); v2 key "" means the field has no v2 counterpart.
const MEMORY_STAT_FIELDS: &[(&str, &str, &str)] = &[
    ("active_anon", "active_anon", "active_anon"),
    ("active_file", "active_file", "active_file"),
    ("inactive_anon", "inactive_anon", "inactive_anon"),
    ("inactive_file", "inactive_file", "inactive_file"),
    ("unevictable", "unevictable", "unevictable"),
    ("writeback", "writeback", "writeback"),
    ("dirty", "dirty", "dirty"),
    ("mapped", "mapped_file", "file_mapped"),
    ("rss", "rss", ""),
    ("shmem", "shmem", "shmem"),
    ("cache", "cache", "file"),
];

/// Parses `memory.stat` contents (whitespace-separated `key value` lines).
///
/// On v1, a hierarchical `total_<key>` line — the cgroup's own usage plus all descendants' —
/// takes precedence over the bare `<key>` line when both are present.
pub fn parse_memory_stat(raw: &str, is_v2: bool) -> MemoryStat {
    let mut values = std::collections::HashMap::new();
    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if let Ok(n) = value.parse::<u64>() {
                values.insert(key.to_string(), n);
            }
        }
    }

    let lookup = |v1_key: &str, v2_key: &str| -> u64 {
        if is_v2 {
            if v2_key.is_empty() {
                return 0;
            }
            values.get(v2_key).copied().unwrap_or(0)
        } else {
            values
                .get(&format!("total_{}", v1_key))
                .or_else(|| values.get(v1_key))
                .copied()
                .unwrap_or(0)
        }
    };

    let mut stat = MemoryStat::default();
    for (field, v1_key, v2_key) in MEMORY_STAT_FIELDS {
        let value = lookup(v1_key, v2_key);
        match *field {
            "active_anon" => stat.active_anon = value,
            "active_file" => stat.active_file = value,
            "inactive_anon" => stat.inactive_anon = value,
            "inactive_file" => stat.inactive_file = value,
            "unevictable" => stat.unevictable = value,
            "writeback" => stat.writeback = value,
            "dirty" => stat.dirty = value,
            "mapped" => stat.mapped = value,
            "rss" => stat.rss = value,
            "shmem" => stat.shmem = value,
            "cache" => stat.cache = value,
            _ => unreachable!(),
        }
    }
    stat.active = stat.active_anon + stat.active_file;
    stat.inactive = stat.inactive_anon + stat.inactive_file;
    stat
}

/// One device's accumulated I/O counters, as reported by v1's `blkio.throttle.io_service_bytes`
/// (plus `io_serviced`) or v2's `io.stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IOStats {
    pub read_bytes: u64,
    pub written_bytes: u64,
    pub reads_completed: u64,
    pub writes_completed: u64,
}

/// Parses v2 `io.stat`, one line per device: `"<maj>:<min> rbytes=.. wbytes=.. rios=.. wios=.."`.
///
/// Some kernels intersperse a `"<maj>:<min> d<n>rbytes=.."` form on rotated lines where the
/// device id carries a `d`-prefixed discard-stat group instead of a fresh `maj:min` token; this
/// parser keeps the last seen `maj:min` token and folds subsequent `key=value` pairs into the
/// same accumulator until a genuine new `maj:min` token appears.
pub fn parse_io_stat_v2(raw: &str) -> Vec<(String, IOStats)> {
    let mut out: Vec<(String, IOStats)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let first = match fields.next() {
            Some(f) => f,
            None => continue,
        };

        let (device, rest): (Option<&str>, Vec<&str>) = if first.contains(':') && !first.contains('=') {
            (Some(first), fields.collect())
        } else {
            (None, std::iter::once(first).chain(fields).collect())
        };

        let idx = match device {
            Some(dev) => {
                out.push((dev.to_string(), IOStats::default()));
                let idx = out.len() - 1;
                current = Some(idx);
                idx
            }
            None => match current {
                Some(idx) => idx,
                None => continue,
            },
        };

        let entry = &mut out[idx].1;
        for token in rest {
            if token.starts_with('d') {
                // discard-stat group; not part of this crate's counters.
                continue;
            }
            if let Some((key, value)) = token.split_once('=') {
                let value: u64 = value.parse().unwrap_or(0);
                match key {
                    "rbytes" => entry.read_bytes = value,
                    "wbytes" => entry.written_bytes = value,
                    "rios" => entry.reads_completed = value,
                    "wios" => entry.writes_completed = value,
                    _ => {}
                }
            }
        }
    }

    out
}

/// Maps a device's `<major>:<minor>` id to its kernel-assigned name, by scanning
/// `/proc/partitions` contents. Major `7` (loop devices) is skipped — blkio limits target real
/// block devices, and loop devices churn their minor numbers across a container's lifetime.
pub fn parse_proc_partitions(raw: &str) -> std::collections::HashMap<(u32, u32), String> {
    let mut out = std::collections::HashMap::new();
    for line in raw.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let major: u32 = match fields[0].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if major == 7 {
            continue;
        }
        let minor: u32 = match fields[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        out.insert((major, minor), fields[3].to_string());
    }
    out
}

/// Extracts `SwapTotal` from `/proc/meminfo` contents, converting from kB to bytes.
pub fn parse_swap_total(raw: &str) -> Option<u64> {
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("SwapTotal:") {
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpuset_handles_ranges_and_singletons() {
        assert_eq!(parse_cpuset("0-3,7,9-11").unwrap(), vec![0, 1, 2, 3, 7, 9, 10, 11]);
    }

    #[test]
    fn parse_cpuset_rejects_empty() {
        assert_eq!(parse_cpuset("").unwrap_err().kind(), &ErrorKind::ParseError);
        assert_eq!(parse_cpuset("   ").unwrap_err().kind(), &ErrorKind::ParseError);
    }

    #[test]
    fn parse_cpuset_rejects_inverted_range() {
        assert!(parse_cpuset("5-2").is_err());
    }

    #[test]
    fn format_cpuset_collapses_runs() {
        assert_eq!(format_cpuset(&[0, 1, 2, 3, 7, 9, 10, 11]), "0-3,7,9-11");
    }

    #[test]
    fn parse_cpu_allowance_percent_sets_shares_from_percentage_not_quota() {
        let allowance = parse_cpu_allowance("50%", 0, 262_144).unwrap();
        assert_eq!(allowance.quota, None);
        // priority 0 => adjustment of (10 - 0) below the raw percentage share.
        assert_eq!(allowance.shares, 262_144 / 2 - 10);
    }

    #[test]
    fn parse_cpu_allowance_quota_form_leaves_shares_at_max_shares_minus_adjustment() {
        let allowance = parse_cpu_allowance("200ms/100ms", 5, 10_000).unwrap();
        assert_eq!(allowance.quota, Some((200_000, 100_000)));
        assert_eq!(allowance.shares, 9_995);
    }

    /// The exact two laws from this crate's specification: at the default priority (10, i.e. no
    /// downward adjustment), `"50%"` halves `max_shares` with no quota, and `"25ms/100ms"` leaves
    /// `max_shares` untouched while setting an explicit quota/period.
    #[test]
    fn parse_cpu_allowance_matches_specification_laws_at_default_priority() {
        let percent = parse_cpu_allowance("50%", 10, 262_144).unwrap();
        assert_eq!(percent.shares, 262_144 / 2);
        assert_eq!(percent.quota, None);

        let quota = parse_cpu_allowance("25ms/100ms", 10, 262_144).unwrap();
        assert_eq!(quota.shares, 262_144);
        assert_eq!(quota.quota, Some((25_000, 100_000)));
    }

    #[test]
    fn parse_cpu_allowance_rejects_garbage() {
        assert!(parse_cpu_allowance("whatever", 0, 1024).is_err());
    }

    #[test]
    fn parse_memory_stat_picks_the_right_key_set() {
        let v1 = parse_memory_stat("cache 100\nrss 200\nactive_anon 10\nactive_file 20\n", false);
        assert_eq!(v1.cache, 100);
        assert_eq!(v1.rss, 200);
        assert_eq!(v1.active, 30);

        let v2 = parse_memory_stat("file 100\nactive_anon 10\nactive_file 20\n", true);
        assert_eq!(v2.cache, 100);
        assert_eq!(v2.rss, 0);
        assert_eq!(v2.active, 30);
    }

    #[test]
    fn parse_memory_stat_prefers_total_prefixed_v1_fields() {
        let v1 = parse_memory_stat("cache 100\ntotal_cache 900\n", false);
        assert_eq!(v1.cache, 900);
    }

    #[test]
    fn parse_io_stat_v2_reads_device_lines() {
        let raw = "8:0 rbytes=1024 wbytes=2048 rios=4 wios=8\n7:0 rbytes=99 wbytes=0 rios=1 wios=0\n";
        let stats = parse_io_stat_v2(raw);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0, "8:0");
        assert_eq!(stats[0].1.read_bytes, 1024);
        assert_eq!(stats[0].1.writes_completed, 8);
    }

    #[test]
    fn parse_proc_partitions_skips_loop_devices() {
        let raw = "major minor  #blocks  name\n\n   8        0   10485760 sda\n   7        0      65536 loop0\n";
        let devices = parse_proc_partitions(raw);
        assert_eq!(devices.get(&(8, 0)), Some(&"sda".to_string()));
        assert_eq!(devices.get(&(7, 0)), None);
    }

    #[test]
    fn parse_swap_total_converts_kb_to_bytes() {
        let raw = "MemTotal:       16384000 kB\nSwapTotal:        2048000 kB\n";
        assert_eq!(parse_swap_total(raw), Some(2_048_000 * 1024));
    }
}
