//! The main API. Every method here resolves a [`crate::resource::Resource`] against a
//! [`crate::discovery::HostInfo`], dispatches on the resulting [`BackendVersion`], and translates
//! to that backend's key names, value encoding, and unit.

use std::collections::HashMap;

use crate::backend::{Backend, FsBackend};
use crate::discovery::{BackendVersion, HostInfo};
use crate::error::{Error, ErrorKind, Result};
use crate::limits::Limit;
use crate::parsers::{self, CpuAllowance, IOStats, MemoryStat};
use crate::resource::Resource;

/// CPU time accounted to a cgroup, normalized to nanoseconds regardless of source unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CPUStats {
    pub user_nanos: u64,
    pub system_nanos: u64,
}

/// A handle to one instance's placement in the cgroup hierarchy.
///
/// Borrows the process-wide [`HostInfo`] rather than owning a copy — every handle in a process
/// shares the same read-only, discover-once table instead of re-walking `/proc/self/cgroup`.
#[derive(Debug)]
pub struct CGroupHandle<'h> {
    host: &'h HostInfo,
    backend: Box<dyn Backend>,
    unified_capable: bool,
}

impl<'h> CGroupHandle<'h> {
    /// Builds a handle around an already-constructed backend. The usual entry points are
    /// [`Self::for_pid`] and [`Self::for_self`]; this constructor exists so tests can hand in a
    /// [`crate::backend::FakeBackend`].
    pub fn new(host: &'h HostInfo, backend: Box<dyn Backend>, unified_capable: bool) -> Self {
        Self {
            host,
            backend,
            unified_capable,
        }
    }

    /// Builds a handle for the cgroup that `pid` currently occupies, reading its placement from
    /// `/proc/<pid>/cgroup`.
    pub fn for_pid(pid: i32, host: &'h HostInfo, unified_capable: bool) -> Result<Self> {
        let backend = FsBackend::for_pid(pid, host)?;
        Ok(Self::new(host, Box::new(backend), unified_capable))
    }

    /// Builds a handle for the calling process's own cgroup.
    pub fn for_self(host: &'h HostInfo, unified_capable: bool) -> Result<Self> {
        let backend = FsBackend::for_self(host)?;
        Ok(Self::new(host, Box::new(backend), unified_capable))
    }

    fn resolve(&self, resource: Resource) -> Result<(&'static str, BackendVersion)> {
        match resource.resolve(self.host) {
            Some((name, BackendVersion::V2)) if !self.unified_capable => {
                let _ = name;
                Err(Error::new(ErrorKind::ControllerMissing))
            }
            Some(pair) => Ok(pair),
            None => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    fn get(&self, resource: Resource, key: &str) -> Result<String> {
        let (name, version) = self.resolve(resource)?;
        self.backend.get(version, name, key)
    }

    fn set(&self, resource: Resource, key: &str, value: &str) -> Result<()> {
        let (name, version) = self.resolve(resource)?;
        self.backend.set(version, name, key, value)
    }

    fn get_limit(&self, resource: Resource, key: &str) -> Result<i64> {
        let raw = self.get(resource, key)?;
        match Limit::parse(&raw) {
            Some(Limit::Unlimited) => Ok(-1),
            Some(Limit::Bytes(n)) => Ok(n as i64),
            None => Err(Error::parse(raw)),
        }
    }

    fn set_limit(&self, resource: Resource, key: &str, value: i64, is_v2: bool) -> Result<()> {
        let limit = Limit::from_sentinel(value);
        let encoded = if is_v2 { limit.to_v2_string() } else { limit.to_v1_string() };
        self.set(resource, key, &encoded)
    }

    fn dispatch_set_limit(&self, resource: Resource, v1_key: &str, v2_key: &str, value: i64) -> Result<()> {
        let (_, version) = self.resolve(resource)?;
        match version {
            BackendVersion::V1 => self.set_limit(resource, v1_key, value, false),
            BackendVersion::V2 => self.set_limit(resource, v2_key, value, true),
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    fn dispatch_get_limit(&self, resource: Resource, v1_key: &str, v2_key: &str) -> Result<i64> {
        let (_, version) = self.resolve(resource)?;
        match version {
            BackendVersion::V1 => self.get_limit(resource, v1_key),
            BackendVersion::V2 => self.get_limit(resource, v2_key),
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    // -- pids -----------------------------------------------------------------------------

    pub fn set_max_processes(&self, n: i64) -> Result<()> {
        self.dispatch_set_limit(Resource::Pids, "pids.max", "pids.max", n)
    }

    // -- memory -----------------------------------------------------------------------------

    pub fn get_memory_soft_limit(&self) -> Result<i64> {
        self.dispatch_get_limit(Resource::Memory, "memory.soft_limit_in_bytes", "memory.high")
    }

    pub fn set_memory_soft_limit(&self, n: i64) -> Result<()> {
        self.dispatch_set_limit(Resource::Memory, "memory.soft_limit_in_bytes", "memory.high", n)
    }

    pub fn get_memory_limit(&self) -> Result<i64> {
        self.dispatch_get_limit(Resource::Memory, "memory.limit_in_bytes", "memory.max")
    }

    pub fn set_memory_limit(&self, n: i64) -> Result<()> {
        self.dispatch_set_limit(Resource::Memory, "memory.limit_in_bytes", "memory.max", n)
    }

    pub fn get_memory_usage(&self) -> Result<u64> {
        let (_, version) = self.resolve(Resource::Memory)?;
        let key = match version {
            BackendVersion::V1 => "memory.usage_in_bytes",
            BackendVersion::V2 => "memory.current",
            BackendVersion::Unavailable => return Err(Error::new(ErrorKind::ControllerMissing)),
        };
        self.get(Resource::Memory, key)?.parse().map_err(|_| Error::parse(key))
    }

    /// v1's swap limit is combined memory+swap (`memsw.limit_in_bytes`); this method takes and
    /// returns the swap-only delta and performs the addition/subtraction internally.
    pub fn set_memory_swap_limit(&self, n: i64) -> Result<()> {
        let (_, version) = self.resolve(Resource::MemorySwap)?;
        match version {
            BackendVersion::V1 => {
                if n == -1 {
                    return self.set(Resource::MemorySwap, "memory.memsw.limit_in_bytes", "-1");
                }
                let mem_limit = self.get_memory_limit()?;
                if mem_limit < 0 {
                    return Err(Error::invalid_argument(
                        "cannot compute a combined memsw limit while memory.limit_in_bytes is unlimited",
                    ));
                }
                let combined = (mem_limit as u64)
                    .checked_add(n as u64)
                    .ok_or_else(|| Error::invalid_argument("memory + swap limit overflows u64"))?;
                self.set(Resource::MemorySwap, "memory.memsw.limit_in_bytes", &combined.to_string())
            }
            BackendVersion::V2 => self.set_limit(Resource::MemorySwap, "memory.swap.max", n, true),
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn get_memory_swap_limit(&self) -> Result<i64> {
        let (_, version) = self.resolve(Resource::MemorySwap)?;
        match version {
            BackendVersion::V1 => {
                let combined = self.get(Resource::MemorySwap, "memory.memsw.limit_in_bytes")?;
                let combined = Limit::parse(&combined).ok_or_else(|| Error::parse(&combined))?;
                let mem_limit = self.get_memory_limit()?;
                match combined {
                    Limit::Unlimited => Ok(-1),
                    Limit::Bytes(n) => Ok(n.saturating_sub(mem_limit.max(0) as u64) as i64),
                }
            }
            BackendVersion::V2 => {
                let raw = self.get(Resource::MemorySwap, "memory.swap.max")?;
                match Limit::parse(&raw) {
                    Some(Limit::Unlimited) => Ok(self.host.swap_total().map(|n| n as i64).unwrap_or(-1)),
                    Some(Limit::Bytes(n)) => Ok(n as i64),
                    None => Err(Error::parse(raw)),
                }
            }
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn get_memory_swap_usage(&self) -> Result<u64> {
        let (_, version) = self.resolve(Resource::MemorySwapUsage)?;
        match version {
            BackendVersion::V1 => {
                let combined: u64 = self.get(Resource::MemorySwapUsage, "memory.memsw.usage_in_bytes")?.parse().map_err(|_| Error::parse("memory.memsw.usage_in_bytes"))?;
                let usage = self.get_memory_usage()?;
                Ok(combined.saturating_sub(usage))
            }
            BackendVersion::V2 => self
                .get(Resource::MemorySwapUsage, "memory.swap.current")?
                .parse()
                .map_err(|_| Error::parse("memory.swap.current")),
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn set_memory_swappiness(&self, n: u64) -> Result<()> {
        let (_, version) = self.resolve(Resource::MemorySwappiness)?;
        match version {
            BackendVersion::V1 => self.set(Resource::MemorySwappiness, "memory.swappiness", &n.to_string()),
            BackendVersion::V2 | BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn get_memory_max_usage(&self) -> Result<u64> {
        let (_, version) = self.resolve(Resource::MemoryMaxUsage)?;
        match version {
            BackendVersion::V1 => self
                .get(Resource::MemoryMaxUsage, "memory.max_usage_in_bytes")?
                .parse()
                .map_err(|_| Error::parse("memory.max_usage_in_bytes")),
            BackendVersion::V2 | BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn get_memory_swap_max_usage(&self) -> Result<u64> {
        let (_, version) = self.resolve(Resource::MemorySwapMaxUsage)?;
        match version {
            BackendVersion::V1 => self
                .get(Resource::MemorySwapMaxUsage, "memory.memsw.max_usage_in_bytes")?
                .parse()
                .map_err(|_| Error::parse("memory.memsw.max_usage_in_bytes")),
            BackendVersion::V2 | BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn get_memory_stats(&self) -> Result<MemoryStat> {
        let (_, version) = self.resolve(Resource::Memory)?;
        let raw = self.get(Resource::Memory, "memory.stat")?;
        Ok(parsers::parse_memory_stat(&raw, version == BackendVersion::V2))
    }

    pub fn get_oom_kills(&self) -> Result<u64> {
        let (_, version) = self.resolve(Resource::Memory)?;
        match version {
            BackendVersion::V1 => {
                let raw = self.get(Resource::Memory, "memory.oom_control")?;
                raw.lines()
                    .find_map(|line| line.strip_prefix("oom_kill "))
                    .ok_or_else(|| Error::parse("memory.oom_control"))?
                    .trim()
                    .parse()
                    .map_err(|_| Error::parse("memory.oom_control"))
            }
            BackendVersion::V2 => {
                let raw = self.get(Resource::Memory, "memory.events")?;
                raw.lines()
                    .find_map(|line| {
                        let mut parts = line.split_whitespace();
                        match (parts.next(), parts.next()) {
                            (Some("oom_kill"), Some(v)) => Some(v.to_string()),
                            _ => None,
                        }
                    })
                    .ok_or_else(|| Error::parse("memory.events"))?
                    .parse()
                    .map_err(|_| Error::parse("memory.events"))
            }
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    // -- cpu / cpuacct ------------------------------------------------------------------------

    /// Returns CPU usage in nanoseconds, converting v2's microsecond counter at read time.
    pub fn get_cpuacct_usage(&self) -> Result<u64> {
        let (_, version) = self.resolve(Resource::CpuAcct)?;
        match version {
            BackendVersion::V1 => self
                .get(Resource::CpuAcct, "cpuacct.usage")?
                .parse()
                .map_err(|_| Error::parse("cpuacct.usage")),
            BackendVersion::V2 => {
                let raw = self.get(Resource::CpuAcct, "cpu.stat")?;
                let usec = cpu_stat_field(&raw, "usage_usec").ok_or_else(|| Error::parse("cpu.stat"))?;
                Ok(usec * 1000)
            }
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    /// Per-CPU breakdown of user/system time. On v2, which has no per-CPU split, the whole
    /// cgroup's user/system time is reported as a single entry keyed by CPU id 0.
    pub fn get_cpuacct_usage_all(&self) -> Result<HashMap<u32, CPUStats>> {
        let (_, version) = self.resolve(Resource::CpuAcct)?;
        match version {
            BackendVersion::V1 => {
                let raw = self.get(Resource::CpuAcct, "cpuacct.usage_all")?;
                parse_usage_all_v1(&raw)
            }
            BackendVersion::V2 => {
                let raw = self.get(Resource::CpuAcct, "cpu.stat")?;
                let user = cpu_stat_field(&raw, "user_usec").unwrap_or(0) * 1000;
                let system = cpu_stat_field(&raw, "system_usec").unwrap_or(0) * 1000;
                let mut map = HashMap::new();
                map.insert(
                    0,
                    CPUStats {
                        user_nanos: user,
                        system_nanos: system,
                    },
                );
                Ok(map)
            }
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn set_cpu_share(&self, shares: u64) -> Result<()> {
        let (_, version) = self.resolve(Resource::Cpu)?;
        match version {
            BackendVersion::V1 => self.set(Resource::Cpu, "cpu.shares", &shares.to_string()),
            BackendVersion::V2 => self.set(Resource::Cpu, "cpu.weight", &shares.to_string()),
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    /// Applies a parsed [`CpuAllowance`] as a share plus an optional quota ceiling. The v1/v2
    /// distinction is already handled by [`Self::set_cpu_share`] and [`Self::set_cpu_cfs_limit`].
    pub fn apply_cpu_allowance(&self, allowance: CpuAllowance) -> Result<()> {
        self.set_cpu_share(allowance.shares)?;
        if let Some((quota, period)) = allowance.quota {
            self.set_cpu_cfs_limit(period, quota as i64)?;
        }
        Ok(())
    }

    /// Sets the CFS quota/period pair, in microseconds. `-1` for either means "no ceiling".
    ///
    /// The v1 encoding is two independent writes (`cpu.cfs_quota_us`, then `cpu.cfs_period_us`),
    /// which is not atomic: if the first write succeeds and the second fails, the group is left
    /// with the new quota and the old period. Callers that need atomicity must reassert both on
    /// retry.
    pub fn set_cpu_cfs_limit(&self, period_us: u64, quota_us: i64) -> Result<()> {
        let (_, version) = self.resolve(Resource::Cpu)?;
        match version {
            BackendVersion::V1 => {
                self.set(Resource::Cpu, "cpu.cfs_quota_us", &quota_us.to_string())?;
                self.set(Resource::Cpu, "cpu.cfs_period_us", &period_us.to_string())
            }
            BackendVersion::V2 => {
                let encoded = if quota_us == -1 {
                    "max".to_string()
                } else {
                    quota_us.to_string()
                };
                self.set(Resource::Cpu, "cpu.max", &format!("{} {}", encoded, period_us))
            }
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    // -- cpuset -----------------------------------------------------------------------------

    pub fn get_cpuset(&self) -> Result<Vec<u32>> {
        let raw = self.get(Resource::CpuSet, "cpuset.cpus")?;
        parsers::parse_cpuset(&raw)
    }

    pub fn set_cpuset(&self, ids: &[u32]) -> Result<()> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.set(Resource::CpuSet, "cpuset.cpus", &parsers::format_cpuset(&sorted))
    }

    pub fn get_effective_cpuset(&self) -> Result<Vec<u32>> {
        let (_, version) = self.resolve(Resource::CpuSet)?;
        let key = match version {
            BackendVersion::V1 => "cpuset.effective_cpus",
            BackendVersion::V2 => "cpuset.cpus.effective",
            BackendVersion::Unavailable => return Err(Error::new(ErrorKind::ControllerMissing)),
        };
        let raw = self.get(Resource::CpuSet, key)?;
        parsers::parse_cpuset(&raw)
    }

    // -- blkio / io ---------------------------------------------------------------------------

    pub fn set_blkio_weight(&self, weight: u64) -> Result<()> {
        let (_, version) = self.resolve(Resource::BlkioWeight)?;
        match version {
            BackendVersion::V1 => self.set(Resource::BlkioWeight, "blkio.weight", &weight.to_string()),
            BackendVersion::V2 => self.set(Resource::BlkioWeight, "io.weight", &weight.to_string()),
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    /// Sets a per-device I/O throttle. `device` is a `"<major>:<minor>"` string, `op` is
    /// `"read"` or `"write"`, `unit` is `"iops"` or `"bps"`.
    pub fn set_blkio_limit(&self, device: &str, op: &str, unit: &str, n: u64) -> Result<()> {
        if op != "read" && op != "write" {
            return Err(Error::invalid_argument(format!("unknown blkio op: {}", op)));
        }
        if unit != "iops" && unit != "bps" {
            return Err(Error::invalid_argument(format!("unknown blkio unit: {}", unit)));
        }

        let (_, version) = self.resolve(Resource::Blkio)?;
        match version {
            BackendVersion::V1 => {
                let key = format!("blkio.throttle.{}_{}_device", op, unit);
                self.set(Resource::Blkio, &key, &format!("{} {}", device, n))
            }
            BackendVersion::V2 => {
                let side = match op {
                    "read" => 'r',
                    _ => 'w',
                };
                let field = match unit {
                    "iops" => "iops",
                    _ => "bps",
                };
                self.set(Resource::Blkio, "io.max", &format!("{} {}{}={}", device, side, field, n))
            }
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    pub fn get_io_stats(&self, partitions: &str) -> Result<HashMap<String, IOStats>> {
        let (_, version) = self.resolve(Resource::Blkio)?;
        let devices = parsers::parse_proc_partitions(partitions);
        match version {
            BackendVersion::V1 => {
                let service_bytes = self.get(Resource::Blkio, "blkio.throttle.io_service_bytes_recursive")?;
                let serviced = self.get(Resource::Blkio, "blkio.throttle.io_serviced_recursive")?;
                Ok(parse_blkio_recursive_v1(&service_bytes, &serviced, &devices))
            }
            BackendVersion::V2 => {
                let raw = self.get(Resource::Blkio, "io.stat")?;
                let mut out = HashMap::new();
                for (dev_id, stats) in parsers::parse_io_stat_v2(&raw) {
                    if dev_id.split_once(':').and_then(|(maj, _)| maj.parse::<u32>().ok()) == Some(7) {
                        continue;
                    }
                    let name = resolve_device_name(&dev_id, &devices);
                    out.insert(name, stats);
                }
                Ok(out)
            }
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }

    // -- hugetlb -----------------------------------------------------------------------------

    pub fn set_hugepages_limit(&self, page_type: &str, n: i64) -> Result<()> {
        let (_, version) = self.resolve(Resource::Hugetlb)?;
        match version {
            BackendVersion::V1 => self.set_limit(
                Resource::Hugetlb,
                &format!("hugetlb.{}.limit_in_bytes", page_type),
                n,
                false,
            ),
            BackendVersion::V2 => self.set_limit(Resource::Hugetlb, &format!("hugetlb.{}.max", page_type), n, true),
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
        }
    }
}

fn cpu_stat_field(raw: &str, field: &str) -> Option<u64> {
    raw.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(k), Some(v)) if k == field => v.parse().ok(),
            _ => None,
        }
    })
}

fn parse_usage_all_v1(raw: &str) -> Result<HashMap<u32, CPUStats>> {
    // `cpuacct.usage_all` header: "cpu user system", one data row per CPU id.
    let mut out = HashMap::new();
    for line in raw.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let cpu_id: u32 = match fields.next().and_then(|s| s.parse().ok()) {
            Some(id) => id,
            None => continue,
        };
        let user: u64 = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let system: u64 = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        out.insert(
            cpu_id,
            CPUStats {
                user_nanos: user,
                system_nanos: system,
            },
        );
    }
    if out.is_empty() {
        return Err(Error::parse(raw));
    }
    Ok(out)
}

fn resolve_device_name(dev_id: &str, devices: &HashMap<(u32, u32), String>) -> String {
    dev_id
        .split_once(':')
        .and_then(|(maj, min)| {
            let maj: u32 = maj.parse().ok()?;
            let min: u32 = min.parse().ok()?;
            devices.get(&(maj, min)).cloned()
        })
        .unwrap_or_else(|| dev_id.to_string())
}

fn parse_blkio_recursive_v1(
    service_bytes: &str,
    serviced: &str,
    devices: &HashMap<(u32, u32), String>,
) -> HashMap<String, IOStats> {
    let mut out: HashMap<String, IOStats> = HashMap::new();

    let mut apply = |raw: &str, assign: &dyn Fn(&mut IOStats, &str, u64)| {
        for line in raw.lines() {
            let mut fields = line.split_whitespace();
            let dev_id = match fields.next() {
                Some(f) if f.contains(':') => f,
                _ => continue,
            };
            let major: u32 = match dev_id.split_once(':').and_then(|(m, _)| m.parse().ok()) {
                Some(m) => m,
                None => continue,
            };
            if major == 7 {
                continue;
            }
            let op = fields.next().unwrap_or("");
            let value: u64 = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let name = resolve_device_name(dev_id, devices);
            let entry = out.entry(name).or_default();
            assign(entry, op, value);
        }
    };

    apply(service_bytes, &|entry, op, value| match op {
        "Read" => entry.read_bytes = value,
        "Write" => entry.written_bytes = value,
        _ => {}
    });
    apply(serviced, &|entry, op, value| match op {
        "Read" => entry.reads_completed = value,
        "Write" => entry.writes_completed = value,
        _ => {}
    });

    out
}
