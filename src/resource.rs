//! The `Resource` enum and the capability oracle that upper layers consult before trying to
//! enforce a limit.

use crate::discovery::{BackendVersion, HostInfo};

/// A logical resource class. Each variant carries a static, ordered list of controller names it
/// may be implemented by — `Blkio` tries `"blkio"` first and falls back to `"io"`, `CPUAcct`
/// tries `"cpuacct"` then falls back to `"cpu"` (cpu.stat carries usage_usec on v2 hosts that
/// dropped the separate accounting controller), and so on.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Resource {
    Blkio,
    BlkioWeight,
    Cpu,
    CpuAcct,
    CpuSet,
    Devices,
    Freezer,
    Hugetlb,
    Memory,
    MemoryMaxUsage,
    MemorySwap,
    MemorySwapMaxUsage,
    MemorySwapUsage,
    MemorySwappiness,
    NetPrio,
    Pids,
}

impl Resource {
    /// Controller names to try, in order, when resolving this resource against a [`HostInfo`].
    pub fn fallback_controllers(self) -> &'static [&'static str] {
        match self {
            Resource::Blkio => &["blkio", "io"],
            Resource::BlkioWeight => &["blkio", "io"],
            Resource::Cpu => &["cpu"],
            Resource::CpuAcct => &["cpuacct", "cpu"],
            Resource::CpuSet => &["cpuset"],
            Resource::Devices => &["devices"],
            Resource::Freezer => &["freezer"],
            Resource::Hugetlb => &["hugetlb"],
            Resource::Memory => &["memory"],
            Resource::MemoryMaxUsage => &["memory"],
            Resource::MemorySwap => &["memory"],
            Resource::MemorySwapMaxUsage => &["memory"],
            Resource::MemorySwapUsage => &["memory"],
            Resource::MemorySwappiness => &["memory"],
            Resource::NetPrio => &["net_prio"],
            Resource::Pids => &["pids"],
        }
    }

    /// The human-readable name used in [`Warning`] messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Resource::Blkio => "blkio",
            Resource::BlkioWeight => "blkio weight",
            Resource::Cpu => "cpu",
            Resource::CpuAcct => "cpuacct",
            Resource::CpuSet => "cpuset",
            Resource::Devices => "devices",
            Resource::Freezer => "freezer",
            Resource::Hugetlb => "hugetlb",
            Resource::Memory => "memory",
            Resource::MemoryMaxUsage => "memory max usage",
            Resource::MemorySwap => "memory swap",
            Resource::MemorySwapMaxUsage => "memory swap max usage",
            Resource::MemorySwapUsage => "memory swap usage",
            Resource::MemorySwappiness => "memory swappiness",
            Resource::NetPrio => "net_prio",
            Resource::Pids => "pids",
        }
    }

    /// Stable type code used in [`Warning::type_code`] (`"missing-memory"`, ...).
    fn type_code(self) -> &'static str {
        match self {
            Resource::Blkio => "missing-blkio",
            Resource::BlkioWeight => "missing-blkio-weight",
            Resource::Cpu => "missing-cpu",
            Resource::CpuAcct => "missing-cpuacct",
            Resource::CpuSet => "missing-cpuset",
            Resource::Devices => "missing-devices",
            Resource::Freezer => "missing-freezer",
            Resource::Hugetlb => "missing-hugetlb",
            Resource::Memory => "missing-memory",
            Resource::MemoryMaxUsage => "missing-memory-max-usage",
            Resource::MemorySwap => "missing-memory-swap",
            Resource::MemorySwapMaxUsage => "missing-memory-swap-max-usage",
            Resource::MemorySwapUsage => "missing-memory-swap-usage",
            Resource::MemorySwappiness => "missing-memory-swappiness",
            Resource::NetPrio => "missing-net-prio",
            Resource::Pids => "missing-pids",
        }
    }

    /// All resources, in the fixed order [`CapabilityOracle::warnings`] reports them in.
    pub const ALL: &'static [Resource] = &[
        Resource::Memory,
        Resource::MemoryMaxUsage,
        Resource::MemorySwap,
        Resource::MemorySwapMaxUsage,
        Resource::MemorySwapUsage,
        Resource::MemorySwappiness,
        Resource::Cpu,
        Resource::CpuAcct,
        Resource::CpuSet,
        Resource::Pids,
        Resource::Blkio,
        Resource::BlkioWeight,
        Resource::Hugetlb,
        Resource::Freezer,
        Resource::Devices,
        Resource::NetPrio,
    ];

    /// Iterates the fallback list and returns the first controller that resolves to a
    /// non-[`BackendVersion::Unavailable`] backend.
    pub fn resolve(self, host: &HostInfo) -> Option<(&'static str, BackendVersion)> {
        self.fallback_controllers().iter().find_map(|name| {
            let version = host.backend_for(name);
            if version == BackendVersion::Unavailable {
                None
            } else {
                Some((*name, version))
            }
        })
    }

    /// The host-discovery feature sub-knob (see [`crate::discovery`]'s `V1_FEATURE_SUBKEYS`/
    /// `V2_FEATURE_SUBKEYS`) whose presence, beyond the primary controller's, this resource
    /// actually depends on at the given backend version — e.g. a v1 `memory` controller can be
    /// mounted on a kernel built without swap accounting, in which case `memory.memsw.*` never
    /// appears even though `memory.limit_in_bytes` works fine. `None` means the primary
    /// controller's presence is sufficient on its own.
    fn required_subkey(self, version: BackendVersion) -> Option<&'static str> {
        match (self, version) {
            (Resource::BlkioWeight, BackendVersion::V1) => Some("blkio.weight"),
            (Resource::MemorySwappiness, BackendVersion::V1) => Some("memory.swappiness"),
            (Resource::MemoryMaxUsage, BackendVersion::V1) => Some("memory.max_usage_in_bytes"),
            (Resource::MemorySwapMaxUsage, BackendVersion::V1) => Some("memory.memsw.max_usage_in_bytes"),
            (Resource::MemorySwap, BackendVersion::V1) => Some("memory.memsw.limit_in_bytes"),
            (Resource::MemorySwap, BackendVersion::V2) => Some("memory.swap.max"),
            (Resource::MemorySwapUsage, BackendVersion::V1) => Some("memory.memsw.usage_in_bytes"),
            (Resource::MemorySwapUsage, BackendVersion::V2) => Some("memory.swap.current"),
            _ => None,
        }
    }
}

/// One capability gap surfaced to the supervisor at startup.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Warning {
    pub type_code: &'static str,
    pub message: String,
}

/// Answers "can this host do X" and "what can't this host do" queries.
pub struct CapabilityOracle;

impl CapabilityOracle {
    /// True unless the resolved backend is unavailable, it is v2 and `unified_capable` is false
    /// (the instance is not permitted to observe v2 controllers), or the resource depends on a
    /// feature sub-knob (see [`Resource::required_subkey`]) that host discovery never found.
    pub fn supports(resource: Resource, host: &HostInfo, unified_capable: bool) -> bool {
        match resource.resolve(host) {
            None => false,
            Some((_, BackendVersion::V2)) if !unified_capable => false,
            Some((_, version)) => match resource.required_subkey(version) {
                Some(subkey) => host.controllers().get(subkey) != BackendVersion::Unavailable,
                None => true,
            },
        }
    }

    /// A fixed, ordered list of warnings, one per resource this host cannot satisfy under any
    /// visibility (i.e. `supports(resource, host, true) == false`).
    pub fn warnings(host: &HostInfo) -> Vec<Warning> {
        Resource::ALL
            .iter()
            .copied()
            .filter(|r| !Self::supports(*r, host, true))
            .map(|r| Warning {
                type_code: r.type_code(),
                message: format!(
                    "host does not expose the {} controller through either cgroup hierarchy",
                    r.display_name()
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{ControllerMap, Layout};

    fn host_with(pairs: &[(&str, BackendVersion)]) -> HostInfo {
        let mut map = ControllerMap::default();
        for (name, version) in pairs {
            map.insert(*name, *version);
        }
        HostInfo::synthetic(map, Layout::Hybrid, false)
    }

    #[test]
    fn resolve_falls_back_blkio_to_io() {
        let host = host_with(&[("io", BackendVersion::V2)]);
        assert_eq!(Resource::Blkio.resolve(&host), Some(("io", BackendVersion::V2)));
    }

    #[test]
    fn resolve_prefers_first_match() {
        let host = host_with(&[("blkio", BackendVersion::V1), ("io", BackendVersion::V2)]);
        assert_eq!(Resource::Blkio.resolve(&host), Some(("blkio", BackendVersion::V1)));
    }

    #[test]
    fn supports_is_false_when_unresolved() {
        let host = host_with(&[]);
        assert!(!CapabilityOracle::supports(Resource::Pids, &host, true));
    }

    #[test]
    fn supports_downgrades_v2_for_non_unified_capable_handle() {
        let host = host_with(&[("memory", BackendVersion::V2)]);
        assert!(CapabilityOracle::supports(Resource::Memory, &host, true));
        assert!(!CapabilityOracle::supports(Resource::Memory, &host, false));
    }

    #[test]
    fn warnings_lists_every_unsupported_resource_once() {
        let host = host_with(&[("memory", BackendVersion::V1)]);
        let warnings = CapabilityOracle::warnings(&host);
        assert!(warnings.iter().any(|w| w.type_code == "missing-pids"));
        assert!(!warnings.iter().any(|w| w.type_code == "missing-memory"));
    }

    #[test]
    fn supports_requires_the_feature_subkey_not_just_the_primary_controller() {
        // "blkio" is mounted, but the host never probed (or never had) "blkio.weight".
        let host = host_with(&[("blkio", BackendVersion::V1)]);
        assert!(CapabilityOracle::supports(Resource::Blkio, &host, true));
        assert!(!CapabilityOracle::supports(Resource::BlkioWeight, &host, true));

        let host = host_with(&[("blkio", BackendVersion::V1), ("blkio.weight", BackendVersion::V1)]);
        assert!(CapabilityOracle::supports(Resource::BlkioWeight, &host, true));
    }

    #[test]
    fn supports_checks_v1_and_v2_swap_subkeys_independently() {
        let v1_no_swap = host_with(&[("memory", BackendVersion::V1)]);
        assert!(!CapabilityOracle::supports(Resource::MemorySwap, &v1_no_swap, true));

        let v1_with_swap = host_with(&[
            ("memory", BackendVersion::V1),
            ("memory.memsw.limit_in_bytes", BackendVersion::V1),
        ]);
        assert!(CapabilityOracle::supports(Resource::MemorySwap, &v1_with_swap, true));

        let v2_no_swap = host_with(&[("memory", BackendVersion::V2)]);
        assert!(!CapabilityOracle::supports(Resource::MemorySwap, &v2_no_swap, true));

        let v2_with_swap = host_with(&[("memory", BackendVersion::V2), ("memory.swap.max", BackendVersion::V2)]);
        assert!(CapabilityOracle::supports(Resource::MemorySwap, &v2_with_swap, true));
    }
}
