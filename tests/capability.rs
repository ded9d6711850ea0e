//! Integration coverage for the resource capability oracle: warnings should be stable, and a
//! handle's `unified_capable` flag should down-rank v2-only resources.

use cgroup_abstraction::{BackendVersion, CapabilityOracle, ControllerMap, HostInfo, Layout, Resource};

#[test]
fn warnings_are_empty_on_a_fully_populated_unified_host() {
    let mut controllers = ControllerMap::default();
    for name in [
        "memory", "cpu", "cpuacct", "cpuset", "pids", "io", "blkio", "hugetlb", "freezer", "devices", "net_prio",
    ] {
        controllers.insert(name, BackendVersion::V2);
    }
    // Swap accounting is a separate feature sub-knob from the "memory" controller itself; a
    // synthetic host claiming full support has to carry it explicitly, the way real discovery
    // would after probing `memory.swap.max`/`memory.swap.current`.
    controllers.insert("memory.swap.max", BackendVersion::V2);
    controllers.insert("memory.swap.current", BackendVersion::V2);
    let host = HostInfo::synthetic(controllers, Layout::Unified, false);
    assert!(CapabilityOracle::warnings(&host).is_empty());
}

#[test]
fn warnings_flag_memory_swap_missing_when_its_feature_subkey_was_never_probed() {
    let mut controllers = ControllerMap::default();
    // "memory" is mounted as v1, but this host's kernel has no swap accounting compiled in, so
    // discovery never set the "memory.memsw.limit_in_bytes" subkey.
    controllers.insert("memory", BackendVersion::V1);
    let host = HostInfo::synthetic(controllers, Layout::Legacy, false);

    let warnings = CapabilityOracle::warnings(&host);
    assert!(warnings.iter().any(|w| w.type_code == "missing-memory-swap"));
    assert!(!warnings.iter().any(|w| w.type_code == "missing-memory"));
}

#[test]
fn warnings_report_every_controller_missing_on_a_bare_host() {
    let host = HostInfo::synthetic(ControllerMap::default(), Layout::Disabled, false);
    let warnings = CapabilityOracle::warnings(&host);
    assert_eq!(warnings.len(), Resource::ALL.len());
}

#[test]
fn supports_downgrades_v2_only_resources_for_non_unified_capable_handles() {
    let mut controllers = ControllerMap::default();
    controllers.insert("pids", BackendVersion::V2);
    let host = HostInfo::synthetic(controllers, Layout::Unified, false);

    assert!(CapabilityOracle::supports(Resource::Pids, &host, true));
    assert!(!CapabilityOracle::supports(Resource::Pids, &host, false));
}
