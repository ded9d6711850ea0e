//! Exercises `HostInfo::discover_at` against scratch trees written to a temp directory, so the
//! walk over `/proc/self/cgroup` and `cgroup.controllers` is covered without depending on the
//! host this test suite happens to run on.

use std::fs;
use std::path::PathBuf;

use cgroup_abstraction::{BackendVersion, HostInfo, Layout};

fn scratch_dir(name: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("cgroup-abstraction-test-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn discover_at_classifies_legacy_layout() {
    let dir = scratch_dir("legacy");
    let proc_cgroup = dir.join("proc_self_cgroup");
    fs::write(&proc_cgroup, "5:memory:/\n4:cpu,cpuacct:/\n3:pids:/\n").unwrap();

    let cgroup_root = dir.join("sys_fs_cgroup");
    fs::create_dir_all(&cgroup_root).unwrap();

    let host = HostInfo::discover_at(&proc_cgroup, &cgroup_root);
    assert_eq!(host.layout(), Layout::Legacy);
    assert_eq!(host.backend_for("memory"), BackendVersion::V1);
    assert_eq!(host.backend_for("cpuacct"), BackendVersion::V1);
    assert_eq!(host.backend_for("pids"), BackendVersion::V1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn discover_at_classifies_unified_layout() {
    let dir = scratch_dir("unified");
    let proc_cgroup = dir.join("proc_self_cgroup");
    fs::write(&proc_cgroup, "0::/user.slice/foo\n").unwrap();

    let cgroup_root = dir.join("sys_fs_cgroup");
    let leaf = cgroup_root.join("user.slice/foo");
    fs::create_dir_all(&leaf).unwrap();
    fs::write(leaf.join("cgroup.controllers"), "memory cpu pids io\n").unwrap();

    let host = HostInfo::discover_at(&proc_cgroup, &cgroup_root);
    assert_eq!(host.layout(), Layout::Unified);
    assert_eq!(host.backend_for("memory"), BackendVersion::V2);
    assert_eq!(host.backend_for("blkio"), BackendVersion::V2); // aliased from io

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn discover_at_classifies_hybrid_layout() {
    let dir = scratch_dir("hybrid");
    let proc_cgroup = dir.join("proc_self_cgroup");
    fs::write(&proc_cgroup, "5:memory:/\n0::/user.slice/foo\n").unwrap();

    let cgroup_root = dir.join("sys_fs_cgroup");
    let leaf = cgroup_root.join("unified/user.slice/foo");
    fs::create_dir_all(&leaf).unwrap();
    fs::write(leaf.join("cgroup.controllers"), "pids\n").unwrap();

    let host = HostInfo::discover_at(&proc_cgroup, &cgroup_root);
    assert_eq!(host.layout(), Layout::Hybrid);
    assert_eq!(host.backend_for("memory"), BackendVersion::V1);
    assert_eq!(host.backend_for("pids"), BackendVersion::V2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn discover_at_probes_v1_feature_subkeys_under_their_controller_prefixed_filename() {
    let dir = scratch_dir("subkeys");
    let proc_cgroup = dir.join("proc_self_cgroup");
    fs::write(&proc_cgroup, "5:memory:/\n4:blkio:/\n").unwrap();

    let cgroup_root = dir.join("sys_fs_cgroup");
    let blkio_dir = cgroup_root.join("blkio");
    let memory_dir = cgroup_root.join("memory");
    fs::create_dir_all(&blkio_dir).unwrap();
    fs::create_dir_all(&memory_dir).unwrap();
    // The real kernel file keeps the controller prefix in its name; a probe that strips it
    // (looking for "blkio/weight" instead of "blkio/blkio.weight") would never find this.
    fs::write(blkio_dir.join("blkio.weight"), "500\n").unwrap();
    fs::write(memory_dir.join("memory.swappiness"), "60\n").unwrap();

    let host = HostInfo::discover_at(&proc_cgroup, &cgroup_root);
    assert_eq!(host.controllers().get("blkio.weight"), BackendVersion::V1);
    assert_eq!(host.controllers().get("memory.swappiness"), BackendVersion::V1);
    // memory.max_usage_in_bytes was never created, so the probe must not claim it exists.
    assert_eq!(host.controllers().get("memory.max_usage_in_bytes"), BackendVersion::Unavailable);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn discover_at_downgrades_to_disabled_when_proc_cgroup_is_missing() {
    let dir = scratch_dir("disabled");
    let proc_cgroup = dir.join("does-not-exist");
    let cgroup_root = dir.join("sys_fs_cgroup");

    let host = HostInfo::discover_at(&proc_cgroup, &cgroup_root);
    assert_eq!(host.layout(), Layout::Disabled);

    let _ = fs::remove_dir_all(&dir);
}
