//! Host discovery: the one-shot walk of `/proc/self/cgroup` and the mounted cgroup trees that
//! classifies every controller as v1, v2, or unavailable.
//!
//! [`HostInfo::discover`] is meant to be called exactly once per process (the supervisor keeps
//! the result alive for the lifetime of the process and shares it, by reference, with every
//! [`crate::cgroup::CGroupHandle`] it constructs). The result is immutable: nothing in this
//! crate mutates a `HostInfo` after construction, so reads from multiple threads never contend.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC, TMPFS_MAGIC};

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Which backend, if any, implements a controller on this host.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum BackendVersion {
    /// Neither hierarchy exposes this controller.
    Unavailable,
    /// The controller is mounted under the legacy, per-controller hierarchy.
    V1,
    /// The controller is listed in a `cgroup.controllers` file under the unified hierarchy.
    V2,
}

impl Default for BackendVersion {
    fn default() -> Self {
        BackendVersion::Unavailable
    }
}

/// The overall shape of the host's cgroup mounts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Layout {
    /// No cgroup filesystem is mounted at all.
    Disabled,
    /// Pure cgroup v2: every controller is reached through the unified hierarchy.
    Unified,
    /// Both hierarchies are mounted, with controllers split between them.
    Hybrid,
    /// Pure cgroup v1: every controller is reached through the legacy, per-controller mounts.
    Legacy,
}

impl Layout {
    /// The lowercase tag the supervisor logs and reports (`"disabled"`, `"unified"`, ...).
    pub fn mode(&self) -> &'static str {
        match self {
            Layout::Disabled => "disabled",
            Layout::Unified => "unified",
            Layout::Hybrid => "hybrid",
            Layout::Legacy => "legacy",
        }
    }
}

/// *controller-name → backend-version* mapping built once during discovery.
///
/// Holds both canonical controller names (`memory`, `cpu`, `cpuset`, ...) and feature sub-keys
/// (`blkio.weight`, `memory.swap.max`, ...) whose presence cannot be inferred from the
/// controller list alone.
#[derive(Debug, Clone, Default)]
pub struct ControllerMap {
    entries: HashMap<String, BackendVersion>,
}

impl ControllerMap {
    pub fn insert(&mut self, name: impl Into<String>, version: BackendVersion) {
        self.entries.insert(name.into(), version);
    }

    fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }

    /// Looks up a controller or feature sub-key; defaults to `Unavailable` when absent.
    pub fn get(&self, name: &str) -> BackendVersion {
        *self.entries.get(name).unwrap_or(&BackendVersion::Unavailable)
    }

    pub fn contains_v1(&self, name: &str) -> bool {
        self.get(name) == BackendVersion::V1
    }

    pub fn contains_v2(&self, name: &str) -> bool {
        self.get(name) == BackendVersion::V2
    }
}

/// Immutable, process-wide result of [`HostInfo::discover`].
#[derive(Debug, Clone)]
pub struct HostInfo {
    controllers: ControllerMap,
    layout: Layout,
    namespaces_supported: bool,
    cgroup_root: PathBuf,
    /// `SwapTotal` from `/proc/meminfo`, in bytes. Used as the v2 "unlimited swap" fallback value
    /// (v2 has no combined-limit knob to subtract from, unlike v1's `memsw`).
    swap_total: Option<u64>,
}

impl HostInfo {
    /// Builds a `HostInfo` from already-known facts, bypassing any filesystem access.
    ///
    /// Exists so tests (and callers embedding this crate in an environment where `/proc` is not
    /// the real host's) can construct synthetic topologies without touching `/proc` or
    /// `/sys/fs/cgroup`.
    pub fn synthetic(controllers: ControllerMap, layout: Layout, namespaces_supported: bool) -> Self {
        Self {
            controllers,
            layout,
            namespaces_supported,
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            swap_total: None,
        }
    }

    /// Attaches a known `SwapTotal` value to a synthetic host, for tests that exercise the v2
    /// unlimited-swap fallback.
    pub fn with_swap_total(mut self, bytes: u64) -> Self {
        self.swap_total = Some(bytes);
        self
    }

    pub fn swap_total(&self) -> Option<u64> {
        self.swap_total
    }

    /// Runs host discovery against the real `/proc` and `/sys/fs/cgroup`. Never panics: any
    /// unreadable core file downgrades the result to [`Layout::Disabled`] with a logged error.
    pub fn discover() -> Self {
        Self::discover_at(Path::new("/proc/self/cgroup"), Path::new(DEFAULT_CGROUP_ROOT))
    }

    /// Same as [`Self::discover`] but with the `/proc/self/cgroup` and cgroup-root paths
    /// overridable, so integration-shaped tests can point discovery at a scratch tree.
    pub fn discover_at(proc_self_cgroup: &Path, cgroup_root: &Path) -> Self {
        let mut controllers = ControllerMap::default();

        let lines = match fs::read_to_string(proc_self_cgroup) {
            Ok(contents) => contents,
            Err(e) => {
                log::error!(
                    "cgroup discovery: unable to read {}: {}; treating host as disabled",
                    proc_self_cgroup.display(),
                    e
                );
                return Self {
                    controllers,
                    layout: Layout::Disabled,
                    namespaces_supported: namespaces_supported(),
                    cgroup_root: cgroup_root.to_path_buf(),
                    swap_total: read_swap_total(),
                };
            }
        };

        let mut saw_v2 = false;
        for line in lines.lines() {
            let mut fields = line.splitn(3, ':');
            let _index = fields.next();
            let names = match fields.next() {
                Some(n) => n,
                None => continue,
            };
            let path = fields.next().unwrap_or("");

            if !names.is_empty() {
                for name in names.split(',') {
                    controllers.insert(name.to_string(), BackendVersion::V1);
                }
                continue;
            }

            // v2 entry: the controller list lives in cgroup.controllers under the unified tree.
            saw_v2 = true;
            let unified_dir = cgroup_root.join("unified");
            let candidates = [unified_dir.join(path.trim_start_matches('/')), cgroup_root.join(path.trim_start_matches('/'))];
            let mut read_any = false;
            for candidate in &candidates {
                let controllers_file = candidate.join("cgroup.controllers");
                if let Ok(contents) = fs::read_to_string(&controllers_file) {
                    for name in contents.split_whitespace() {
                        controllers.insert(name.to_string(), BackendVersion::V2);
                    }
                    read_any = true;
                    break;
                }
            }
            if read_any {
                controllers.insert("unified", BackendVersion::V2);
            } else {
                log::warn!("cgroup discovery: v2 entry present but no cgroup.controllers file was readable");
            }
        }

        probe_feature_subkeys(&mut controllers, cgroup_root, saw_v2);

        let mut layout = classify(&controllers);

        if let Layout::Hybrid | Layout::Legacy = layout {
            if root_is_cgroup2(cgroup_root) {
                log::warn!(
                    "cgroup discovery: v1 controllers found on top of a cgroup2 root; downgrading to unified"
                );
                downgrade_v1_to_unavailable(&mut controllers);
                layout = Layout::Unified;
            }
        }

        if layout == Layout::Unified {
            // devices/freezer have no v2 controller file; the kernel implements them via eBPF
            // and built-in logic instead.
            controllers.insert("devices", BackendVersion::V2);
            controllers.insert("freezer", BackendVersion::V2);
        }

        alias_blkio_io(&mut controllers);

        Self {
            controllers,
            layout,
            namespaces_supported: namespaces_supported(),
            cgroup_root: cgroup_root.to_path_buf(),
            swap_total: read_swap_total(),
        }
    }

    pub fn backend_for(&self, controller: &str) -> BackendVersion {
        self.controllers.get(controller)
    }

    pub fn controllers(&self) -> &ControllerMap {
        &self.controllers
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn namespaces_supported(&self) -> bool {
        self.namespaces_supported
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }
}

fn classify(controllers: &ControllerMap) -> Layout {
    let has_v1 = controllers.entries.values().any(|v| *v == BackendVersion::V1);
    let has_v2 = controllers.entries.values().any(|v| *v == BackendVersion::V2);
    match (has_v1, has_v2) {
        (true, true) => Layout::Hybrid,
        (true, false) => Layout::Legacy,
        (false, true) => Layout::Unified,
        (false, false) => Layout::Disabled,
    }
}

fn downgrade_v1_to_unavailable(controllers: &mut ControllerMap) {
    let v1_keys: Vec<String> = controllers
        .entries
        .iter()
        .filter(|(_, v)| **v == BackendVersion::V1)
        .map(|(k, _)| k.clone())
        .collect();
    for key in v1_keys {
        controllers.remove(&key);
    }
}

fn alias_blkio_io(controllers: &mut ControllerMap) {
    let blkio = controllers.get("blkio");
    let io = controllers.get("io");
    if blkio == BackendVersion::Unavailable && io != BackendVersion::Unavailable {
        controllers.insert("blkio", io);
    } else if io == BackendVersion::Unavailable && blkio != BackendVersion::Unavailable {
        controllers.insert("io", blkio);
    }
}

/// Feature sub-knobs whose presence can't be inferred from the controller list alone.
const V1_FEATURE_SUBKEYS: &[(&str, &str)] = &[
    ("blkio.weight", "blkio"),
    ("blkio.bfq.weight", "blkio"),
    ("memory.max_usage_in_bytes", "memory"),
    ("memory.swappiness", "memory"),
    ("memory.memsw.limit_in_bytes", "memory"),
    ("memory.memsw.usage_in_bytes", "memory"),
    ("memory.memsw.max_usage_in_bytes", "memory"),
];

const V2_FEATURE_SUBKEYS: &[(&str, &str)] = &[("memory.swap.max", "memory"), ("memory.swap.current", "memory")];

fn probe_feature_subkeys(controllers: &mut ControllerMap, cgroup_root: &Path, saw_v2: bool) {
    for (key, controller) in V1_FEATURE_SUBKEYS {
        if controllers.get(controller) != BackendVersion::V1 {
            continue;
        }
        let path = cgroup_root.join(controller).join(key);
        if path.exists() {
            controllers.insert(*key, BackendVersion::V1);
        }
    }

    if saw_v2 {
        for (key, controller) in V2_FEATURE_SUBKEYS {
            if controllers.get(controller) != BackendVersion::V2 {
                continue;
            }
            controllers.insert(*key, BackendVersion::V2);
        }
    }
}

fn root_is_cgroup2(cgroup_root: &Path) -> bool {
    match statfs(cgroup_root) {
        Ok(stat) => stat.filesystem_type() == CGROUP2_SUPER_MAGIC,
        Err(_) => false,
    }
}

#[allow(dead_code)]
fn root_is_tmpfs(cgroup_root: &Path) -> bool {
    match statfs(cgroup_root) {
        Ok(stat) => stat.filesystem_type() == TMPFS_MAGIC,
        Err(_) => false,
    }
}

fn namespaces_supported() -> bool {
    Path::new("/proc/self/ns/cgroup").exists()
}

fn read_swap_total() -> Option<u64> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    crate::parsers::parse_swap_total(&contents)
}
