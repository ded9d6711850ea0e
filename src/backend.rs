//! Backend I/O: the seam between typed cgroup operations and actual bytes on disk.
//!
//! Keeping this behind a trait is what makes every dispatch branch in [`crate::cgroup`]
//! unit-testable without root or a live kernel — [`FakeBackend`] below is the in-memory stand-in
//! used by this crate's own test suite, and nothing stops a downstream crate from writing its
//! own.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::discovery::{BackendVersion, HostInfo, Layout};
use crate::error::{Error, ErrorKind, Result};

/// Reads and writes a single `(version, controller, key)` triple.
///
/// `version` is part of the contract (not just `controller`/`key`) because a hybrid host can
/// expose the same controller name from both hierarchies at once — the caller has already
/// resolved which one to hit via [`crate::discovery::HostInfo`] before calling in here.
pub trait Backend: std::fmt::Debug {
    fn get(&self, version: BackendVersion, controller: &str, key: &str) -> Result<String>;
    fn set(&self, version: BackendVersion, controller: &str, key: &str, value: &str) -> Result<()>;
}

/// Walks the sysfs-mounted cgroup tree.
///
/// Holds one path per `(version, controller)` pair, built once at construction time from the
/// instance's placement in each hierarchy (as read from its own `/proc/<pid>/cgroup`). When the
/// host layout is fully unified, `unified_path` supersedes every per-controller v1 path — there
/// is only one tree to walk.
#[derive(Debug, Clone)]
pub struct FsBackend {
    v1_paths: HashMap<String, PathBuf>,
    v2_path: Option<PathBuf>,
    fully_unified: bool,
}

impl FsBackend {
    pub fn new(v1_paths: HashMap<String, PathBuf>, v2_path: Option<PathBuf>, fully_unified: bool) -> Self {
        Self {
            v1_paths,
            v2_path,
            fully_unified,
        }
    }

    /// Builds the per-controller path map for the cgroup `pid` currently occupies, by reading
    /// `/proc/<pid>/cgroup` the same way [`crate::discovery::HostInfo::discover_at`] reads
    /// `/proc/self/cgroup`, except this walk records *paths*, not versions.
    pub fn for_pid(pid: i32, host: &HostInfo) -> Result<Self> {
        let proc_path = PathBuf::from(format!("/proc/{}/cgroup", pid));
        let contents = fs::read_to_string(&proc_path).map_err(|e| Error::with_cause(ErrorKind::ReadFailed, e))?;
        Self::from_proc_cgroup_contents(&contents, host)
    }

    /// Same as [`Self::for_pid`] but for the calling process.
    pub fn for_self(host: &HostInfo) -> Result<Self> {
        Self::for_pid(std::process::id() as i32, host)
    }

    fn from_proc_cgroup_contents(contents: &str, host: &HostInfo) -> Result<Self> {
        let root = host.cgroup_root();
        let mut v1_paths = HashMap::new();
        let mut v2_path = None;

        for line in contents.lines() {
            let mut fields = line.splitn(3, ':');
            let _index = fields.next();
            let names = match fields.next() {
                Some(n) => n,
                None => continue,
            };
            let path = fields.next().unwrap_or("").trim_start_matches('/');

            if !names.is_empty() {
                for name in names.split(',') {
                    v1_paths.insert(name.to_string(), root.join(name).join(path));
                }
                continue;
            }

            let unified_dir = if host.layout() == Layout::Hybrid {
                root.join("unified")
            } else {
                root.to_path_buf()
            };
            v2_path = Some(unified_dir.join(path));
        }

        if let Some(io_path) = v1_paths.get("io").cloned() {
            v1_paths.entry("blkio".to_string()).or_insert(io_path);
        }
        if let Some(blkio_path) = v1_paths.get("blkio").cloned() {
            v1_paths.entry("io".to_string()).or_insert(blkio_path);
        }

        Ok(Self {
            v1_paths,
            v2_path,
            fully_unified: host.layout() == Layout::Unified,
        })
    }

    fn resolve(&self, version: BackendVersion, controller: &str) -> Result<PathBuf> {
        match version {
            BackendVersion::Unavailable => Err(Error::new(ErrorKind::ControllerMissing)),
            BackendVersion::V1 => {
                if self.fully_unified {
                    // A fully unified host has no v1 mounts at all; asking for one is a caller
                    // bug in the resource table, not a missing controller.
                    return Err(Error::new(ErrorKind::UnknownVersion));
                }
                self.v1_paths
                    .get(controller)
                    .cloned()
                    .ok_or_else(|| Error::new(ErrorKind::ControllerMissing))
            }
            BackendVersion::V2 => self
                .v2_path
                .clone()
                .ok_or_else(|| Error::new(ErrorKind::ControllerMissing)),
        }
    }
}

impl Backend for FsBackend {
    fn get(&self, version: BackendVersion, controller: &str, key: &str) -> Result<String> {
        let mut path = self.resolve(version, controller)?;
        path.push(key);
        let mut contents = String::new();
        fs::File::open(&path)
            .map_err(|e| Error::with_cause(ErrorKind::ReadFailed, e))?
            .read_to_string(&mut contents)
            .map_err(|e| Error::with_cause(ErrorKind::ReadFailed, e))?;
        Ok(contents.trim().to_string())
    }

    fn set(&self, version: BackendVersion, controller: &str, key: &str, value: &str) -> Result<()> {
        let mut path = self.resolve(version, controller)?;
        path.push(key);
        let mut file = open_for_write(&path)?;
        file.write_all(value.as_bytes())
            .map_err(|e| Error::with_cause(ErrorKind::WriteFailed, e))
    }
}

fn open_for_write(path: &Path) -> Result<fs::File> {
    if path.exists() {
        OpenOptions::new()
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::with_cause(ErrorKind::WriteFailed, e))
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| Error::with_cause(ErrorKind::WriteFailed, e))
    }
}

/// An in-memory [`Backend`] keyed by `(version, controller, key)`, for unit tests.
#[derive(Debug, Default)]
pub struct FakeBackend {
    files: RefCell<HashMap<(BackendVersionKey, String, String), String>>,
}

// `BackendVersion` isn't `Hash`+`Eq` by derive in a way that's convenient to use as a map key
// alongside strings without importing the discovery module's internals everywhere, so the fake
// backend keys on this small local mirror instead.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
enum BackendVersionKey {
    V1,
    V2,
}

impl From<BackendVersion> for BackendVersionKey {
    fn from(v: BackendVersion) -> Self {
        match v {
            BackendVersion::V1 => BackendVersionKey::V1,
            BackendVersion::V2 => BackendVersionKey::V2,
            BackendVersion::Unavailable => panic!("FakeBackend: Unavailable is not a storable version"),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file as if it had been written by the kernel before the test ran.
    pub fn seed(&self, version: BackendVersion, controller: &str, key: &str, value: impl Into<String>) {
        self.files
            .borrow_mut()
            .insert((version.into(), controller.to_string(), key.to_string()), value.into());
    }

    /// Reads back whatever the last `set()` (or `seed()`) stored, for test assertions.
    pub fn peek(&self, version: BackendVersion, controller: &str, key: &str) -> Option<String> {
        self.files
            .borrow()
            .get(&(version.into(), controller.to_string(), key.to_string()))
            .cloned()
    }
}

impl Backend for FakeBackend {
    fn get(&self, version: BackendVersion, controller: &str, key: &str) -> Result<String> {
        if version == BackendVersion::Unavailable {
            return Err(Error::new(ErrorKind::ControllerMissing));
        }
        self.files
            .borrow()
            .get(&(version.into(), controller.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::ReadFailed))
    }

    fn set(&self, version: BackendVersion, controller: &str, key: &str, value: &str) -> Result<()> {
        if version == BackendVersion::Unavailable {
            return Err(Error::new(ErrorKind::ControllerMissing));
        }
        self.files
            .borrow_mut()
            .insert((version.into(), controller.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}
