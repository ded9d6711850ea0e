//! A version-independent abstraction over the Linux cgroup v1/v2/hybrid hierarchy.
//!
//! A process-wide [`HostInfo`] is discovered once and shared by reference with every
//! [`CGroupHandle`] the caller constructs; each handle resolves a [`Resource`] against that
//! table and dispatches to the right controller, key, and value encoding for the host's layout.

pub mod backend;
pub mod cgroup;
pub mod discovery;
pub mod error;
pub mod limits;
pub mod parsers;
pub mod rebalance;
pub mod resource;

pub use backend::{Backend, FakeBackend, FsBackend};
pub use cgroup::{CGroupHandle, CPUStats};
pub use discovery::{BackendVersion, ControllerMap, HostInfo, Layout, DEFAULT_CGROUP_ROOT};
pub use error::{Error, ErrorKind, Result};
pub use limits::Limit;
pub use parsers::{CpuAllowance, IOStats, MemoryStat};
pub use rebalance::{channel as rebalance_channel, DeviceRebalanceEvent, RebalanceReceiver, RebalanceSender};
pub use resource::{CapabilityOracle, Resource, Warning};
