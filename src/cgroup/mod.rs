//! Attribution of cgroup v2 resource usage to services.
//!
//! The hierarchy is walked on every poll. Each group is classified (see [`classifier`]) to find
//! the service it belongs to and the way it has to be accounted, and the groups that represent a
//! service are handed to the resource collectors.
//!
//! # Key Components
//!
//! - [`Group`] and [`Lookup`]: a racy handle onto one node of the hierarchy.
//! - [`Classifier`]: maps group names to services.
//! - [`RaceController`]: tells transient creation/deletion races from real failures.
//! - [`collector`]: CPU, memory and IO collectors.
//! - [`Monitor`]: the walk itself.
//!
//! # Consumed Files
//!
//! - `cgroup.procs`
//! - `cpu.stat`
//! - `memory.stat` and `memory.swap.current`
//! - `io.stat`

pub mod classifier;
pub mod collector;
mod error;
mod group;
mod monitor;
mod races;
pub mod stats;
pub mod usage;

pub use classifier::{Classification, Classifier};
pub use error::{Error, Result};
pub use group::{Group, Lookup};
pub use monitor::Monitor;
pub use races::{RaceController, RaceLimits};
