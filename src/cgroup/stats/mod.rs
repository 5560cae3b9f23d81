//! Typed readers for the cgroup v2 accounting files consumed by the resource collectors.
//!
//! # Main types
//!
//! - [`CpuStat`]: user/system time from `cpu.stat`.
//! - [`MemoryStat`] and [`SwapUsage`]: memory breakdown from `memory.stat` and swap usage from
//!   `memory.swap.current`.
//! - [`IoStat`]: per-device counters from `io.stat`.
//!
//! Parsers report malformed data as [`std::io::Error`] of kind `InvalidData` wrapping a
//! [`StatParseError`], which lets them be passed straight to
//! [`Group::read_property`](crate::cgroup::Group::read_property).

mod cpu;
mod error;
mod io;
mod memory;
mod parser;

pub use cpu::CpuStat;
pub use error::StatParseError;
pub use io::{DeviceIoStat, IoStat};
pub use memory::{MemoryStat, SwapUsage};
pub use parser::{KeyValueStat, SingleLineStat};
