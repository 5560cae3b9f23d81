//! Parsing of the cgroup v2 `cpu.stat` file.
//!
//! Only the user and system time split is kept: it is what gets attributed to services. Both
//! values are monotonic counters in microseconds.
//!
//! # Example
//!
//! ```rust
//! use service_metrics::cgroup::stats::{CpuStat, KeyValueStat};
//!
//! let data = "\
//! usage_usec 1000000
//! user_usec 600000
//! system_usec 400000
//! nr_periods 0
//! ";
//! let stat = CpuStat::from_reader(&mut data.as_bytes()).unwrap();
//! assert_eq!(stat.user_usec, 600_000);
//! assert_eq!(stat.system_usec, 400_000);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use super::KeyValueStat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuStat {
    /// Time (in microseconds) spent in user space.
    pub user_usec: u64,
    /// Time (in microseconds) spent in kernel space.
    pub system_usec: u64,
}

impl CpuStat {
    fn set_user_usec(&mut self, user_usec: u64) {
        self.user_usec = user_usec;
    }

    fn set_system_usec(&mut self, system_usec: u64) {
        self.system_usec = system_usec;
    }
}

type Setter = fn(&mut CpuStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(2);

    m.insert("user_usec", CpuStat::set_user_usec);
    m.insert("system_usec", CpuStat::set_system_usec);

    m
});

impl KeyValueStat for CpuStat {
    const SPLIT_CHAR: Option<char> = None;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;
    const REQUIRED_KEYS: &'static [&'static str] = &["user_usec", "system_usec"];

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}
