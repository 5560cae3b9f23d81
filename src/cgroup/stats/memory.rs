//! Parsing of the cgroup v2 memory accounting files.
//!
//! - `memory.stat` holds key/value pairs and is parsed into [`MemoryStat`]. Only the fields that
//!   are attributed to services are kept, and all of them must be present.
//! - `memory.swap.current` holds a single byte count and is parsed into [`SwapUsage`]. It doesn't
//!   exist on the root group or when swap accounting is disabled.
//!
//! All values are instantaneous gauges in bytes.
//!
//! # Examples
//!
//! ```rust
//! use service_metrics::cgroup::stats::{KeyValueStat, MemoryStat, SingleLineStat, SwapUsage};
//!
//! let data = "\
//! anon 1000
//! file 2000
//! kernel_stack 10
//! pagetables 20
//! percpu 30
//! slab_unreclaimable 40
//! sock 50
//! swapcached 60
//! ";
//! let stat = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
//! assert_eq!(stat.kernel(), 150);
//!
//! let swap = SwapUsage::from_reader(&mut "8192\n".as_bytes()).unwrap();
//! assert_eq!(swap.bytes, 8192);
//! ```

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::LazyLock;

use super::{KeyValueStat, SingleLineStat, StatParseError};

/// Memory usage breakdown from `memory.stat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryStat {
    /// Anonymous memory (heap, stacks, private mappings).
    pub anon: u64,
    /// Page cache.
    pub file: u64,
    pub kernel_stack: u64,
    pub pagetables: u64,
    pub percpu: u64,
    /// Slab memory that can't be reclaimed under pressure.
    pub slab_unreclaimable: u64,
    /// Network transmission buffers.
    pub sock: u64,
    /// Swapped out memory that is also cached in RAM.
    pub swapcached: u64,
}

impl MemoryStat {
    /// Kernel memory attributed to the group.
    pub fn kernel(&self) -> u64 {
        self.kernel_stack + self.pagetables + self.percpu + self.slab_unreclaimable + self.sock
    }

    fn set_anon(&mut self, v: u64) {
        self.anon = v;
    }

    fn set_file(&mut self, v: u64) {
        self.file = v;
    }

    fn set_kernel_stack(&mut self, v: u64) {
        self.kernel_stack = v;
    }

    fn set_pagetables(&mut self, v: u64) {
        self.pagetables = v;
    }

    fn set_percpu(&mut self, v: u64) {
        self.percpu = v;
    }

    fn set_slab_unreclaimable(&mut self, v: u64) {
        self.slab_unreclaimable = v;
    }

    fn set_sock(&mut self, v: u64) {
        self.sock = v;
    }

    fn set_swapcached(&mut self, v: u64) {
        self.swapcached = v;
    }
}

type Setter = fn(&mut MemoryStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(8);

    m.insert("anon", MemoryStat::set_anon);
    m.insert("file", MemoryStat::set_file);
    m.insert("kernel_stack", MemoryStat::set_kernel_stack);
    m.insert("pagetables", MemoryStat::set_pagetables);
    m.insert("percpu", MemoryStat::set_percpu);
    m.insert("slab_unreclaimable", MemoryStat::set_slab_unreclaimable);
    m.insert("sock", MemoryStat::set_sock);
    m.insert("swapcached", MemoryStat::set_swapcached);

    m
});

impl KeyValueStat for MemoryStat {
    const SPLIT_CHAR: Option<char> = None;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;
    const REQUIRED_KEYS: &'static [&'static str] = &[
        "anon",
        "file",
        "kernel_stack",
        "pagetables",
        "percpu",
        "slab_unreclaimable",
        "sock",
        "swapcached",
    ];

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

/// Swap usage from `memory.swap.current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapUsage {
    pub bytes: u64,
}

impl SingleLineStat for SwapUsage {
    /// # Errors
    ///
    /// Returns an `InvalidData` error if the first line isn't a number.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut line = String::new();
        buf.read_line(&mut line)?;

        let line = line.trim();
        let bytes = line
            .parse::<u64>()
            .map_err(|source| StatParseError::InvalidValue {
                value: line.to_owned(),
                line: 1,
                source,
            })?;

        Ok(SwapUsage { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::stats::error::extract_stat_parse_error;

    const COMPLETE: &str = "\
anon 1000
file 2000
kernel 900
kernel_stack 300
pagetables 100
percpu 50
sock 10
vmalloc 0
shmem 600
file_mapped 700
slab_reclaimable 20
slab_unreclaimable 400
slab 420
swapcached 4096
";

    #[test]
    fn test_parse_complete_memory_stat() {
        let stat = MemoryStat::from_reader(&mut COMPLETE.as_bytes()).unwrap();
        assert_eq!(stat.anon, 1000);
        assert_eq!(stat.file, 2000);
        assert_eq!(stat.kernel_stack, 300);
        assert_eq!(stat.pagetables, 100);
        assert_eq!(stat.percpu, 50);
        assert_eq!(stat.sock, 10);
        assert_eq!(stat.slab_unreclaimable, 400);
        assert_eq!(stat.swapcached, 4096);
        assert_eq!(stat.kernel(), 860);
    }

    #[test]
    fn test_parse_partial_memory_stat() {
        let data = "\
anon 1000
file 2000
kernel_stack 300
";
        let err = MemoryStat::from_reader(&mut data.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        match extract_stat_parse_error(&err) {
            StatParseError::MissingField { field } => assert_eq!(*field, "pagetables"),
            other => panic!("Expected MissingField error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_memory_stat() {
        let data = "\
invalid line
anon abc
file 2000
kernel_stack 300
";
        let err = MemoryStat::from_reader(&mut data.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        let err = extract_stat_parse_error(&err);
        match err {
            StatParseError::InvalidKeyValue {
                key, value, line, ..
            } => {
                assert_eq!(key, "anon");
                assert_eq!(value, "abc");
                assert_eq!(*line, 2);
            }
            _ => panic!("Expected InvalidKeyValue error"),
        }
    }

    #[test]
    fn test_duplicate_memory_stat_field() {
        let data = "\
anon 1000
anon 2000
";
        let err = MemoryStat::from_reader(&mut data.as_bytes()).unwrap_err();
        let err = extract_stat_parse_error(&err);
        match err {
            StatParseError::DuplicateField { field, line } => {
                assert_eq!(field, "anon");
                assert_eq!(*line, 2);
            }
            _ => panic!("Expected DuplicateField error"),
        }
    }

    #[test]
    fn test_extra_whitespace() {
        let data = COMPLETE
            .lines()
            .map(|line| format!("   {}\n", line.replace(' ', "    ")))
            .collect::<String>();
        let stat = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.anon, 1000);
        assert_eq!(stat.file, 2000);
        assert_eq!(stat.kernel_stack, 300);
    }

    #[test]
    fn test_parse_swap_usage() {
        let stat = SwapUsage::from_reader(&mut "8192\n".as_bytes()).unwrap();
        assert_eq!(stat.bytes, 8192);
    }

    #[test]
    fn test_parse_invalid_swap_usage() {
        for data in ["", "abcd\n"] {
            let err = SwapUsage::from_reader(&mut data.as_bytes()).unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
            match extract_stat_parse_error(&err) {
                StatParseError::InvalidValue { value, line, .. } => {
                    assert_eq!(value, data.trim());
                    assert_eq!(*line, 1);
                }
                other => panic!("Expected InvalidValue error, got {other:?}"),
            }
        }
    }
}
