//! Parsing of the cgroup v2 `io.stat` file.
//!
//! Each line starts with a `major:minor` device id followed by `key=value` counters:
//!
//! ```text
//! 8:0 rbytes=1024 wbytes=2048 rios=12 wios=24 dbytes=0 dios=0
//! ```
//!
//! Counters are kept per device in [`IoStat`]. The kernel may report a device without any
//! counters (e.g. right after it has been attached); such lines are skipped.
//!
//! # Example
//!
//! ```rust
//! use service_metrics::cgroup::stats::IoStat;
//!
//! let data = "\
//! 8:0 rbytes=1024 wbytes=2048 rios=12 wios=24
//! 254:0 rbytes=1 wbytes=2 rios=3 wios=4
//! ";
//! let stat = IoStat::from_reader(&mut data.as_bytes()).unwrap();
//!
//! assert_eq!(stat.devices.len(), 2);
//! assert_eq!(stat.devices["8:0"].rbytes, 1024);
//! assert_eq!(stat.devices["254:0"].wios, 4);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::BufRead;
use std::sync::LazyLock;

use super::{KeyValueStat, StatParseError};

/// Counters of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceIoStat {
    /// Bytes read.
    pub rbytes: u64,
    /// Bytes written.
    pub wbytes: u64,
    /// Read operations.
    pub rios: u64,
    /// Write operations.
    pub wios: u64,
}

impl DeviceIoStat {
    fn set_rbytes(&mut self, rbytes: u64) {
        self.rbytes = rbytes;
    }

    fn set_wbytes(&mut self, wbytes: u64) {
        self.wbytes = wbytes;
    }

    fn set_rios(&mut self, rios: u64) {
        self.rios = rios;
    }

    fn set_wios(&mut self, wios: u64) {
        self.wios = wios;
    }
}

type Setter = fn(&mut DeviceIoStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(4);

    m.insert("rbytes", DeviceIoStat::set_rbytes);
    m.insert("wbytes", DeviceIoStat::set_wbytes);
    m.insert("rios", DeviceIoStat::set_rios);
    m.insert("wios", DeviceIoStat::set_wios);

    m
});

impl KeyValueStat for DeviceIoStat {
    const SPLIT_CHAR: Option<char> = Some('=');
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = true;
    const REQUIRED_KEYS: &'static [&'static str] = &["rbytes", "wbytes", "rios", "wios"];

    #[inline]
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

/// Per-device I/O counters of a group, keyed by `major:minor` device id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IoStat {
    pub devices: BTreeMap<String, DeviceIoStat>,
}

impl IoStat {
    /// Parses a whole `io.stat` file.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidData` error if a device is listed twice or one of its counters is
    /// invalid or absent.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let handlers = DeviceIoStat::field_handlers();
        let mut stat = IoStat::default();

        let mut line = String::new();
        let mut lineno = 0;

        while buf.read_line(&mut line)? != 0 {
            lineno += 1;

            let trimmed = line.trim();
            let (device, counters) = match trimmed.split_once(char::is_whitespace) {
                Some((device, counters)) => (device, counters.trim_start()),
                None => (trimmed, ""),
            };

            if device.is_empty() || counters.is_empty() {
                line.clear();
                continue;
            }

            if stat.devices.contains_key(device) {
                return Err(StatParseError::DuplicateDevice {
                    device: device.to_owned(),
                    line: lineno,
                }
                .into());
            }

            let mut device_stat = DeviceIoStat::default();
            let mut seen = HashSet::with_capacity(handlers.len());
            DeviceIoStat::parse_line(&mut device_stat, counters, lineno, handlers, &mut seen)?;
            DeviceIoStat::check_required(&seen)?;

            stat.devices.insert(device.to_owned(), device_stat);
            line.clear();
        }

        Ok(stat)
    }
}
