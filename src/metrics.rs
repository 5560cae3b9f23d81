//! Service metrics and their Prometheus exposition.
//!
//! Collectors produce plain [`Sample`]s during a poll; the [`Exporter`] publishes a complete set
//! of samples at once, replacing the previously published one, and renders it in the text
//! exposition format.

use std::collections::HashMap;

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "server";
const SUBSYSTEM: &str = "services";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics exposition is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    CpuUser,
    CpuSystem,
    MemoryRss,
    MemorySwap,
    MemoryCache,
    MemoryKernel,
    BlkioReads,
    BlkioWrites,
    BlkioReadBytes,
    BlkioWrittenBytes,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::CpuUser,
        Metric::CpuSystem,
        Metric::MemoryRss,
        Metric::MemorySwap,
        Metric::MemoryCache,
        Metric::MemoryKernel,
        Metric::BlkioReads,
        Metric::BlkioWrites,
        Metric::BlkioReadBytes,
        Metric::BlkioWrittenBytes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::CpuUser => "cpu_user",
            Metric::CpuSystem => "cpu_system",
            Metric::MemoryRss => "memory_rss",
            Metric::MemorySwap => "memory_swap",
            Metric::MemoryCache => "memory_cache",
            Metric::MemoryKernel => "memory_kernel",
            Metric::BlkioReads => "blkio_reads",
            Metric::BlkioWrites => "blkio_writes",
            Metric::BlkioReadBytes => "blkio_read_bytes",
            Metric::BlkioWrittenBytes => "blkio_written_bytes",
        }
    }

    fn help(self) -> &'static str {
        match self {
            Metric::CpuUser => "CPU time consumed in user mode, seconds",
            Metric::CpuSystem => "CPU time consumed in kernel mode, seconds",
            Metric::MemoryRss => "Anonymous and swap cache memory usage",
            Metric::MemorySwap => "Non-cached swap usage",
            Metric::MemoryCache => "Page cache memory usage",
            Metric::MemoryKernel => "Kernel data structures",
            Metric::BlkioReads => "Number of read operations",
            Metric::BlkioWrites => "Number of write operations",
            Metric::BlkioReadBytes => "Number of read bytes",
            Metric::BlkioWrittenBytes => "Number of written bytes",
        }
    }

    fn is_counter(self) -> bool {
        !matches!(
            self,
            Metric::MemoryRss | Metric::MemorySwap | Metric::MemoryCache | Metric::MemoryKernel
        )
    }

    fn labels(self) -> &'static [&'static str] {
        match self {
            Metric::BlkioReads
            | Metric::BlkioWrites
            | Metric::BlkioReadBytes
            | Metric::BlkioWrittenBytes => &["service", "device"],
            _ => &["service"],
        }
    }
}

/// One value of a metric for a service (and a device, for per-device metrics).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Metric,
    pub service: String,
    pub device: Option<String>,
    pub value: f64,
}

impl Sample {
    pub fn new(metric: Metric, service: &str, value: f64) -> Self {
        Self {
            metric,
            service: service.to_owned(),
            device: None,
            value,
        }
    }

    pub fn with_device(metric: Metric, service: &str, device: &str, value: f64) -> Self {
        Self {
            device: Some(device.to_owned()),
            ..Self::new(metric, service, value)
        }
    }
}

enum Family {
    Counter(CounterVec),
    Gauge(GaugeVec),
}

/// Owns a private registry with a metric family per [`Metric`].
pub struct Exporter {
    registry: Registry,
    families: HashMap<Metric, Family>,
}

impl Exporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let mut families = HashMap::with_capacity(Metric::ALL.len());

        for metric in Metric::ALL {
            let opts = Opts::new(metric.name(), metric.help())
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM);

            let family = if metric.is_counter() {
                let vec = CounterVec::new(opts, metric.labels())?;
                registry.register(Box::new(vec.clone()))?;
                Family::Counter(vec)
            } else {
                let vec = GaugeVec::new(opts, metric.labels())?;
                registry.register(Box::new(vec.clone()))?;
                Family::Gauge(vec)
            };

            families.insert(metric, family);
        }

        Ok(Self { registry, families })
    }

    /// Replaces all published values with `samples`.
    pub fn publish(&self, samples: &[Sample]) {
        for family in self.families.values() {
            match family {
                Family::Counter(vec) => vec.reset(),
                Family::Gauge(vec) => vec.reset(),
            }
        }

        for sample in samples {
            let Some(family) = self.families.get(&sample.metric) else {
                continue;
            };

            let service = sample.service.as_str();
            let device = sample.device.as_deref().unwrap_or_default();
            let labels: &[&str] = if sample.metric.labels().len() == 2 {
                &[service, device]
            } else {
                &[service]
            };

            match family {
                Family::Counter(vec) => vec.with_label_values(labels).inc_by(sample.value),
                Family::Gauge(vec) => vec.with_label_values(labels).set(sample.value),
            }
        }
    }

    /// Renders the published values in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
