use super::{Collection, ResourceCollector, aggregated_children, found, sum_children};
use crate::cgroup::stats::{KeyValueStat, MemoryStat, SingleLineStat, SwapUsage};
use crate::cgroup::{Error, Group, Lookup, Result};
use crate::metrics::{Metric, Sample};

/// Memory usage gauges, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MemoryUsage {
    rss: u64,
    /// Non-cached swap usage. Unknown at the root and with disabled swap accounting.
    swap: Option<u64>,
    cache: u64,
    kernel: u64,
}

impl MemoryUsage {
    fn add(&mut self, other: &MemoryUsage) {
        self.rss += other.rss;
        self.swap = Some(self.swap.unwrap_or_default() + other.swap.unwrap_or_default());
        self.cache += other.cache;
        self.kernel += other.kernel;
    }

    fn subtract(&mut self, other: &MemoryUsage) {
        self.rss = self.rss.saturating_sub(other.rss);
        self.swap = self
            .swap
            .map(|swap| swap.saturating_sub(other.swap.unwrap_or_default()));
        self.cache = self.cache.saturating_sub(other.cache);
        self.kernel = self.kernel.saturating_sub(other.kernel);
    }
}

fn read_usage(group: &Group) -> Result<Lookup<MemoryUsage>> {
    let stat = found!(group.read_property("memory.stat", MemoryStat::from_reader));

    // The root has no swap accounting
    let swap = if group.is_root() {
        None
    } else {
        match group.read_property("memory.swap.current", SwapUsage::from_reader) {
            Ok(Lookup::Found(usage)) => Some(usage.bytes.saturating_sub(stat.swapcached)),
            Ok(Lookup::Missing) => return Ok(Lookup::Missing),
            Err(Error::PropertyMissing { path }) => {
                log::trace!("{} is missing: swap accounting is disabled.", path.display());
                None
            }
            Err(err) => return Err(err),
        }
    };

    Ok(Lookup::Found(MemoryUsage {
        rss: stat.anon,
        swap,
        cache: stat.file,
        kernel: stat.kernel(),
    }))
}

/// Collects memory gauges from `memory.stat` and `memory.swap.current`.
///
/// Gauges need no cross-poll state: the usage of the children of an aggregating group is simply
/// subtracted, clamping at zero.
#[derive(Debug, Default)]
pub struct MemoryCollector;

impl MemoryCollector {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceCollector for MemoryCollector {
    fn collect(
        &mut self,
        ctx: &mut Collection<'_>,
        service: &str,
        group: &Group,
        exclude: &[String],
    ) -> Result<Lookup<()>> {
        let mut usage = found!(read_usage(group));

        if let Some(children) = found!(aggregated_children(group, exclude)) {
            let children = found!(sum_children(
                ctx.races,
                group,
                &children,
                read_usage,
                |total, usage| total.add(&usage),
            ));
            let Some(children) = children else {
                log::debug!("memory: `{group}` children are incomplete. Skipping its usage.");
                return Ok(Lookup::Found(()));
            };
            usage.subtract(&children);
        }

        log::debug!(
            "* {service}: memory: rss={}, swap={}, cache={}, kernel={}",
            usage.rss,
            usage.swap.unwrap_or_default(),
            usage.cache,
            usage.kernel,
        );

        ctx.samples
            .push(Sample::new(Metric::MemoryRss, service, usage.rss as f64));
        if let Some(swap) = usage.swap {
            ctx.samples
                .push(Sample::new(Metric::MemorySwap, service, swap as f64));
        }
        ctx.samples
            .push(Sample::new(Metric::MemoryCache, service, usage.cache as f64));
        ctx.samples
            .push(Sample::new(Metric::MemoryKernel, service, usage.kernel as f64));

        Ok(Lookup::Found(()))
    }
}
