use std::collections::BTreeMap;

use super::{
    Collection, DeviceResolver, ResourceCollector, aggregated_children, found, sum_children,
};
use crate::cgroup::stats::{DeviceIoStat, IoStat};
use crate::cgroup::usage::{CounterSet, RootStates, RootUpdate, RootUsage};
use crate::cgroup::{Group, Lookup, Result};
use crate::metrics::{Metric, Sample};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DeviceUsage {
    reads: u64,
    writes: u64,
    read_bytes: u64,
    written_bytes: u64,
}

impl From<&DeviceIoStat> for DeviceUsage {
    fn from(stat: &DeviceIoStat) -> Self {
        Self {
            reads: stat.rios,
            writes: stat.wios,
            read_bytes: stat.rbytes,
            written_bytes: stat.wbytes,
        }
    }
}

impl CounterSet for DeviceUsage {
    const NAMES: &'static [&'static str] = &[
        "read operations",
        "write operations",
        "read bytes",
        "written bytes",
    ];

    fn get(&self, index: usize) -> u64 {
        [self.reads, self.writes, self.read_bytes, self.written_bytes][index]
    }

    fn get_mut(&mut self, index: usize) -> &mut u64 {
        match index {
            0 => &mut self.reads,
            1 => &mut self.writes,
            2 => &mut self.read_bytes,
            _ => &mut self.written_bytes,
        }
    }
}

type Usage = BTreeMap<String, DeviceUsage>;

fn read_usage(group: &Group) -> Result<Lookup<Usage>> {
    Ok(group.read_property("io.stat", IoStat::from_reader)?.map(|stat| {
        stat.devices
            .iter()
            .map(|(device, stat)| (device.clone(), DeviceUsage::from(stat)))
            .collect()
    }))
}

fn add_usage(total: &mut Usage, usage: Usage) {
    for (device, usage) in usage {
        total.entry(device).or_default().add(&usage);
    }
}

/// Collects per-device block IO counters from `io.stat`.
///
/// Aggregating groups are accounted per device, the same way the CPU collector does it.
#[derive(Debug)]
pub struct IoCollector {
    devices: DeviceResolver,
    roots: RootStates<(String, String), DeviceUsage>,
}

impl IoCollector {
    pub fn new(devices: DeviceResolver) -> Self {
        Self {
            devices,
            roots: RootStates::default(),
        }
    }

    /// Holds the usage of every device of `group` for a poll with an incomplete children sum.
    fn hold_root(&mut self, group: &Group, usage: Usage) -> Usage {
        log::debug!("io: `{group}` children are incomplete. Holding its usage.");

        usage
            .into_keys()
            .filter_map(|device| {
                let net = self.roots.hold(&(group.name().to_owned(), device.clone()))?;
                Some((device, net))
            })
            .collect()
    }

    fn collect_root(&mut self, group: &Group, usage: Usage, children: Usage) -> Usage {
        let mut current: BTreeMap<String, RootUsage<DeviceUsage>> = usage
            .into_iter()
            .map(|(device, root)| {
                let usage = RootUsage {
                    root,
                    children: DeviceUsage::default(),
                };
                (device, usage)
            })
            .collect();

        for (device, usage) in children {
            current.entry(device).or_default().children = usage;
        }

        let mut net = Usage::new();
        for (device, current) in current {
            let update = self
                .roots
                .update((group.name().to_owned(), device.clone()), current);

            if let RootUpdate::Faulted(_, fault) = &update {
                log::warn!("io: failed to calculate `{group}` usage of `{device}`: {fault}");
            }

            match update.net() {
                Some(usage) => {
                    net.insert(device, usage);
                }
                None => log::debug!("io: `{group}` root state for `{device}` has been initialized."),
            }
        }

        net
    }
}

impl ResourceCollector for IoCollector {
    fn pre(&mut self) {
        self.devices.reset();
        self.roots.reset_marks();
    }

    fn collect(
        &mut self,
        ctx: &mut Collection<'_>,
        service: &str,
        group: &Group,
        exclude: &[String],
    ) -> Result<Lookup<()>> {
        let children = found!(aggregated_children(group, exclude));
        let mut usage = found!(read_usage(group));

        if let Some(children) = children {
            let children = found!(sum_children(
                ctx.races,
                group,
                &children,
                read_usage,
                add_usage
            ));
            usage = match children {
                Some(children) => self.collect_root(group, usage, children),
                None => self.hold_root(group, usage),
            };
        }

        for (device, usage) in usage {
            let device = self.devices.name(&device);
            log::debug!(
                "* {service}: {device}: reads={}, writes={}, read={}, written={}",
                usage.reads,
                usage.writes,
                usage.read_bytes,
                usage.written_bytes,
            );

            for (metric, value) in [
                (Metric::BlkioReads, usage.reads),
                (Metric::BlkioWrites, usage.writes),
                (Metric::BlkioReadBytes, usage.read_bytes),
                (Metric::BlkioWrittenBytes, usage.written_bytes),
            ] {
                ctx.samples
                    .push(Sample::with_device(metric, service, &device, value as f64));
            }
        }

        Ok(Lookup::Found(()))
    }

    fn post(&mut self) {
        self.roots.sweep(|(root, device)| {
            log::debug!(
                "io: `{root}` root usage of `{device}` hasn't been collected. Dropping its state."
            );
            false
        });
    }
}
