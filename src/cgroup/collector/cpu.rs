use super::{Collection, ResourceCollector, aggregated_children, found, sum_children};
use crate::cgroup::stats::{CpuStat, KeyValueStat};
use crate::cgroup::usage::{CounterSet, RootStates, RootUpdate, RootUsage};
use crate::cgroup::{Group, Lookup, Result};
use crate::metrics::{Metric, Sample};

const USEC: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuUsage {
    user: u64,
    system: u64,
}

impl From<CpuStat> for CpuUsage {
    fn from(stat: CpuStat) -> Self {
        Self {
            user: stat.user_usec,
            system: stat.system_usec,
        }
    }
}

impl CounterSet for CpuUsage {
    const NAMES: &'static [&'static str] = &["user CPU usage", "system CPU usage"];
    // 1ms
    const TOLERANCE: u64 = 1000;

    fn get(&self, index: usize) -> u64 {
        [self.user, self.system][index]
    }

    fn get_mut(&mut self, index: usize) -> &mut u64 {
        match index {
            0 => &mut self.user,
            _ => &mut self.system,
        }
    }
}

fn read_usage(group: &Group) -> Result<Lookup<CpuUsage>> {
    Ok(group
        .read_property("cpu.stat", CpuStat::from_reader)?
        .map(CpuUsage::from))
}

/// Collects user and system CPU time from `cpu.stat`.
#[derive(Debug, Default)]
pub struct CpuCollector {
    roots: RootStates<String, CpuUsage>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceCollector for CpuCollector {
    fn pre(&mut self) {
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
                |total, usage| total.add(&usage),
            ));

            let key = group.name().to_owned();
            let net = match children {
                Some(children) => {
                    let current = RootUsage {
                        root: usage,
                        children,
                    };
                    let update = self.roots.update(key, current);
                    if let RootUpdate::Faulted(_, fault) = &update {
                        log::warn!("cpu: failed to calculate `{group}` usage: {fault}");
                    }
                    update.net()
                }
                None => {
                    log::debug!("cpu: `{group}` children are incomplete. Holding its usage.");
                    self.roots.hold(&key)
                }
            };

            usage = match net {
                Some(net) => net,
                None => {
                    log::debug!("cpu: `{group}` root state hasn't been initialized yet.");
                    return Ok(Lookup::Found(()));
                }
            };
        }

        let user = usage.user as f64 / USEC;
        let system = usage.system as f64 / USEC;
        log::debug!("* {service}: cpu: user={user:.1}s, system={system:.1}s");

        ctx.samples.push(Sample::new(Metric::CpuUser, service, user));
        ctx.samples
            .push(Sample::new(Metric::CpuSystem, service, system));

        Ok(Lookup::Found(()))
    }

    fn post(&mut self) {
        self.roots.sweep(|name| {
            if name == "/" {
                log::error!("cpu: `{name}` hasn't been collected.");
                true
            } else {
                log::debug!(
                    "cpu: `{name}` root hasn't been collected. Assuming it deleted and dropping its state."
                );
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::super::tests::{group, races};
    use super::*;

    fn cpu_stat(user: u64, system: u64) -> String {
        let usage = user + system;
        format!("usage_usec {usage}\nuser_usec {user}\nsystem_usec {system}\nnr_periods 0\n")
    }

    fn collect(
        collector: &mut CpuCollector,
        races: &mut crate::cgroup::RaceController,
        group: &Group,
        exclude: &[String],
    ) -> Result<Lookup<Vec<Sample>>> {
        let mut samples = Vec::new();
        let mut ctx = Collection {
            races,
            samples: &mut samples,
        };
        collector.pre();
        let lookup = collector.collect(&mut ctx, "service", group, exclude)?;
        Ok(lookup.map(|()| samples))
    }

    #[test]
    fn test_collect_plain_group() {
        let dir = tempfile::tempdir().unwrap();
        let stat = cpu_stat(1_500_000, 250_000);
        group(dir.path(), "/system.slice/nginx.service", &[("cpu.stat", stat.as_str())]);
        let nginx = Group::root(dir.path())
            .child("system.slice")
            .child("nginx.service");

        let mut collector = CpuCollector::new();
        let samples = collect(&mut collector, &mut races(5), &nginx, &[])
            .unwrap()
            .found()
            .unwrap();

        assert_eq!(
            samples,
            vec![
                Sample::new(Metric::CpuUser, "service", 1.5),
                Sample::new(Metric::CpuSystem, "service", 0.25),
            ]
        );
        assert!(collector.roots.is_empty());
    }

    #[test]
    fn test_collect_missing_group() {
        let dir = tempfile::tempdir().unwrap();
        let gone = Group::root(dir.path()).child("gone.scope");

        let mut collector = CpuCollector::new();
        let lookup = collect(&mut collector, &mut races(5), &gone, &[]).unwrap();
        assert_eq!(lookup, Lookup::Missing);
    }

    #[test]
    fn test_root_net_usage_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let root = Group::root(dir.path());
        let mut races = races(5);
        let mut collector = CpuCollector::new();

        // (root user, child user) per poll, system time is left constant
        let polls = [
            (1_000_000, 500_000),
            (1_300_000, 600_000),
            (1_400_000, 1_000_000),
            (1_900_000, 1_200_000),
        ];
        let mut exposed = Vec::new();

        for (root_user, child_user) in polls {
            let (root_stat, child_stat) = (cpu_stat(root_user, 10), cpu_stat(child_user, 10));
            group(dir.path(), "/", &[("cpu.stat", root_stat.as_str())]);
            group(dir.path(), "/system.slice", &[("cpu.stat", child_stat.as_str())]);

            let samples = collect(&mut collector, &mut races, &root, &[])
                .unwrap()
                .found()
                .unwrap();
            collector.post();
            exposed.push(samples.first().map(|sample| sample.value));
        }

        assert_eq!(exposed, vec![None, Some(0.2), Some(0.2), Some(0.5)]);
    }

    #[test]
    fn test_excluded_child_race_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let name = "/user.slice/user-1000.slice";
        group(dir.path(), name, &[("cpu.stat", cpu_stat(100, 100).as_str())]);
        let slice = Group::root(dir.path())
            .child("user.slice")
            .child("user-1000.slice");
        let exclude = vec!["user@1000.service".to_owned()];

        let mut races = races(1);
        let mut collector = CpuCollector::new();

        races.on_poll_started();
        let lookup = collect(&mut collector, &mut races, &slice, &exclude).unwrap();
        assert_eq!(lookup, Lookup::Found(Vec::new()));
        races.on_poll_finished();

        races.on_poll_started();
        let err = collect(&mut collector, &mut races, &slice, &exclude).unwrap_err();
        assert!(matches!(err, crate::cgroup::Error::ExpectedMissing { .. }));
    }

    #[test]
    fn test_root_usage_is_held_while_a_child_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let slice = Group::root(dir.path())
            .child("user.slice")
            .child("user-1000.slice");
        let exclude = vec!["session-1.scope".to_owned(), "user@1000.service".to_owned()];
        let mut races = races(5);
        let mut collector = CpuCollector::new();

        // (slice user, session user, user manager user) per poll; `None` is a deleted group
        let polls = [
            (1_000_000, 200_000, Some(300_000)),
            (1_500_000, 300_000, Some(400_000)),
            (2_500_000, 1_000_000, None),
            (2_800_000, 1_100_000, Some(500_000)),
        ];
        let mut exposed = Vec::new();

        for (slice_user, session_user, manager_user) in polls {
            let slice_stat = cpu_stat(slice_user, 10);
            let session_stat = cpu_stat(session_user, 10);
            group(
                dir.path(),
                "/user.slice/user-1000.slice",
                &[("cpu.stat", slice_stat.as_str())],
            );
            group(
                dir.path(),
                "/user.slice/user-1000.slice/session-1.scope",
                &[("cpu.stat", session_stat.as_str())],
            );

            let manager = dir.path().join("user.slice/user-1000.slice/user@1000.service");
            match manager_user {
                Some(user) => {
                    let manager_stat = cpu_stat(user, 10);
                    group(
                        dir.path(),
                        "/user.slice/user-1000.slice/user@1000.service",
                        &[("cpu.stat", manager_stat.as_str())],
                    );
                }
                None => fs::remove_dir_all(&manager).unwrap(),
            }

            races.on_poll_started();
            let samples = collect(&mut collector, &mut races, &slice, &exclude)
                .unwrap()
                .found()
                .unwrap();
            races.on_poll_finished();
            collector.post();
            exposed.push(samples.first().map(|sample| sample.value));
        }

        // The third poll holds the usage instead of treating the session growth as the slice's,
        // the fourth one catches up against the second
        assert_eq!(exposed, vec![None, Some(0.3), Some(0.3), Some(0.7)]);
    }

    #[test]
    fn test_deleted_roots_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let name = "/user.slice/user-1000.slice";
        group(dir.path(), name, &[("cpu.stat", cpu_stat(100, 100).as_str())]);
        group(
            dir.path(),
            "/user.slice/user-1000.slice/user@1000.service",
            &[("cpu.stat", cpu_stat(50, 50).as_str())],
        );
        let slice = Group::root(dir.path())
            .child("user.slice")
            .child("user-1000.slice");

        let mut collector = CpuCollector::new();
        collect(&mut collector, &mut races(5), &slice, &["user@1000.service".to_owned()]).unwrap();
        collector.post();
        assert_eq!(collector.roots.len(), 1);

        fs::remove_dir_all(dir.path().join("user.slice")).unwrap();
        collector.pre();
        collector.post();
        assert!(collector.roots.is_empty());
    }
}
