//! Resource collectors, invoked by the [`Monitor`](super::Monitor) once per group that needs
//! collection.
//!
//! A group is collected either as is, or as an aggregating group: the hierarchy root, or a group
//! billed as a whole except some of its children. The counters of an aggregating group include
//! the usage of its children, which are either billed on their own or, for the root, are the
//! rest of the hierarchy, so their usage has to be subtracted.

mod cpu;
mod devices;
mod io;
mod memory;

use std::path::Path;

use super::group::found;
use super::{Error, Group, Lookup, RaceController, Result};
use crate::metrics::Sample;

pub use cpu::CpuCollector;
pub use devices::DeviceResolver;
pub use io::IoCollector;
pub use memory::MemoryCollector;

/// Per-poll context handed to the collectors.
pub struct Collection<'a> {
    pub races: &'a mut RaceController,
    pub samples: &'a mut Vec<Sample>,
}

pub trait ResourceCollector: Send {
    /// Called at the start of every poll.
    fn pre(&mut self) {}

    /// Collects the usage of `group` on behalf of `service`.
    ///
    /// `exclude` lists the children which are billed on their own. Returns [`Lookup::Missing`] if
    /// the group has disappeared, in which case no samples must have been produced.
    fn collect(
        &mut self,
        ctx: &mut Collection<'_>,
        service: &str,
        group: &Group,
        exclude: &[String],
    ) -> Result<Lookup<()>>;

    /// Called after a successful poll.
    fn post(&mut self) {}
}

/// The CPU, memory and IO collectors, in the order they are invoked.
pub fn default_collectors(rootfs: &Path) -> Vec<Box<dyn ResourceCollector>> {
    vec![
        Box::new(CpuCollector::new()),
        Box::new(MemoryCollector::new()),
        Box::new(IoCollector::new(DeviceResolver::new(rootfs))),
    ]
}

/// Returns the children whose usage has to be subtracted from `group`, or `None` if the group
/// isn't an aggregating one.
///
/// The root subtracts all of its children. They are listed anew, since the monitor has just
/// visited them.
fn aggregated_children(group: &Group, exclude: &[String]) -> Result<Lookup<Option<Vec<Group>>>> {
    if group.is_root() {
        return Ok(group.children()?.map(Some));
    }

    if exclude.is_empty() {
        return Ok(Lookup::Found(None));
    }

    Ok(Lookup::Found(Some(
        exclude.iter().map(|name| group.child(name)).collect(),
    )))
}

/// Reads a child of an aggregating group. The child is expected to exist.
///
/// A missing child is retried for a short while and then reported to the race controller. Returns
/// [`Lookup::Missing`] if the parent itself has disappeared meanwhile, and `None` if the child is
/// to be skipped during this poll.
fn read_expected<T>(
    races: &mut RaceController,
    parent: &Group,
    child: &Group,
    mut read: impl FnMut(&Group) -> Result<Lookup<T>>,
) -> Result<Lookup<Option<T>>> {
    if let Lookup::Found(value) = read(child)? {
        return Ok(Lookup::Found(Some(value)));
    }

    if !parent.exists()? {
        return Ok(Lookup::Missing);
    }

    // It might be a race with a user session being opened or closed
    let value = races.retry(|| {
        if !parent.exists()? {
            return Ok(Some(None));
        }
        Ok(read(child)?.found().map(Some))
    })?;

    match value {
        Some(Some(value)) => Ok(Lookup::Found(Some(value))),
        Some(None) => Ok(Lookup::Missing),
        None => {
            races.check(
                child.name(),
                Error::ExpectedMissing { path: child.path() },
            )?;
            Ok(Lookup::Found(None))
        }
    }
}

/// Sums the usage of the children of an aggregating group.
///
/// Returns `None` if a child has been skipped: the sum is incomplete and mustn't be subtracted
/// from the group's usage during this poll.
fn sum_children<T: Default>(
    races: &mut RaceController,
    parent: &Group,
    children: &[Group],
    mut read: impl FnMut(&Group) -> Result<Lookup<T>>,
    mut add: impl FnMut(&mut T, T),
) -> Result<Lookup<Option<T>>> {
    let mut total = T::default();
    let mut complete = true;

    for child in children {
        let usage = found!(read_expected(races, parent, child, &mut read));
        let Some(usage) = usage else {
            log::debug!("Skipping missing `{child}` cgroup.");
            complete = false;
            continue;
        };
        add(&mut total, usage);
    }

    Ok(Lookup::Found(complete.then_some(total)))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::cgroup::RaceLimits;

    pub(crate) fn races(max_races: usize) -> RaceController {
        RaceController::new(RaceLimits {
            max_races,
            max_active_races: 10,
            retry_period: Duration::ZERO,
            retry_timeout: Duration::ZERO,
        })
    }

    /// Creates `name` under `root` with the given control files.
    pub(crate) fn group(root: &Path, name: &str, files: &[(&str, &str)]) {
        let path = root.join(name.trim_start_matches('/'));
        fs::create_dir_all(&path).unwrap();
        for (file, content) in files {
            fs::write(path.join(file), content).unwrap();
        }
    }

    #[test]
    fn test_aggregated_children() {
        let dir = tempfile::tempdir().unwrap();
        group(dir.path(), "/system.slice", &[]);
        group(dir.path(), "/user.slice", &[]);
        let root = Group::root(dir.path());

        let children = aggregated_children(&root, &[]).unwrap().found().unwrap().unwrap();
        let names: Vec<_> = children.iter().map(Group::name).collect();
        assert_eq!(names, vec!["/system.slice", "/user.slice"]);

        let slice = root.child("user.slice");
        assert_eq!(aggregated_children(&slice, &[]).unwrap(), Lookup::Found(None));

        let children = aggregated_children(&slice, &["user@1000.service".to_owned()])
            .unwrap()
            .found()
            .unwrap()
            .unwrap();
        assert_eq!(children[0].name(), "/user.slice/user@1000.service");
    }

    #[test]
    fn test_read_expected() {
        let dir = tempfile::tempdir().unwrap();
        group(dir.path(), "/user.slice/user-1000.slice", &[]);
        let root = Group::root(dir.path());
        let parent = root.child("user.slice").child("user-1000.slice");
        let child = parent.child("user@1000.service");
        let mut races = races(1);

        let read = |group: &Group| -> Result<Lookup<bool>> {
            match group.exists()? {
                true => Ok(Lookup::Found(true)),
                false => Ok(Lookup::Missing),
            }
        };

        races.on_poll_started();
        assert_eq!(
            read_expected(&mut races, &parent, &child, read).unwrap(),
            Lookup::Found(None)
        );
        races.on_poll_finished();

        races.on_poll_started();
        let err = read_expected(&mut races, &parent, &child, read).unwrap_err();
        assert!(matches!(err, Error::ExpectedMissing { .. }));

        let gone = root.child("gone.slice");
        assert_eq!(
            read_expected(&mut races, &gone, &gone.child("app.slice"), read).unwrap(),
            Lookup::Missing
        );
    }

    #[test]
    fn test_sum_children_is_incomplete_without_a_child() {
        let dir = tempfile::tempdir().unwrap();
        group(dir.path(), "/user.slice/user-1000.slice/session-1.scope", &[]);
        let parent = Group::root(dir.path())
            .child("user.slice")
            .child("user-1000.slice");
        let session = parent.child("session-1.scope");
        let missing = parent.child("user@1000.service");
        let mut races = races(5);

        let read = |group: &Group| -> Result<Lookup<u64>> {
            match group.exists()? {
                true => Ok(Lookup::Found(2)),
                false => Ok(Lookup::Missing),
            }
        };
        let add = |total: &mut u64, value: u64| *total += value;

        let children = [session.clone(), session.clone()];
        assert_eq!(
            sum_children(&mut races, &parent, &children, read, add).unwrap(),
            Lookup::Found(Some(4))
        );

        races.on_poll_started();
        let children = [session, missing];
        assert_eq!(
            sum_children(&mut races, &parent, &children, read, add).unwrap(),
            Lookup::Found(None)
        );
    }
}
