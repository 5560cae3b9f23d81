//! Cross-poll bookkeeping of cgroup creation/deletion races.
//!
//! Walking the hierarchy regularly collides with groups being created or destroyed: a group that
//! has just been listed, or that its parent declares, may be missing a moment later. Simple
//! retries with a small delay do not always help, since systemd may spend seconds configuring
//! the groups of a starting user session. So races are tracked between polls instead: a group may
//! be missing for a bounded number of consecutive polls before it is reported as an error.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::{Error, Result};

/// Limits applied by the [`RaceController`].
#[derive(Debug, Clone)]
pub struct RaceLimits {
    /// Maximum number of consecutive polls a single group may be racing.
    pub max_races: usize,
    /// Maximum number of groups that may be racing at the same time.
    pub max_active_races: usize,
    /// Delay between two attempts of the in-poll retry.
    pub retry_period: Duration,
    /// Total time budget of the in-poll retry.
    pub retry_timeout: Duration,
}

impl Default for RaceLimits {
    fn default() -> Self {
        Self {
            max_races: 5,
            max_active_races: 10,
            retry_period: Duration::from_millis(10),
            retry_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub struct RaceController {
    limits: RaceLimits,
    /// Groups that raced during the current poll.
    current: HashSet<String>,
    /// Consecutive race counters of groups that raced during the current or the previous poll.
    active: HashMap<String, usize>,
}

impl RaceController {
    pub fn new(limits: RaceLimits) -> Self {
        Self {
            limits,
            current: HashSet::new(),
            active: HashMap::new(),
        }
    }

    pub fn on_poll_started(&mut self) {
        self.current.clear();
    }

    /// Decides whether a missing-but-expected group is a transient race or a real failure.
    ///
    /// Returns `Ok(())` if the race is suppressed (the group is to be treated as absent for this
    /// poll only) and `Err(err)` once one of the limits is exceeded.
    pub fn check(&mut self, group: &str, err: Error) -> Result<()> {
        let mut races = self.active.get(group).copied().unwrap_or_default();

        if self.current.insert(group.to_owned()) {
            races += 1;
            self.active.insert(group.to_owned(), races);
        }

        let active = self.active.len();
        if active > self.limits.max_active_races {
            log::warn!("Race detector: too many cgroups with races: {active}");
            return Err(err);
        } else if races > self.limits.max_races {
            log::warn!("Race detector: too many races on `{group}` group ({races})");
            return Err(err);
        }

        log::warn!("Suppressing a possible race on `{group}` cgroup ({races}): {err}");
        Ok(())
    }

    /// Retries `attempt` with a short sleep until it yields a value or the retry budget is spent.
    pub fn retry<T>(&self, mut attempt: impl FnMut() -> Result<Option<T>>) -> Result<Option<T>> {
        let period = self.limits.retry_period;
        let deadline = Instant::now() + self.limits.retry_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline || deadline - now < period {
                break;
            }
            std::thread::sleep(period);

            if let Some(value) = attempt()? {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    /// Forgets groups that haven't raced during the finished poll: they have stabilized.
    pub fn on_poll_finished(&mut self) {
        let current = &self.current;
        self.active.retain(|group, _| current.contains(group));
        self.current.clear();
    }

    pub fn active_races(&self) -> usize {
        self.active.len()
    }
}
