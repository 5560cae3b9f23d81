//! Cross-poll arithmetic of aggregation roots.
//!
//! Counters of a group which aggregates its children (the hierarchy root, or a group billed as a
//! whole except some of its children) include the children's usage, so the group's own usage has
//! to be computed by subtraction. Root-level kernel counters turn out to be noticeably lower than
//! the sum of their children's (about 10% of CPU time is lost at `/`), which makes a direct
//! subtraction meaningless. Instead, each poll computes the growth of the root and of its
//! children since the previous poll and adds the positive difference to a monotonic accumulator.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;

/// A fixed set of named monotonic counters.
pub trait CounterSet: Default + Clone {
    /// Human-readable counter names, indexed like [`CounterSet::get`].
    const NAMES: &'static [&'static str];

    /// A counter may go backwards by up to this value between two polls without it being
    /// reported as a fault. Such diffs are clamped to zero.
    const TOLERANCE: u64 = 0;

    fn get(&self, index: usize) -> u64;

    fn get_mut(&mut self, index: usize) -> &mut u64;

    fn add(&mut self, other: &Self) {
        for index in 0..Self::NAMES.len() {
            *self.get_mut(index) += other.get(index);
        }
    }
}

/// Raw usage of an aggregation root and the summed usage of its children, as read in one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootUsage<T> {
    pub root: T,
    pub children: T,
}

/// A counter went backwards between two polls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("got a negative {counter} diff: {current} < {previous}")]
pub struct CalculationFault {
    pub counter: &'static str,
    pub current: u64,
    pub previous: u64,
}

fn diff<T: CounterSet>(current: &T, previous: &T) -> Result<T, CalculationFault> {
    let mut diff = T::default();

    for (index, &counter) in T::NAMES.iter().enumerate() {
        let (current, previous) = (current.get(index), previous.get(index));

        *diff.get_mut(index) = match current.checked_sub(previous) {
            Some(value) => value,
            None if previous - current <= T::TOLERANCE => 0,
            None => {
                return Err(CalculationFault {
                    counter,
                    current,
                    previous,
                });
            }
        };
    }

    Ok(diff)
}

/// Adds the net growth of the root between `previous` and `current` to `net`.
///
/// For every counter, `root_diff - children_diff` is added if positive. On fault `net` is left
/// untouched.
pub fn calculate_root_usage<T: CounterSet>(
    net: &mut T,
    current: &RootUsage<T>,
    previous: &RootUsage<T>,
) -> Result<(), CalculationFault> {
    let root = diff(&current.root, &previous.root)?;
    let children = diff(&current.children, &previous.children)?;

    for index in 0..T::NAMES.len() {
        let (root, children) = (root.get(index), children.get(index));
        if root > children {
            *net.get_mut(index) += root - children;
        }
    }

    Ok(())
}

/// Outcome of feeding a fresh snapshot to [`RootStates::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootUpdate<T> {
    /// The root has been seen for the first time: there is nothing to expose yet.
    Seeded,
    /// The net usage has been advanced.
    Accumulated(T),
    /// The previous snapshot had been discarded: the net usage is kept as is.
    Reseeded(T),
    /// The snapshot is inconsistent with the previous one and has been discarded. The retained
    /// net usage is returned along with the fault.
    Faulted(T, CalculationFault),
}

impl<T> RootUpdate<T> {
    /// Net usage to expose, if any.
    pub fn net(self) -> Option<T> {
        match self {
            RootUpdate::Seeded => None,
            RootUpdate::Accumulated(net)
            | RootUpdate::Reseeded(net)
            | RootUpdate::Faulted(net, _) => Some(net),
        }
    }
}

#[derive(Debug)]
struct RootState<T> {
    last: Option<RootUsage<T>>,
    net: T,
    collected: bool,
}

/// Per-root accumulators, swept of roots that haven't been collected during a poll.
#[derive(Debug)]
pub struct RootStates<K, T> {
    states: HashMap<K, RootState<T>>,
}

impl<K, T> Default for RootStates<K, T> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T: CounterSet> RootStates<K, T> {
    /// Clears the collected marks. Must be called at the start of every poll.
    pub fn reset_marks(&mut self) {
        for state in self.states.values_mut() {
            state.collected = false;
        }
    }

    pub fn update(&mut self, key: K, current: RootUsage<T>) -> RootUpdate<T> {
        let state = match self.states.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(RootState {
                    last: Some(current),
                    net: T::default(),
                    collected: true,
                });
                return RootUpdate::Seeded;
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };
        state.collected = true;

        let Some(previous) = state.last.take() else {
            state.last = Some(current);
            return RootUpdate::Reseeded(state.net.clone());
        };

        match calculate_root_usage(&mut state.net, &current, &previous) {
            Ok(()) => {
                state.last = Some(current);
                RootUpdate::Accumulated(state.net.clone())
            }
            Err(fault) => RootUpdate::Faulted(state.net.clone(), fault),
        }
    }

    /// Marks the root collected without advancing it, for polls where its snapshot is
    /// incomplete. Returns the retained net usage, if the root has been seeded.
    ///
    /// The last complete snapshot is kept, so the next update covers both polls.
    pub fn hold(&mut self, key: &K) -> Option<T> {
        let state = self.states.get_mut(key)?;
        state.collected = true;
        Some(state.net.clone())
    }

    /// Handles the roots that haven't been collected since the last [`RootStates::reset_marks`]:
    /// their state is dropped unless `keep` returns `true`.
    pub fn sweep(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.states.retain(|key, state| state.collected || keep(key));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
