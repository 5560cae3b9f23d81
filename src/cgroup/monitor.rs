use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::collector::{Collection, ResourceCollector};
use super::group::found;
use super::{Classifier, Error, Group, Lookup, RaceController, RaceLimits, Result};
use crate::metrics::Sample;

struct State {
    races: RaceController,
    collectors: Vec<Box<dyn ResourceCollector>>,
}

/// Attributes the usage of the cgroup hierarchy to services.
///
/// Every [`Monitor::poll`] walks the whole hierarchy. Collectors keep state between polls, so
/// polls are serialized.
pub struct Monitor {
    root: Group,
    classifier: Classifier,
    state: Mutex<State>,
}

impl Monitor {
    pub fn new(
        root: Group,
        classifier: Classifier,
        limits: RaceLimits,
        collectors: Vec<Box<dyn ResourceCollector>>,
    ) -> Self {
        Self {
            root,
            classifier,
            state: Mutex::new(State {
                races: RaceController::new(limits),
                collectors,
            }),
        }
    }

    /// Walks the hierarchy and returns the samples of all the services found.
    ///
    /// # Errors
    ///
    /// Fails only if the root group can't be observed. Failures within a subtree are logged and
    /// drop that subtree's samples.
    pub fn poll(&self) -> Result<Vec<Sample>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let State { races, collectors } = &mut *state;

        for collector in collectors.iter_mut() {
            collector.pre();
        }
        races.on_poll_started();

        let mut walk = Walk {
            classifier: &self.classifier,
            races: &mut *races,
            collectors: collectors.as_mut_slice(),
            services: HashMap::new(),
            samples: Vec::new(),
        };

        if !walk.observe(&self.root)?.is_found() {
            return Err(Error::NotMounted {
                path: self.root.path(),
            });
        }
        let samples = walk.samples;

        for collector in collectors.iter_mut() {
            collector.post();
        }
        races.on_poll_finished();

        Ok(samples)
    }
}

/// State of a single poll.
struct Walk<'a> {
    classifier: &'a Classifier,
    races: &'a mut RaceController,
    collectors: &'a mut [Box<dyn ResourceCollector>],
    /// Service name to the group it has been attributed to.
    services: HashMap<String, String>,
    samples: Vec<Sample>,
}

impl Walk<'_> {
    fn observe(&mut self, group: &Group) -> Result<Lookup<()>> {
        let classification = match self.classifier.classify_slice(group.name()) {
            Ok(classification) => classification,
            Err(source) => {
                let err = Error::Classification {
                    group: group.name().to_owned(),
                    source,
                };
                log::error!("{err}.");
                return Ok(Lookup::Found(()));
            }
        };

        let needs_collection = match &classification {
            Some(classification) if classification.total_collection => {
                for name in &classification.exclude_children {
                    self.observe_child(&group.child(name));
                }
                true
            }
            _ if group.is_root() => {
                if !self.observe_children(group)?.is_found() {
                    return Ok(Lookup::Missing);
                }
                true
            }
            _ => {
                let has_processes = found!(group.has_processes());
                // A group with processes is the unit of collection: its subgroups are billed to it
                if !has_processes {
                    found!(self.observe_children(group));
                }
                has_processes
            }
        };

        if !needs_collection {
            return Ok(Lookup::Found(()));
        }

        let Some(classification) = classification else {
            log::error!("Unable to classify `{group}` cgroup.");
            return Ok(Lookup::Found(()));
        };

        let service = classification.service;
        if let Some(other) = self.services.get(&service) {
            log::error!("Both `{other}` and `{group}` resolve to `{service}` service.");
            return Ok(Lookup::Found(()));
        }
        self.services
            .insert(service.clone(), group.name().to_owned());

        let checkpoint = self.samples.len();
        match self.collect(&service, group, &classification.exclude_children) {
            Ok(Lookup::Found(())) => Ok(Lookup::Found(())),
            Ok(Lookup::Missing) => {
                self.samples.truncate(checkpoint);
                Ok(Lookup::Missing)
            }
            Err(err) if group.is_root() => {
                self.samples.truncate(checkpoint);
                Err(err)
            }
            Err(err) => {
                self.samples.truncate(checkpoint);
                log::error!("Failed to collect metrics for `{group}` cgroup: {err}.");
                Ok(Lookup::Found(()))
            }
        }
    }

    fn observe_children(&mut self, group: &Group) -> Result<Lookup<()>> {
        for child in &found!(group.children()) {
            self.observe_child(child);
        }

        Ok(Lookup::Found(()))
    }

    /// Observes an independent subtree: its failure doesn't affect the rest of the hierarchy.
    fn observe_child(&mut self, child: &Group) {
        match self.observe(child) {
            Ok(Lookup::Found(())) => {}
            Ok(Lookup::Missing) => {
                log::debug!("`{child}` has been deleted during discovering.");
            }
            Err(err) => log::error!("Failed to observe `{child}` cgroup: {err}."),
        }
    }

    fn collect(&mut self, service: &str, group: &Group, exclude: &[String]) -> Result<Lookup<()>> {
        if log::log_enabled!(log::Level::Debug) {
            if exclude.is_empty() {
                log::debug!("Collecting {group} as {service}:");
            } else {
                log::debug!(
                    "Collecting {group} (excluding {}) as {service}:",
                    exclude.join(",")
                );
            }
        }

        let mut ctx = Collection {
            races: &mut *self.races,
            samples: &mut self.samples,
        };

        for collector in self.collectors.iter_mut() {
            if !collector.collect(&mut ctx, service, group, exclude)?.is_found() {
                return Ok(Lookup::Missing);
            }
        }

        Ok(Lookup::Found(()))
    }
}
