//! Resolution of container ids found in cgroup names to human-readable container names.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;

mod engine;
mod error;

pub use engine::EngineResolver;
pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// Number of containers remembered by [`CachingResolver`].
const CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// A validated container identifier, safe to be embedded into an engine API path.
///
/// # Examples
///
/// ```
/// # use service_metrics::container::ContainerID;
/// let raw_id = "3413aa74fd2ff75f15b32438dce58a63b73bc04c4bd476ca7ab54c12da6a43d4";
/// let container_id = ContainerID::new(raw_id).unwrap();
/// assert_eq!(container_id.as_ref(), raw_id);
///
/// assert!(ContainerID::new("../images").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty, longer than
    /// [`CONTAINER_ID_MAX_LEN`] or contains anything but ASCII alphanumerics.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty()
            || src.len() > CONTAINER_ID_MAX_LEN
            || !src.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the container engine knows about a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    /// The container has been started with auto removal, so its name is most likely generated.
    pub temporary: bool,
}

pub trait ContainerResolver: Send + Sync {
    /// Looks the container up by id.
    ///
    /// Blocks the calling thread, so it must not be called from an async context.
    fn resolve(&self, id: &ContainerID) -> Result<Container>;
}

/// Remembers the most recently resolved containers.
///
/// Only successful resolutions are cached.
pub struct CachingResolver<R> {
    resolver: R,
    cache: Mutex<LruCache<ContainerID, Container>>,
}

impl<R: ContainerResolver> CachingResolver<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
        }
    }
}

impl<R: ContainerResolver> ContainerResolver for CachingResolver<R> {
    fn resolve(&self, id: &ContainerID) -> Result<Container> {
        if let Some(container) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Ok(container.clone());
        }

        let container = self.resolver.resolve(id)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(id.clone(), container.clone());

        Ok(container)
    }
}
