//! Resolution of user ids found in cgroup names (`user-1000.slice`) to user names.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

const CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(10).unwrap();
const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown user ID: {0}")]
    UnknownUser(u32),
    #[error("`{0}` user has a non UTF-8 name")]
    InvalidName(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait UserResolver: Send + Sync {
    /// Returns the name of the user. Unknown users are an error.
    fn resolve(&self, uid: u32) -> Result<String>;
}

/// Resolves users through the system user database.
///
/// Names are cached for a minute: users may be renamed, but cgroups are classified on every poll.
pub struct SystemUserResolver {
    cache: Mutex<LruCache<u32, (String, Instant)>>,
}

impl SystemUserResolver {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
        }
    }

    fn lookup(uid: u32) -> Result<String> {
        let user = uzers::get_user_by_uid(uid).ok_or(Error::UnknownUser(uid))?;
        user.name()
            .to_str()
            .map(str::to_owned)
            .ok_or(Error::InvalidName(uid))
    }
}

impl Default for SystemUserResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl UserResolver for SystemUserResolver {
    fn resolve(&self, uid: u32) -> Result<String> {
        let now = Instant::now();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((name, resolved_at)) = cache.get(&uid) {
            if now.duration_since(*resolved_at) < CACHE_TTL {
                return Ok(name.clone());
            }
        }
        cache.pop(&uid);

        let name = Self::lookup(uid)?;
        cache.put(uid, (name.clone(), now));

        Ok(name)
    }
}
