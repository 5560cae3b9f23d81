//! A thin, racy handle onto one node of the cgroup v2 hierarchy.
//!
//! Every cgroup may be created or destroyed by the kernel (or systemd) at any moment while the
//! hierarchy is being walked, so all operations report absence as [`Lookup::Missing`] instead of
//! an error. Errors are reserved for conditions that cannot be explained by such a race, e.g. a
//! group that exists but lacks one of its control files.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Error, Result};
use crate::fsutil::{self, FileOpenError};

/// `EOPNOTSUPP`: returned when reading `cgroup.procs` of a threaded cgroup.
const EOPNOTSUPP: i32 = 95;
/// `ENODEV`: returned when a control file vanishes while it is being read.
const ENODEV: i32 = 19;

/// Outcome of a lookup in the live hierarchy.
///
/// Combined with [`Result`] this gives three states for every traversal step: the value has been
/// found, the target has disappeared (a benign race), or reading failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Missing,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::Missing => Lookup::Missing,
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Missing => None,
        }
    }
}

/// Unwraps a `Result<Lookup<T>>`, returning early with `Ok(Lookup::Missing)` on absence.
macro_rules! found {
    ($lookup:expr) => {
        match $lookup? {
            $crate::cgroup::Lookup::Found(value) => value,
            $crate::cgroup::Lookup::Missing => return Ok($crate::cgroup::Lookup::Missing),
        }
    };
}
pub(crate) use found;

/// A cgroup identified by its hierarchy-relative name (`/` is the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    mount: Arc<Path>,
    name: String,
}

impl Group {
    /// Returns the root group of the hierarchy mounted at `mount`.
    pub fn root(mount: impl Into<PathBuf>) -> Self {
        Self {
            mount: Arc::from(mount.into()),
            name: "/".to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.name == "/"
    }

    /// Filesystem path of the group.
    pub fn path(&self) -> PathBuf {
        self.mount.join(self.name.trim_start_matches('/'))
    }

    pub fn child(&self, name: &str) -> Group {
        let name = if self.is_root() {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.name)
        };

        Group {
            mount: Arc::clone(&self.mount),
            name,
        }
    }

    pub fn exists(&self) -> Result<bool> {
        let path = self.path();
        match std::fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(err) if is_gone(&err) => Ok(false),
            Err(source) => Err(Error::List { path, source }),
        }
    }

    /// Lists child groups.
    pub fn children(&self) -> Result<Lookup<Vec<Group>>> {
        let mut children = Vec::new();

        for (name, is_dir) in found!(self.list()) {
            if is_dir {
                children.push(self.child(&name));
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Lookup::Found(children))
    }

    /// Returns whether any process is currently attached to this group.
    pub fn has_processes(&self) -> Result<Lookup<bool>> {
        let path = self.path().join("cgroup.procs");

        let buf = match fsutil::open_file_reader(&path) {
            Ok(buf) => buf,
            Err(err) if err.source.raw_os_error() == Some(EOPNOTSUPP) => {
                return Ok(Lookup::Found(false));
            }
            Err(err) if is_gone(&err.source) => return self.property_missing(&path, "cgroup.procs"),
            Err(FileOpenError { path, source }) => return Err(Error::Read { path, source }),
        };

        let mut has_processes = false;
        for line in buf.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) if err.raw_os_error() == Some(EOPNOTSUPP) => break,
                Err(err) if is_gone(&err) => return Ok(Lookup::Missing),
                Err(source) => return Err(Error::Read { path, source }),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.parse::<u32>().is_err() {
                return Err(Error::UnexpectedLine {
                    path,
                    line: line.to_owned(),
                });
            }
            has_processes = true;
        }

        Ok(Lookup::Found(has_processes))
    }

    /// Opens the named control file and hands it to `reader`.
    ///
    /// A missing file is only reported as [`Lookup::Missing`] if the whole group is gone or the
    /// file shows up in the directory listing (it has been recreated concurrently). A group that
    /// exists without the file is misconfigured and yields [`Error::PropertyMissing`].
    pub fn read_property<T>(
        &self,
        name: &str,
        reader: impl FnOnce(&mut BufReader<File>) -> io::Result<T>,
    ) -> Result<Lookup<T>> {
        let path = self.path().join(name);

        let mut buf = match fsutil::open_file_reader(&path) {
            Ok(buf) => buf,
            Err(err) if is_gone(&err.source) => return self.property_missing(&path, name),
            Err(FileOpenError { path, source }) => return Err(Error::Read { path, source }),
        };

        match reader(&mut buf) {
            Ok(value) => Ok(Lookup::Found(value)),
            Err(err) if is_gone(&err) => Ok(Lookup::Missing),
            Err(source) => Err(Error::Read { path, source }),
        }
    }

    fn property_missing<T>(&self, path: &Path, name: &str) -> Result<Lookup<T>> {
        let files = found!(self.list());

        if files.iter().any(|(file, is_dir)| !is_dir && file == name) {
            return Ok(Lookup::Missing);
        }

        Err(Error::PropertyMissing {
            path: path.to_path_buf(),
        })
    }

    fn list(&self) -> Result<Lookup<Vec<(String, bool)>>> {
        let path = self.path();

        let entries = match std::fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(err) if is_gone(&err) => return Ok(Lookup::Missing),
            Err(source) => return Err(Error::List { path, source }),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_gone(&err) => return Ok(Lookup::Missing),
                Err(source) => return Err(Error::List { path, source }),
            };

            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                // The entry has been deleted after being listed
                Err(err) if is_gone(&err) => continue,
                Err(source) => return Err(Error::List { path, source }),
            };

            files.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }

        Ok(Lookup::Found(files))
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Returns whether the error means that the file (or its group) no longer exists.
pub(crate) fn is_gone(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(ENODEV)
}
