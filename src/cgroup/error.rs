use std::path::PathBuf;

use super::classifier;

/// Errors raised while walking the cgroup hierarchy and collecting its counters.
///
/// Absence of a group is not an error (see [`super::Lookup`]); every variant here describes a
/// condition that a concurrent cgroup creation or deletion cannot explain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to list `{path}`: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{path}` is missing")]
    PropertyMissing { path: PathBuf },

    #[error("got an unexpected line in `{path}`: `{line}`")]
    UnexpectedLine { path: PathBuf, line: String },

    #[error("`{path}` is missing, but is expected to exist")]
    ExpectedMissing { path: PathBuf },

    #[error("`{path}` is not mounted")]
    NotMounted { path: PathBuf },

    #[error("failed to classify `{group}` cgroup: {source}")]
    Classification {
        group: String,
        #[source]
        source: classifier::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
