use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened. The underlying error is kept intact,
/// so callers can still tell a vanished cgroup from a real failure.
///
/// # Example
/// ```no_run
/// # use service_metrics::fsutil;
/// let reader = fsutil::open_file_reader("/sys/fs/cgroup/cpu.stat")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Returns the file name a symbolic link points to, e.g. `sda` for `/dev/block/8:0`.
///
/// # Errors
///
/// Fails if `path` can't be read as a link.
pub fn link_target_name(path: impl AsRef<Path>) -> io::Result<String> {
    let path = path.as_ref();
    let target = std::fs::read_link(path)?;

    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("`{}` points to `{}`", path.display(), target.display()),
            )
        })
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_open_file_reader_success() {
        let tmp = tempfile::NamedTempFile::new().expect("failed to create temp file");
        let path = tmp.path();
        let reader = open_file_reader(path).expect("should open test file");
        let metadata = reader.get_ref().metadata().unwrap();
        assert!(metadata.is_file());
    }

    #[test]
    fn test_open_file_reader_error() {
        let result = open_file_reader("/definitely/does/not/exist");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.path, PathBuf::from("/definitely/does/not/exist"));
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_link_target_name() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let link = dir.path().join("8:0");
        std::os::unix::fs::symlink("../sda", &link).unwrap();

        assert_eq!(link_target_name(&link).unwrap(), "sda");

        let err = link_target_name(dir.path().join("8:16")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
