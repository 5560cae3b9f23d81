use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to `{socket}`: {source}")]
    Connect {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid container id: {0}")]
    InvalidContainerID(String),
    #[error("container engine at `{socket}` hasn't answered within {timeout:?}")]
    Timeout { socket: PathBuf, timeout: Duration },
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("container engine responded with {status} to `{id}` container inspection")]
    Status { id: String, status: u16 },
    #[error("failed to build a request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("container engine request failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("failed to decode container engine response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
