//! Docker-compatible engine API client over a unix socket.
//!
//! Both Docker and Podman serve the same container inspection endpoint, so one client covers
//! both engines; only the socket path differs.

use std::path::PathBuf;
use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::runtime::Handle;

use super::{Container, ContainerID, ContainerResolver, Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    name: String,
    #[serde(default)]
    host_config: Option<HostConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    #[serde(default)]
    auto_remove: bool,
}

impl From<InspectResponse> for Container {
    fn from(response: InspectResponse) -> Self {
        Container {
            name: response.name.trim_start_matches('/').to_owned(),
            temporary: response
                .host_config
                .is_some_and(|host_config| host_config.auto_remove),
        }
    }
}

/// Inspects containers through the engine API socket.
///
/// A new connection is made for every request: lookups are rare thanks to
/// [`super::CachingResolver`].
#[derive(Debug, Clone)]
pub struct EngineResolver {
    socket: PathBuf,
    runtime: Handle,
    timeout: Duration,
}

impl EngineResolver {
    /// Creates a resolver which drives its requests on `runtime`. A lookup, connection
    /// included, fails once `timeout` elapses.
    pub fn new(socket: impl Into<PathBuf>, runtime: Handle, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            runtime,
            timeout,
        }
    }

    pub async fn inspect(&self, id: &ContainerID) -> Result<Container> {
        let stream = tokio::net::UnixStream::connect(&self.socket)
            .await
            .map_err(|source| Error::Connect {
                socket: self.socket.clone(),
                source,
            })?;
        log::trace!("Connected to {}.", self.socket.display());

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::debug!("Container engine connection failed: {err}");
            }
        });

        let request = Request::get(format!("/containers/{id}/json"))
            .header(hyper::header::HOST, "localhost")
            .body(Empty::<Bytes>::new())?;
        let response = sender.send_request(request).await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(Error::NotFound(id.to_string())),
            status => {
                return Err(Error::Status {
                    id: id.to_string(),
                    status: status.as_u16(),
                });
            }
        }

        let body = response.into_body().collect().await?.to_bytes();
        let inspection: InspectResponse = serde_json::from_slice(&body)?;

        Ok(inspection.into())
    }
}

impl ContainerResolver for EngineResolver {
    fn resolve(&self, id: &ContainerID) -> Result<Container> {
        log::debug!("Resolving {id} container via {}...", self.socket.display());
        self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, self.inspect(id))
                .await
                .map_err(|_| Error::Timeout {
                    socket: self.socket.clone(),
                    timeout: self.timeout,
                })?
        })
    }
}
