//! Service Metrics: exports the resource usage of the services running on a systemd host.
//!
//! The cgroup v2 hierarchy is walked on every scrape. Groups are attributed to services (system
//! units, user sessions, Docker and Podman containers) and their CPU, memory and block IO usage
//! is exposed in the Prometheus text format.
pub mod api;
pub mod cgroup;
pub mod config;
pub mod container;
pub mod error;
pub mod fsutil;
pub mod metrics;
pub mod users;

use std::sync::Arc;
use std::time::Duration;

use api::{APIServer, Scraper};
use cgroup::collector::default_collectors;
use cgroup::{Classifier, Group, Monitor};
use config::Config;
use container::{CachingResolver, ContainerResolver, EngineResolver};
use error::ResultOkLogExt;
use metrics::Exporter;
use users::{SystemUserResolver, UserResolver};

const DEVEL_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Runs the exporter.
///
/// Serves `/metrics` on the configured address or, in devel mode, prints the metrics of a single
/// poll and exits.
///
/// # Errors
///
/// Fails if the server can't be started or, in devel mode, if the hierarchy can't be polled.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Handle::current();

    let users: Arc<dyn UserResolver> = Arc::new(SystemUserResolver::new());
    let docker: Arc<dyn ContainerResolver> = Arc::new(CachingResolver::new(EngineResolver::new(
        &config.docker_socket,
        runtime.clone(),
        config.engine_timeout,
    )));
    let podman: Arc<dyn ContainerResolver> = Arc::new(CachingResolver::new(EngineResolver::new(
        &config.podman_socket,
        runtime,
        config.engine_timeout,
    )));

    log::debug!(
        "Observing {} with rootfs at {}.",
        config.cgroup_root.display(),
        config.rootfs.display()
    );
    let monitor = Monitor::new(
        Group::root(&config.cgroup_root),
        Classifier::new(users, docker, podman),
        config.race_limits(),
        default_collectors(&config.rootfs),
    );
    let scraper = Arc::new(Scraper::new(monitor, Exporter::new()?));

    if config.devel {
        return devel(scraper).await;
    }

    APIServer::new(scraper, config.scrape_timeout)
        .listen(config.listen)
        .await?;
    Ok(())
}

/// Polls twice, so aggregating groups have their usage calculated, and prints the result.
async fn devel(scraper: Arc<Scraper>) -> Result<(), Box<dyn std::error::Error>> {
    let first = Arc::clone(&scraper);
    tokio::task::spawn_blocking(move || first.scrape())
        .await?
        .ok_log("Initial poll failed");

    log::debug!("Sleeping for {DEVEL_POLL_INTERVAL:?}...");
    tokio::time::sleep(DEVEL_POLL_INTERVAL).await;

    let metrics = tokio::task::spawn_blocking(move || scraper.scrape()).await??;
    print!("{metrics}");
    Ok(())
}
