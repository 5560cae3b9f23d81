use std::net::SocketAddr;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::cgroup::RaceLimits;

/// Exports per-service resource usage of a systemd host as Prometheus metrics.
#[derive(Debug, Clone, Parser)]
#[command(name = "service-metrics", version)]
pub struct Config {
    /// Poll twice, 5 seconds apart, print the collected metrics and exit.
    #[arg(long)]
    pub devel: bool,

    /// Address to serve `/metrics` on.
    #[arg(long, env = "SERVICE_METRICS_LISTEN", default_value = "127.0.0.1:9101")]
    pub listen: SocketAddr,

    /// Mount point of the unified cgroup hierarchy.
    #[arg(long, env = "SERVICE_METRICS_CGROUP_ROOT", default_value = "/sys/fs/cgroup")]
    pub cgroup_root: PathBuf,

    /// Where the host root filesystem is mounted. Used to resolve device names.
    #[arg(long, env = "ROOTFS_MOUNT_PATH", default_value = "/")]
    pub rootfs: PathBuf,

    #[arg(long, value_name = "PATH", default_value = "/var/run/docker.sock")]
    pub docker_socket: PathBuf,

    #[arg(long, value_name = "PATH", default_value = "/run/podman/podman.sock")]
    pub podman_socket: PathBuf,

    /// Container engine lookup timeout in seconds. Keep it below the scrape timeout.
    #[arg(long, value_name = "SECONDS", default_value = "3", value_parser = parse_seconds)]
    pub engine_timeout: Duration,

    /// Number of times a group may be missing in consecutive polls before it's reported as an
    /// error.
    #[arg(long, default_value_t = 5)]
    pub max_races: usize,

    /// Number of simultaneously tracked races.
    #[arg(long, default_value_t = 10)]
    pub max_active_races: usize,

    /// Scrape timeout in seconds.
    #[arg(long, value_name = "SECONDS", default_value = "10", value_parser = parse_seconds)]
    pub scrape_timeout: Duration,
}

impl Config {
    pub fn race_limits(&self) -> RaceLimits {
        RaceLimits {
            max_races: self.max_races,
            max_active_races: self.max_active_races,
            ..RaceLimits::default()
        }
    }
}

fn parse_seconds(value: &str) -> Result<Duration, ParseIntError> {
    Ok(Duration::from_secs(value.parse()?))
}
