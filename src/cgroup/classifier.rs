//! Mapping of cgroup names to services.
//!
//! systemd places every unit into its own cgroup, so most of the hierarchy maps to services
//! directly: `/system.slice/nginx.service` is the `nginx` service. The rest are the special cases
//! handled here: container runtimes, DBus activations, snap scopes and user sessions.
//!
//! A classification also tells the walker how to account the group. Some groups are billed as a
//! whole with all their descendants ("total collection"), optionally except a few children which
//! represent separately billed work and are classified on their own.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::container::{self, ContainerID, ContainerResolver};
use crate::users::{self, UserResolver};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid user ID `{0}`")]
    InvalidUid(String),
    #[error("unable to resolve {uid} user ID: {source}")]
    User {
        uid: u32,
        #[source]
        source: users::Error,
    },
    #[error("unable to resolve `{id}` container: {source}")]
    Container {
        id: String,
        #[source]
        source: container::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Service identity of a cgroup and the way it has to be accounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub service: String,
    /// The whole subtree is billed to the service, so it mustn't be searched for other services.
    pub total_collection: bool,
    /// Children of a total collection group which are classified independently and whose usage
    /// is subtracted from the group's.
    pub exclude_children: Vec<String>,
}

static SYSTEM_SLICE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/system\.slice(/system-[^/]+\.slice)?$").expect("invalid regex")
});

static USER_SLICE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^user-(\d+)\.slice$").expect("invalid regex"));

static USER_SLICE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^/user\.slice(/user-(\d+)\.slice(/user@\d+\.service",
        r"(/(?:app|session)\.slice(?:/(?:app|session)-[^/]+\.slice)?)?)?)?$",
    ))
    .expect("invalid regex")
});

static PODMAN_SCOPE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^libpod-(conmon-)?([0-9a-f]{64})\.scope$").expect("invalid regex")
});

static PODMAN_HEALTHCHECK_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{64})-[0-9a-f]+\.service$").expect("invalid regex")
});

static BUILDAH_SCOPE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z]+-)?buildah-[^/]+\.scope$").expect("invalid regex")
});

static DBUS_ACTIVATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+-(.+)\.slice$").expect("invalid regex"));

static SNAP_SCOPE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^snap\.[^.]+\.([^.]+)-",
        r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\.scope$",
    ))
    .expect("invalid regex")
});

const MACHINE_SLICE: &str = "/machine.slice";

/// Naming context of a slice: the unit prefix systemd uses for it and the service name prefix.
struct Context {
    slice: &'static str,
    prefix: String,
}

impl Context {
    fn system() -> Self {
        Self {
            slice: "system",
            prefix: String::new(),
        }
    }

    fn user(name: &str) -> Self {
        Self {
            slice: "app",
            prefix: format!("{name}/"),
        }
    }

    fn classify(&self, service: &str) -> Option<Classification> {
        Some(Classification {
            service: format!("{}{service}", self.prefix),
            total_collection: false,
            exclude_children: Vec::new(),
        })
    }

    fn classify_total(&self, service: &str, exclude: &[&str]) -> Option<Classification> {
        Some(Classification {
            service: format!("{}{service}", self.prefix),
            total_collection: true,
            exclude_children: exclude.iter().map(|&name| name.to_owned()).collect(),
        })
    }
}

pub struct Classifier {
    users: Arc<dyn UserResolver>,
    docker: Arc<dyn ContainerResolver>,
    podman: Arc<dyn ContainerResolver>,
}

impl Classifier {
    pub fn new(
        users: Arc<dyn UserResolver>,
        docker: Arc<dyn ContainerResolver>,
        podman: Arc<dyn ContainerResolver>,
    ) -> Self {
        Self {
            users,
            docker,
            podman,
        }
    }

    /// Classifies a group by its hierarchy-relative name.
    ///
    /// Returns `Ok(None)` for groups which don't map to a service on their own, e.g.
    /// intermediate slices.
    pub fn classify_slice(&self, name: &str) -> Result<Option<Classification>> {
        let name = name.replace(r"\x2d", "-");
        let system = Context::system();

        if name == "/" {
            return Ok(system.classify("kernel"));
        }

        let (parent, child) = match name.rsplit_once('/') {
            Some(("", child)) => ("/", child),
            Some((parent, child)) => (parent, child),
            None => return Ok(None),
        };

        if parent == "/" {
            if child == "init.scope" {
                return Ok(system.classify("init"));
            }
            return Ok(classify_supplementary_child(&system, child));
        }

        if parent == MACHINE_SLICE {
            return self.classify_podman_scope(child);
        }

        if SYSTEM_SLICE_PATH.is_match(parent) {
            // /system.slice/*
            // /system.slice/system-*.slice/*
            if let Some(classification) = self.classify_service_slice_child(&system, child)? {
                return Ok(Some(classification));
            }
            return Ok(classify_supplementary_child(&system, child));
        }

        if let Some(captures) = USER_SLICE_PATH.captures(parent) {
            return self.classify_user_slice_child(&captures, child);
        }

        Ok(None)
    }

    fn classify_user_slice_child(
        &self,
        captures: &regex::Captures<'_>,
        child: &str,
    ) -> Result<Option<Classification>> {
        let in_user_slice = captures.get(1).is_some();

        // /user.slice/*
        let uid = if in_user_slice {
            captures.get(2).map_or("", |uid| uid.as_str())
        } else {
            match USER_SLICE_NAME.captures(child).and_then(|c| c.get(1)) {
                Some(uid) => uid.as_str(),
                None => return Ok(None),
            }
        };

        let uid: u32 = uid
            .parse()
            .map_err(|_| Error::InvalidUid(uid.to_owned()))?;
        let user = self
            .users
            .resolve(uid)
            .map_err(|source| Error::User { uid, source })?;

        let systemd_user_service = format!("user@{uid}.service");
        let system = Context::system();

        // /user.slice/user-1000.slice
        //
        // It holds the systemd user manager and a session scope per login.
        if !in_user_slice {
            return Ok(system.classify_total(
                &format!("{user}/sessions"),
                &[systemd_user_service.as_str()],
            ));
        }

        // /user.slice/user-1000.slice/*
        if captures.get(3).is_none() {
            if child != systemd_user_service {
                return Ok(None);
            }

            // The manager itself lives in init.scope and user units in app.slice. The group
            // itself is expected to have no processes, but systemd is placed here for a moment
            // when a session is being started.
            return Ok(Some(Classification {
                service: user,
                total_collection: true,
                exclude_children: vec!["app.slice".to_owned(), "init.scope".to_owned()],
            }));
        }

        let context = Context::user(&user);

        // /user.slice/user-1000.slice/user@1000.service/*
        if captures.get(4).is_none() {
            if child == "init.scope" {
                return Ok(context.classify("init"));
            }
            return Ok(None);
        }

        // /user.slice/user-1000.slice/user@1000.service/{app,session}.slice/*
        // /user.slice/user-1000.slice/user@1000.service/{app,session}.slice/{app,session}-*.slice/*
        if let Some(classification) = self.classify_service_slice_child(&context, child)? {
            return Ok(Some(classification));
        }
        Ok(classify_supplementary_child(&context, child))
    }

    fn classify_service_slice_child(
        &self,
        context: &Context,
        name: &str,
    ) -> Result<Option<Classification>> {
        // Build containers have an unpredictable layout inside
        if BUILDAH_SCOPE_NAME.is_match(name) {
            return Ok(context.classify_total("podman-builder", &[]));
        }

        // DBus creates a unit per service activation:
        // /system.slice/system-dbus-:1.4-org.fedoraproject.SetroubleshootPrivileged.slice
        let dbus_activation_prefix = format!("{}-dbus-:", context.slice);
        if let Some(captures) = name
            .strip_prefix(&dbus_activation_prefix)
            .and_then(|rest| DBUS_ACTIVATION_NAME.captures(rest))
        {
            return Ok(context.classify_total(&format!("dbus:{}", &captures[1]), &[]));
        }

        if let Some(captures) = PODMAN_HEALTHCHECK_NAME.captures(name) {
            let container = self.resolve_podman(&captures[1])?;
            return Ok(context.classify_total(&format!("{container}/healthcheck"), &[]));
        }

        if let Some(service) = name.strip_suffix(".service") {
            // systemd-udevd has a non-standard cgroup layout and Podman payload services run
            // their containers in their own sub-cgroups.
            if service == "systemd-udevd" || is_podman_payload(service) {
                return Ok(context.classify_total(service, &[]));
            }
            return Ok(context.classify(service));
        }

        if let Some(id) = name
            .strip_prefix("docker-")
            .and_then(|rest| rest.strip_suffix(".scope"))
        {
            let container = resolve_container(self.docker.as_ref(), id)?;
            let service = if container.temporary {
                "docker-containers"
            } else {
                container.name.as_str()
            };
            return Ok(context.classify(service));
        }

        let docker_builder_prefix = format!("{}.slice:docker:", context.slice);
        if name
            .strip_prefix(&docker_builder_prefix)
            .is_some_and(|id| !id.is_empty() && !id.contains('.'))
        {
            return Ok(context.classify("docker-builder"));
        }

        if let Some(captures) = SNAP_SCOPE_NAME.captures(name) {
            return Ok(context.classify(&captures[1]));
        }

        Ok(None)
    }

    /// /machine.slice/libpod-<id>.scope
    /// /machine.slice/libpod-conmon-<id>.scope
    fn classify_podman_scope(&self, name: &str) -> Result<Option<Classification>> {
        let Some(captures) = PODMAN_SCOPE_NAME.captures(name) else {
            return Ok(None);
        };

        let mut service = self.resolve_podman(&captures[2])?;
        if captures.get(1).is_some() {
            service.push_str("/supervisor");
        }

        Ok(Context::system().classify_total(&service, &[]))
    }

    /// Returns the service name of a Podman container.
    fn resolve_podman(&self, id: &str) -> Result<String> {
        let container = resolve_container(self.podman.as_ref(), id)?;
        Ok(if container.temporary {
            "podman-containers".to_owned()
        } else {
            container.name
        })
    }
}

fn resolve_container(resolver: &dyn ContainerResolver, id: &str) -> Result<container::Container> {
    let container_error = |source| Error::Container {
        id: id.to_owned(),
        source,
    };
    let id = ContainerID::new(id).map_err(container_error)?;
    resolver.resolve(&id).map_err(container_error)
}

/// Services generated by `podman generate systemd` for containers and pods.
fn is_podman_payload(service: &str) -> bool {
    service.starts_with("container-") || service.starts_with("pod-")
}

fn classify_supplementary_child(context: &Context, name: &str) -> Option<Classification> {
    if name.ends_with(".mount") || name.ends_with(".socket") {
        return context.classify(name);
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::container::tests::{StaticResolver, named, temporary};
    use crate::users::tests::StaticUserResolver;

    const DOCKER_NAMED: &str = "3413aa74fd2ff75f15b32438dce58a63b73bc04c4bd476ca7ab54c12da6a43d4";
    const DOCKER_TEMPORARY: &str =
        "89eae77df5fb5de73ccc3eff21cd7f1c72434fef6ade1328924315ebe7eeadd5";
    const PODMAN_NAMED: &str = "cdbcfe0c9ba72a9908bca0d50f438275178f5e94229ac54e2ea9bd71e70e4134";
    const PODMAN_TEMPORARY: &str =
        "dc9145bfa6eeb9f415dea90c2eaabbac6f35e844cfc71f25cf3c4567773a0d83";

    pub(crate) fn classifier() -> Classifier {
        Classifier::new(
            Arc::new(StaticUserResolver::new(&[(1000, "dmitry")])),
            Arc::new(StaticResolver::new(&[
                (DOCKER_NAMED, named("server-metrics")),
                (DOCKER_TEMPORARY, temporary()),
            ])),
            Arc::new(StaticResolver::new(&[
                (PODMAN_NAMED, named("server-metrics")),
                (PODMAN_TEMPORARY, temporary()),
            ])),
        )
    }

    enum Expected {
        Unclassified,
        Traverse(&'static str),
        Total(&'static str, &'static [&'static str]),
    }

    use Expected::*;

    fn check(classifier: &Classifier, group: &str, expected: Expected) {
        let classification = classifier
            .classify_slice(group)
            .unwrap_or_else(|err| panic!("failed to classify {group}: {err}"));

        let expected = match expected {
            Unclassified => None,
            Traverse(service) => Some(Classification {
                service: service.to_owned(),
                total_collection: false,
                exclude_children: Vec::new(),
            }),
            Total(service, exclude) => Some(Classification {
                service: service.to_owned(),
                total_collection: true,
                exclude_children: exclude.iter().map(|&name| name.to_owned()).collect(),
            }),
        };

        assert_eq!(classification, expected, "{group}");
    }

    #[test]
    fn test_classify_root_children() {
        let classifier = classifier();
        for (group, expected) in [
            ("/", Traverse("kernel")),
            ("/init.scope", Traverse("init")),
            (
                "/sys-fs-fuse-connections.mount",
                Traverse("sys-fs-fuse-connections.mount"),
            ),
            ("/system.slice", Unclassified),
            ("/user.slice", Unclassified),
            ("/machine.slice", Unclassified),
        ] {
            check(&classifier, group, expected);
        }
    }

    #[test]
    fn test_classify_system_services() {
        let classifier = classifier();
        for (group, expected) in [
            ("/system.slice/boot-efi.mount", Traverse("boot-efi.mount")),
            ("/system.slice/nginx.service", Traverse("nginx")),
            (
                "/system.slice/systemd-udevd.service",
                Total("systemd-udevd", &[]),
            ),
            (
                "/system.slice/systemd-journald-dev-log.socket",
                Traverse("systemd-journald-dev-log.socket"),
            ),
            (r"/system.slice/system-openvpn\x2dserver.slice", Unclassified),
            (
                r"/system.slice/system-openvpn\x2dserver.slice/openvpn-server@proxy.service",
                Traverse("openvpn-server@proxy"),
            ),
            (
                "/system.slice/snap.shadowsocks-rust.ssserver-daemon-b5bad6a9-8ff1-4730-9f03-83b9d5998ddd.scope",
                Traverse("ssserver-daemon"),
            ),
            (
                r"/system.slice/system-dbus\x2d:1.4\x2dorg.fedoraproject.SetroubleshootPrivileged.slice",
                Total("dbus:org.fedoraproject.SetroubleshootPrivileged", &[]),
            ),
            ("/system.slice/session-1.scope", Unclassified),
        ] {
            check(&classifier, group, expected);
        }
    }

    #[test]
    fn test_classify_docker() {
        let classifier = classifier();
        for (group, expected) in [
            (
                "/system.slice/system.slice:docker:jvifp9a6b1lxa1kuw8bwfcovf",
                Traverse("docker-builder"),
            ),
            (
                "/system.slice/docker-3413aa74fd2ff75f15b32438dce58a63b73bc04c4bd476ca7ab54c12da6a43d4.scope",
                Traverse("server-metrics"),
            ),
            (
                "/system.slice/docker-89eae77df5fb5de73ccc3eff21cd7f1c72434fef6ade1328924315ebe7eeadd5.scope",
                Traverse("docker-containers"),
            ),
        ] {
            check(&classifier, group, expected);
        }
    }

    #[test]
    fn test_classify_podman() {
        let classifier = classifier();
        for (group, expected) in [
            (
                "/system.slice/crun-buildah-buildah2365838308.scope",
                Total("podman-builder", &[]),
            ),
            (
                "/machine.slice/libpod-cdbcfe0c9ba72a9908bca0d50f438275178f5e94229ac54e2ea9bd71e70e4134.scope",
                Total("server-metrics", &[]),
            ),
            (
                "/machine.slice/libpod-conmon-cdbcfe0c9ba72a9908bca0d50f438275178f5e94229ac54e2ea9bd71e70e4134.scope",
                Total("server-metrics/supervisor", &[]),
            ),
            (
                "/machine.slice/libpod-dc9145bfa6eeb9f415dea90c2eaabbac6f35e844cfc71f25cf3c4567773a0d83.scope",
                Total("podman-containers", &[]),
            ),
            (
                "/machine.slice/libpod-conmon-dc9145bfa6eeb9f415dea90c2eaabbac6f35e844cfc71f25cf3c4567773a0d83.scope",
                Total("podman-containers/supervisor", &[]),
            ),
            (
                "/system.slice/cdbcfe0c9ba72a9908bca0d50f438275178f5e94229ac54e2ea9bd71e70e4134-5e2c1d3a4b6f7e8d.service",
                Total("server-metrics/healthcheck", &[]),
            ),
            (
                "/system.slice/container-server-metrics.service",
                Total("container-server-metrics", &[]),
            ),
            ("/machine.slice/machine-qemu.scope", Unclassified),
        ] {
            check(&classifier, group, expected);
        }
    }

    #[test]
    fn test_classify_user_sessions() {
        let classifier = classifier();
        for (group, expected) in [
            (
                "/user.slice/user-1000.slice",
                Total("dmitry/sessions", &["user@1000.service"]),
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service",
                Total("dmitry", &["app.slice", "init.scope"]),
            ),
            ("/user.slice/user-1000.slice/session-3.scope", Unclassified),
            (
                "/user.slice/user-1000.slice/user@1000.service/init.scope",
                Traverse("dmitry/init"),
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/app.slice",
                Unclassified,
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/app.slice/dbus.socket",
                Traverse("dmitry/dbus.socket"),
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/app.slice/app-vm.slice",
                Unclassified,
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/app.slice/app-vm.slice/vm@linux.service",
                Traverse("dmitry/vm@linux"),
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/app.slice/ssh-agent.service",
                Traverse("dmitry/ssh-agent"),
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/app.slice/snap.go.go-345c278e-7032-498e-8348-5c092e5d3623.scope",
                Traverse("dmitry/go"),
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/app.slice/crun-buildah-buildah1059824916.scope",
                Total("dmitry/podman-builder", &[]),
            ),
            (
                r"/user.slice/user-1000.slice/user@1000.service/app.slice/app-dbus\x2d:1.2\x2dorg.gnome.Shell.slice",
                Total("dmitry/dbus:org.gnome.Shell", &[]),
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/session.slice",
                Unclassified,
            ),
            (
                "/user.slice/user-1000.slice/user@1000.service/session.slice/dbus.service",
                Traverse("dmitry/dbus"),
            ),
        ] {
            check(&classifier, group, expected);
        }
    }

    #[test]
    fn test_classify_unknown_user() {
        let err = classifier()
            .classify_slice("/user.slice/user-1001.slice")
            .unwrap_err();
        assert!(matches!(err, Error::User { uid: 1001, .. }));
    }

    #[test]
    fn test_classify_unknown_container() {
        let err = classifier()
            .classify_slice("/system.slice/docker-0123456789abcdef.scope")
            .unwrap_err();
        assert!(matches!(err, Error::Container { id, .. } if id == "0123456789abcdef"));
    }
}
