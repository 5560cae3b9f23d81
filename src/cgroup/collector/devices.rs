use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use crate::fsutil;

/// Resolves `major:minor` device ids to device names via the `/dev/block` and `/dev/char` links.
///
/// Names are cached until the next [`DeviceResolver::reset`], i.e. for one poll.
#[derive(Debug)]
pub struct DeviceResolver {
    rootfs: PathBuf,
    names: HashMap<String, String>,
}

impl DeviceResolver {
    /// `rootfs` is where the host root filesystem is mounted (`/` unless running in a container).
    pub fn new(rootfs: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
            names: HashMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.names.clear();
    }

    /// Returns the device name, or the id itself if it can't be resolved.
    pub fn name(&mut self, device: &str) -> String {
        if let Some(name) = self.names.get(device) {
            return name.clone();
        }

        let name = match self.resolve(device) {
            Ok(name) => name,
            Err(err) => {
                log::error!("Failed to resolve `{device}` device: {err}.");
                device.to_owned()
            }
        };

        self.names.insert(device.to_owned(), name.clone());
        name
    }

    fn resolve(&self, device: &str) -> io::Result<String> {
        let dev = self.rootfs.join("dev");

        match fsutil::link_target_name(dev.join("block").join(device)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fsutil::link_target_name(dev.join("char").join(device))
            }
            result => result,
        }
    }
}
