use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory holding the kernel's power supply class, relative to the root.
pub const POWER_SUPPLY_DIR: &str = "sys/class/power_supply";

/// `errno` some drivers return for attributes that exist but have no value.
const ENODEV: i32 = 19;

/// Relative path of one attribute of a power supply.
pub fn supply_attr(supply: &str, attr: &str) -> String {
    format!("{}/{}/{}", POWER_SUPPLY_DIR, supply, attr)
}

/// Root under which sysfs paths are resolved.
///
/// `/` on a real machine; tests point it at a temporary tree.
#[derive(Debug, Clone)]
pub struct SysfsRoot {
    root: PathBuf,
}

impl Default for SysfsRoot {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SysfsRoot {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn exists(&self, relative: impl AsRef<Path>) -> bool {
        self.path(relative).exists()
    }

    /// Read a trimmed attribute. Power supply drivers expose attributes
    /// unevenly, so missing, forbidden and valueless ones are `Ok(None)`.
    pub fn read_optional(&self, relative: impl AsRef<Path>) -> Result<Option<String>> {
        let path = self.path(relative);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw.trim().to_string())),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                Ok(None)
            }
            Err(e) if e.raw_os_error() == Some(ENODEV) => Ok(None),
            Err(source) => Err(Error::SysfsRead { path, source }),
        }
    }

    /// Read a numeric attribute. Any failure, including a malformed value,
    /// is `None`.
    pub fn read_number<T: std::str::FromStr>(&self, relative: impl AsRef<Path>) -> Option<T> {
        self.read_optional(relative)
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
    }

    /// Entry names of a directory, sorted so lookups are deterministic.
    pub fn list_dir(&self, relative: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = self.path(relative);
        let read_err = |source| Error::SysfsRead {
            path: path.clone(),
            source,
        };

        let mut names = std::fs::read_dir(&path)
            .map_err(read_err)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(read_err)?;
        names.sort();
        Ok(names)
    }
}
