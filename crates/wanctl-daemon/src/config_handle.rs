//! Owns the configuration file's on-disk path and the live, atomically
//! swappable [`Config`] the rest of the daemon reads. Mirrors the
//! raw-then-validated separation `wanctl_core::config` already defines,
//! adding the one piece that crate deliberately leaves out: actual file I/O
//! and the "new doc validates, or the old one stays live" reload discipline
//! (`wanctl_core::config`'s own module doc calls this out as the daemon's
//! job).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};
use wanctl_core::config::{Config, RawConfig};
use wanctl_core::error::WanctlError;

pub struct ConfigHandle {
    path: PathBuf,
    live: ArcSwap<Config>,
}

impl ConfigHandle {
    /// Load and validate the configuration at `path`. Unlike [`reload`],
    /// a failure here is fatal — there is no previously running
    /// configuration to fall back to yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, WanctlError> {
        let path = path.into();
        let config = Self::read_and_validate(&path)?;
        Ok(Self { path, live: ArcSwap::new(Arc::new(config)) })
    }

    pub fn current(&self) -> Arc<Config> {
        self.live.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reread and revalidate the configuration file, atomically swapping it
    /// in only if the whole document passes validation. On failure the
    /// previously running configuration remains live and the error is
    /// returned to the caller for logging/notification.
    pub fn reload(&self) -> Result<(), WanctlError> {
        match Self::read_and_validate(&self.path) {
            Ok(config) => {
                self.live.store(Arc::new(config));
                info!(path = %self.path.display(), "configuration reloaded");
                Ok(())
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "configuration reload rejected, keeping running configuration");
                Err(err)
            }
        }
    }

    fn read_and_validate(path: &Path) -> Result<Config, WanctlError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| WanctlError::config(format!("failed to read {}: {err}", path.display())))?;
        let raw: RawConfig = toml::from_str(&text)
            .map_err(|err| WanctlError::config(format!("failed to parse {}: {err}", path.display())))?;
        Config::from_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not = [valid").unwrap();
        let err = ConfigHandle::load(file.path()).unwrap_err();
        assert!(matches!(err, WanctlError::Config { .. }));
    }

    #[test]
    fn reload_keeps_previous_config_on_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[main]\npoll_interval_ms = 2500").unwrap();
        let handle = ConfigHandle::load(file.path()).unwrap();
        assert_eq!(handle.current().main.poll_interval_ms, 2500);

        let mut file = std::fs::OpenOptions::new().write(true).truncate(true).open(handle.path()).unwrap();
        writeln!(file, "[main]\npoll_interval_ms = 0").unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.current().main.poll_interval_ms, 2500);
    }
}
