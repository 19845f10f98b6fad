//! Daemon configuration.
//!
//! ```yaml
//! base_dir: /lustre/access_history
//! device: lustre-MDT0000
//! consumer: cl1
//! interval_secs: 3600        # optional, clamped to [10, 8640000]
//! changelog_dir: /var/lib/access-history/changelog   # optional
//! tick_ms: 1000              # optional
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::layout::validate_component;
use crate::window::{clamp_interval, DEFAULT_INTERVAL};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/access-historyd.yaml";
pub const DEFAULT_TICK: Duration = Duration::from_millis(1000);
pub const DEFAULT_CHANGELOG_SUBDIR: &str = "changelog";
/// Longest accepted device or consumer name.
pub const MAX_NAME_LEN: usize = 64;

/// Settings as written in the file; every key optional so that command-line
/// overrides can fill gaps before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub base_dir: Option<PathBuf>,
    pub device: Option<String>,
    pub consumer: Option<String>,
    pub interval_secs: Option<u64>,
    pub changelog_dir: Option<PathBuf>,
    pub tick_ms: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("failed to read {}: {err}", path.display())))?;
        Self::from_yaml(&text)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }

    /// Values set in `overrides` replace ours.
    pub fn merge(self, overrides: ConfigFile) -> ConfigFile {
        ConfigFile {
            base_dir: overrides.base_dir.or(self.base_dir),
            device: overrides.device.or(self.device),
            consumer: overrides.consumer.or(self.consumer),
            interval_secs: overrides.interval_secs.or(self.interval_secs),
            changelog_dir: overrides.changelog_dir.or(self.changelog_dir),
            tick_ms: overrides.tick_ms.or(self.tick_ms),
        }
    }

    /// Validates and resolves relative paths against `cwd`.
    pub fn resolve(self, cwd: &Path) -> Result<Config> {
        let base_dir = self
            .base_dir
            .ok_or_else(|| Error::Config("base_dir is not configured".into()))?;
        if base_dir.as_os_str().is_empty() {
            return Err(Error::Config("base_dir is empty".into()));
        }
        let base_dir = canonical_dir(cwd, &base_dir)?;

        let device = required_name("device", self.device)?;
        let consumer = required_name("consumer", self.consumer)?;

        let requested = self
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INTERVAL);
        let interval = clamp_interval(requested);
        if interval != requested {
            warn!(
                "interval {}s is out of range, using {}s",
                requested.as_secs(),
                interval.as_secs()
            );
        }

        let changelog_dir = match self.changelog_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => cwd.join(dir),
            None => base_dir.join(DEFAULT_CHANGELOG_SUBDIR),
        };

        let tick = match self.tick_ms {
            Some(0) => return Err(Error::Config("tick_ms must be positive".into())),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_TICK,
        };

        Ok(Config {
            base_dir,
            device,
            consumer,
            interval,
            changelog_dir,
            tick,
        })
    }
}

/// Validated configuration; immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Canonical root of the history tree; exists at startup.
    pub base_dir: PathBuf,
    /// Device whose change log is consumed.
    pub device: String,
    /// Consumer identity records are cleared as.
    pub consumer: String,
    /// Window length, already clamped.
    pub interval: Duration,
    /// Directory of the file-backed change log.
    pub changelog_dir: PathBuf,
    /// Period of the supervisor and reclaim loops.
    pub tick: Duration,
}

fn canonical_dir(cwd: &Path, dir: &Path) -> Result<PathBuf> {
    let joined = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        cwd.join(dir)
    };
    let resolved = fs::canonicalize(&joined).map_err(|err| {
        Error::Config(format!("failed to resolve base_dir {}: {err}", joined.display()))
    })?;
    if !resolved.is_dir() {
        return Err(Error::Config(format!(
            "base_dir {} is not a directory",
            resolved.display()
        )));
    }
    Ok(resolved)
}

fn required_name(field: &'static str, value: Option<String>) -> Result<String> {
    let value = value.ok_or_else(|| Error::Config(format!("{field} is not configured")))?;
    validate_component(field, &value)?;
    if value.len() > MAX_NAME_LEN {
        return Err(Error::Config(format!(
            "{field} is longer than {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_full_file() -> Result<()> {
        let dir = tempdir()?;
        let yaml = format!(
            "base_dir: {}\ndevice: lustre-MDT0000\nconsumer: cl1\ninterval_secs: 600\ntick_ms: 250\n",
            dir.path().display()
        );
        let config = ConfigFile::from_yaml(&yaml)?.resolve(Path::new("/"))?;
        assert_eq!(config.base_dir, fs::canonicalize(dir.path())?);
        assert_eq!(config.device, "lustre-MDT0000");
        assert_eq!(config.consumer, "cl1");
        assert_eq!(config.interval, Duration::from_secs(600));
        assert_eq!(config.tick, Duration::from_millis(250));
        assert_eq!(config.changelog_dir, config.base_dir.join("changelog"));
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ConfigFile::from_yaml("base_dir: /tmp\nfsname: lustre\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_required_keys() -> Result<()> {
        let dir = tempdir()?;
        let only_dir = ConfigFile {
            base_dir: Some(dir.path().to_path_buf()),
            ..ConfigFile::default()
        };
        let err = only_dir.clone().resolve(Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("device"));

        let err = ConfigFile::default().resolve(Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("base_dir"));
        Ok(())
    }

    #[test]
    fn relative_base_dir_resolves_against_cwd() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("history"))?;
        let file = ConfigFile {
            base_dir: Some(PathBuf::from("history")),
            device: Some("mdt0".into()),
            consumer: Some("cl1".into()),
            ..ConfigFile::default()
        };
        let config = file.resolve(dir.path())?;
        assert_eq!(config.base_dir, fs::canonicalize(dir.path().join("history"))?);
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        Ok(())
    }

    #[test]
    fn interval_is_clamped_and_names_are_bounded() -> Result<()> {
        let dir = tempdir()?;
        let file = ConfigFile {
            base_dir: Some(dir.path().to_path_buf()),
            device: Some("mdt0".into()),
            consumer: Some("cl1".into()),
            interval_secs: Some(1),
            ..ConfigFile::default()
        };
        assert_eq!(file.clone().resolve(Path::new("/"))?.interval, Duration::from_secs(10));

        let long = ConfigFile {
            consumer: Some("c".repeat(MAX_NAME_LEN + 1)),
            ..file
        };
        assert!(long.resolve(Path::new("/")).is_err());
        Ok(())
    }

    #[test]
    fn overrides_win() {
        let file = ConfigFile {
            device: Some("from-file".into()),
            consumer: Some("cl1".into()),
            ..ConfigFile::default()
        };
        let merged = file.merge(ConfigFile {
            device: Some("from-cli".into()),
            ..ConfigFile::default()
        });
        assert_eq!(merged.device.as_deref(), Some("from-cli"));
        assert_eq!(merged.consumer.as_deref(), Some("cl1"));
    }

    #[test]
    fn missing_base_dir_is_config_error() {
        let file = ConfigFile {
            base_dir: Some(PathBuf::from("/nonexistent/access-history")),
            device: Some("mdt0".into()),
            consumer: Some("cl1".into()),
            ..ConfigFile::default()
        };
        assert!(matches!(file.resolve(Path::new("/")), Err(Error::Config(_))));
    }
}
