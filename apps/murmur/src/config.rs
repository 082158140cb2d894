use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::client::{DisplaySettings, SessionSettings};

/// Client configuration: file values first, then `MURMUR_*` overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Entities moved per PageUp/PageDown.
    pub scroll_page: usize,
    /// Screens of history kept loaded beyond the viewport.
    pub lookahead_screens: usize,
    /// Screens requested per backfill page.
    pub backfill_screens: usize,
    /// Events requested right after joining a room.
    pub initial_backfill: usize,
    /// Rows reserved for the composer.
    pub input_height: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scroll_page: 10,
            lookahead_screens: 5,
            backfill_screens: 5,
            initial_backfill: 500,
            input_height: 3,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unable to determine home directory")]
    NoHome,
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
}

impl Config {
    /// `~/.murmur/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let base = BaseDirs::new().ok_or(ConfigError::NoHome)?;
        Ok(base.home_dir().join(".murmur").join("config.toml"))
    }

    /// Loads `path` (or the default location), then applies the environment.
    /// A missing default file is not an error; a missing explicit one is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment-only configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        override_from_env("MURMUR_SCROLL_PAGE", &mut self.scroll_page)?;
        override_from_env("MURMUR_LOOKAHEAD_SCREENS", &mut self.lookahead_screens)?;
        override_from_env("MURMUR_BACKFILL_SCREENS", &mut self.backfill_screens)?;
        override_from_env("MURMUR_INITIAL_BACKFILL", &mut self.initial_backfill)?;
        override_from_env("MURMUR_INPUT_HEIGHT", &mut self.input_height)?;
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            display: DisplaySettings {
                lookahead_screens: self.lookahead_screens,
                backfill_screens: self.backfill_screens,
            },
            initial_backfill: self.initial_backfill,
        }
    }
}

fn override_from_env<T: FromStr>(var: &'static str, slot: &mut T) -> Result<(), ConfigError> {
    let Ok(value) = env::var(var) else {
        return Ok(());
    };
    *slot = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{LazyLock, Mutex};

    // Environment variable tests must not run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "MURMUR_SCROLL_PAGE",
        "MURMUR_LOOKAHEAD_SCREENS",
        "MURMUR_BACKFILL_SCREENS",
        "MURMUR_INITIAL_BACKFILL",
        "MURMUR_INPUT_HEIGHT",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test_timeout::timeout]
    fn defaults_without_environment() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session_settings(), SessionSettings::default());
    }

    #[test_timeout::timeout]
    fn file_values_are_overridden_by_environment() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scroll_page = 4\ninput_height = 2").unwrap();

        unsafe {
            env::set_var("MURMUR_INPUT_HEIGHT", "5");
        }
        let config = Config::load(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.scroll_page, 4);
        assert_eq!(config.input_height, 5);
        assert_eq!(config.backfill_screens, 5);
    }

    #[test_timeout::timeout]
    fn rejects_bad_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("MURMUR_SCROLL_PAGE", "lots");
        }
        let err = Config::from_env().unwrap_err();
        clear_env();
        assert!(matches!(err, ConfigError::Env { var: "MURMUR_SCROLL_PAGE", .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scroll_page = \"ten\"").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test_timeout::timeout]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }
}
