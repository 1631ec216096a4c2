use crate::command::Command;
use crate::drivers::DriverKind;
use edgesql_script::{DEFAULT_SEPARATOR, DEFAULT_TERMINATOR, Splitter};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Environment variable naming the profile to use.
pub const PROFILE_ENV: &str = "EDGESQL_PROFILE";
/// Set on CI; selects [`CI_PROFILE`].
pub const CI_ENV: &str = "TRAVIS";
pub const CI_PROFILE: &str = "travis";
pub const FALLBACK_PROFILE: &str = "mysql";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connect_timeout: Duration,
    pub batch_separator: String,
    pub batch_terminator: String,
    pub trim_separator_indent: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            batch_separator: DEFAULT_SEPARATOR.to_string(),
            batch_terminator: DEFAULT_TERMINATOR.to_string(),
            trim_separator_indent: false,
        }
    }
}

impl EngineConfig {
    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn set_batch_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.batch_separator = separator.into();
        self
    }

    pub fn set_batch_terminator<S: Into<String>>(mut self, terminator: S) -> Self {
        self.batch_terminator = terminator.into();
        self
    }

    pub fn set_trim_separator_indent(mut self, trim: bool) -> Self {
        self.trim_separator_indent = trim;
        self
    }

    /// Splitter for `script` using these batch options.
    pub fn splitter<'a>(&self, script: &'a str) -> Splitter<'a> {
        Splitter::new(script)
            .separator(self.batch_separator.as_str())
            .terminator(self.batch_terminator.as_str())
            .trim_leading(self.trim_separator_indent)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("profile `{0}` not found")]
    ProfileNotFound(String),
}

/// A named connection target.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Profile {
    pub driver: DriverKind,
    pub connection_string: String,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

impl Profile {
    pub fn open_command(&self) -> Result<Command, ConfigError> {
        let mut command = Command::open(self.driver, self.connection_string.clone());
        if let Some(secs) = self.timeout_secs {
            let limit = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("timeout_secs must be positive, got {secs}"))
                })?;
            command = command.with_timeout(limit);
        }
        Ok(command)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EngineSection {
    connect_timeout_secs: Option<f64>,
    batch_separator: Option<String>,
    batch_terminator: Option<String>,
    trim_separator_indent: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default)]
    engine: EngineSection,
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

/// Connection profiles plus engine overrides, read from a TOML file:
///
/// ```toml
/// default_profile = "local"
///
/// [engine]
/// connect_timeout_secs = 5
///
/// [profiles.local]
/// driver = "sqlite"
/// connection_string = "sqlite:data/test.db?mode=rwc"
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    pub engine: EngineConfig,
    pub default_profile: Option<String>,
    profiles: BTreeMap<String, Profile>,
}

impl ProfileSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ProfileFile = toml::from_str(text)?;

        let mut engine = EngineConfig::default();
        if let Some(secs) = file.engine.connect_timeout_secs {
            engine.connect_timeout = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .ok_or_else(|| {
                    let reason = format!("connect_timeout_secs must be positive, got {secs}");
                    ConfigError::Invalid(reason)
                })?;
        }
        if let Some(separator) = file.engine.batch_separator {
            if separator.trim().is_empty() {
                return Err(ConfigError::Invalid("batch_separator must not be empty".into()));
            }
            engine.batch_separator = separator;
        }
        if let Some(terminator) = file.engine.batch_terminator {
            engine.batch_terminator = terminator;
        }
        if let Some(trim) = file.engine.trim_separator_indent {
            engine.trim_separator_indent = trim;
        }

        let profiles = file
            .profiles
            .into_iter()
            .map(|(name, profile)| (name.to_ascii_lowercase(), profile))
            .collect();

        Ok(Self {
            engine,
            default_profile: file.default_profile,
            profiles,
        })
    }

    /// Profile by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, profile: Profile) {
        self.profiles.insert(name.to_ascii_lowercase(), profile);
    }

    /// Name of the profile [`select`](Self::select) would pick.
    pub fn selected_name<F>(&self, env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = env(PROFILE_ENV).filter(|n| !n.trim().is_empty()) {
            return name;
        }
        if env(CI_ENV).is_some() {
            return CI_PROFILE.to_string();
        }
        self.default_profile
            .clone()
            .unwrap_or_else(|| FALLBACK_PROFILE.to_string())
    }

    pub fn select(&self) -> Result<&Profile, ConfigError> {
        self.select_with(|key| std::env::var(key).ok())
    }

    pub fn select_with<F>(&self, env: F) -> Result<&Profile, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = self.selected_name(env);
        self.get(&name).ok_or(ConfigError::ProfileNotFound(name))
    }
}
