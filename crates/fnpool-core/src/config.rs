//! Pool and backend configuration.
//!
//! Durations are written in milliseconds in config files:
//!
//! ```json
//! {
//!   "pool": { "max_invoker_count": 4, "max_wait_ms": 250, "max_runnable_time_ms": 5000 },
//!   "backend": { "program": "my-function", "args": ["--serve"] }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of workers kept in a pool.
pub const DEFAULT_MAX_INVOKER_COUNT: usize = 4;

/// Default time a caller waits for a free worker.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(100);

/// Sizing and timing of an `InvokerPool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of invokers created up front and kept in rotation.
    pub max_invoker_count: usize,
    /// How long `invoke` waits for a free invoker.
    #[serde(rename = "max_wait_ms", with = "millis")]
    pub max_wait: Duration,
    /// Deadline applied to calls whose context carries none.
    #[serde(rename = "max_runnable_time_ms", with = "opt_millis")]
    pub max_runnable_time: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_invoker_count: DEFAULT_MAX_INVOKER_COUNT,
            max_wait: DEFAULT_MAX_WAIT,
            max_runnable_time: None,
        }
    }
}

/// How to launch one backend process.
///
/// Every call to [`ProcessTemplate::command`] yields an independent
/// `Command`, so each worker gets its own process and its own pipes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTemplate {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: Vec<(String, String)>,
    #[serde(default)]
    pub current_dir: Option<PathBuf>,
}

impl ProcessTemplate {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((name.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Resolve the program to an executable path.
    ///
    /// Paths with a directory component are checked as given; bare names are
    /// looked up on `PATH`.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        let program = &self.program;
        if program.components().count() > 1 {
            let candidate = match &self.current_dir {
                Some(dir) if program.is_relative() => dir.join(program),
                _ => program.clone(),
            };
            if candidate.is_file() {
                return Ok(candidate);
            }
            return Err(Error::Factory(format!(
                "backend program '{}' does not exist",
                candidate.display()
            )));
        }

        which::which(program).map_err(|e| {
            Error::Factory(format!(
                "backend program '{}' not found on PATH: {}",
                program.display(),
                e
            ))
        })
    }

    /// Build a fresh, unstarted command with piped stdin/stdout.
    ///
    /// Stderr is inherited so backend diagnostics reach the host's stderr.
    pub fn command(&self, program: &Path) -> Command {
        let mut command = Command::new(program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Full configuration of a process-backed pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub pool: PoolSettings,
    pub backend: ProcessTemplate,
}

impl PoolConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config '{}': {}", path.display(), e)))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_settings_defaults() {
        let settings: PoolSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, PoolSettings::default());
        assert_eq!(settings.max_invoker_count, DEFAULT_MAX_INVOKER_COUNT);
        assert!(settings.max_runnable_time.is_none());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "pool": {{ "max_invoker_count": 8, "max_wait_ms": 250, "max_runnable_time_ms": 5000 }},
                "backend": {{ "program": "/usr/bin/env", "args": ["cat"], "envs": [["MODE", "echo"]] }}
            }}"#
        )
        .unwrap();

        let config = PoolConfig::from_file(file.path()).unwrap();

        assert_eq!(config.pool.max_invoker_count, 8);
        assert_eq!(config.pool.max_wait, Duration::from_millis(250));
        assert_eq!(config.pool.max_runnable_time, Some(Duration::from_secs(5)));
        assert_eq!(config.backend.program, PathBuf::from("/usr/bin/env"));
        assert_eq!(config.backend.args, vec!["cat".to_string()]);
        assert_eq!(
            config.backend.envs,
            vec![("MODE".to_string(), "echo".to_string())]
        );
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"pool\": {{}} }}").unwrap();

        let err = PoolConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_settings_serialize_millis() {
        let settings = PoolSettings {
            max_invoker_count: 2,
            max_wait: Duration::from_millis(1500),
            max_runnable_time: None,
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["max_wait_ms"], 1500);
        assert!(json["max_runnable_time_ms"].is_null());
    }

    #[test]
    fn test_missing_program_does_not_resolve() {
        let template = ProcessTemplate::new("does_not_exist_fnpool_backend");
        assert!(matches!(template.resolve_program(), Err(Error::Factory(_))));

        let template = ProcessTemplate::new("/nonexistent/dir/backend");
        assert!(matches!(template.resolve_program(), Err(Error::Factory(_))));
    }
}
