//! Queue configuration: suites, test cases, and invocation defaults
//!
//! Configuration files are TOML by default; `.yaml`/`.yml` and `.json`
//! files are parsed according to their extension. Legacy camelCase keys
//! (`queueWorkers`, `maxRetries`, `casperjsLocations`, `casperCwd`) are
//! accepted as aliases.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::ArgumentSet;
use crate::error::{QueueError, QueueResult};
use crate::suite::WorkItem;

/// A single test script and where its xunit report goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Path to the automation script
    pub file: PathBuf,

    /// Path of the xunit report the binary writes for this script
    #[serde(alias = "reportPath", alias = "report_path")]
    pub xunit: PathBuf,

    /// Per-test changes to the baseline arguments
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub overrides: IndexMap<String, Override>,

    #[serde(default)]
    pub options: TestOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOptions {
    /// Run the binary under the virtual display wrapper
    #[serde(default, alias = "runHeadless")]
    pub run_headless: bool,
}

impl TestCase {
    pub fn new(file: impl Into<PathBuf>, xunit: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            xunit: xunit.into(),
            overrides: IndexMap::new(),
            options: TestOptions::default(),
        }
    }

    pub fn with_override(mut self, flag: impl Into<String>, value: Override) -> Self {
        self.overrides.insert(flag.into(), value);
        self
    }

    pub fn headless(mut self) -> Self {
        self.options.run_headless = true;
        self
    }
}

/// Change applied to one baseline flag for a single test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Override {
    /// Replace (or add) the flag with this value
    Set(String),
    /// Drop the flag from this test's invocation
    Unset,
}

impl Override {
    pub fn set(value: impl Into<String>) -> Self {
        Override::Set(value.into())
    }

    /// Interpret a value using the legacy convention where an empty string
    /// removes the flag.
    pub fn from_legacy(value: &str) -> Self {
        if value.is_empty() {
            Override::Unset
        } else {
            Override::Set(value.to_string())
        }
    }
}

/// Accepted spellings of an override in config files:
/// `"value"`, `""` or `false` (unset), and `{ set = "" }` for an explicit
/// empty value.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawOverride {
    Value(String),
    Flag(bool),
    Explicit { set: String },
}

impl<'de> Deserialize<'de> for Override {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawOverride::deserialize(deserializer)? {
            RawOverride::Value(value) => Ok(Override::from_legacy(&value)),
            RawOverride::Flag(false) => Ok(Override::Unset),
            RawOverride::Flag(true) => Err(D::Error::custom(
                "`true` is not a valid override; use a string value, or `false` to unset the flag",
            )),
            RawOverride::Explicit { set } => Ok(Override::Set(set)),
        }
    }
}

impl Serialize for Override {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Explicit<'a> {
            set: &'a str,
        }

        match self {
            Override::Set(value) if value.is_empty() => Explicit { set: value }.serialize(serializer),
            Override::Set(value) => serializer.serialize_str(value),
            Override::Unset => serializer.serialize_bool(false),
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Suites by name; tests inside a suite run in this order
    #[serde(default)]
    pub queue: IndexMap<String, Vec<TestCase>>,

    /// Number of suites that may run at the same time
    #[serde(default = "default_workers", alias = "queueWorkers")]
    pub queue_workers: usize,

    /// Retry rounds allowed after the initial round
    #[serde(default, alias = "maxRetries")]
    pub max_retries: u32,

    /// Locations of the test binary, first existing one wins
    #[serde(default, alias = "casperjsLocations", alias = "binaryCandidates")]
    pub binary_candidates: Vec<PathBuf>,

    /// Working directory for the spawned binary
    #[serde(default, alias = "casperCwd")]
    pub cwd: Option<PathBuf>,

    /// Baseline `key=value` arguments
    #[serde(default)]
    pub args: ArgumentSet,

    /// Bare flags passed before the arguments
    #[serde(default)]
    pub flags: Vec<String>,

    /// Tokens prepended for tests with `run_headless`
    #[serde(default = "default_headless_wrapper", alias = "headlessWrapper")]
    pub headless_wrapper: Vec<String>,

    /// Hard wall-clock limit per invocation
    #[serde(default, alias = "processTimeoutSecs")]
    pub process_timeout_secs: Option<u64>,

    /// Directory receiving report artifacts
    #[serde(default = "default_report_dir", alias = "reportDir")]
    pub report_dir: PathBuf,
}

fn default_workers() -> usize {
    1
}

fn default_headless_wrapper() -> Vec<String> {
    vec!["xvfb-run".to_string(), "-a".to_string()]
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".log/test")
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue: IndexMap::new(),
            queue_workers: default_workers(),
            max_retries: 0,
            binary_candidates: Vec::new(),
            cwd: None,
            args: ArgumentSet::default(),
            flags: Vec::new(),
            headless_wrapper: default_headless_wrapper(),
            process_timeout_secs: None,
            report_dir: default_report_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl QueueConfig {
    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> QueueResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| QueueError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::parse(&content, ConfigFormat::from_path(path)).map_err(|reason| {
            QueueError::ConfigParse {
                path: path.to_path_buf(),
                reason,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> QueueResult<Self> {
        Self::parse_inline(content, ConfigFormat::Toml)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> QueueResult<Self> {
        Self::parse_inline(content, ConfigFormat::Yaml)
    }

    fn parse_inline(content: &str, format: ConfigFormat) -> QueueResult<Self> {
        let config = Self::parse(content, format).map_err(|reason| QueueError::ConfigParse {
            path: PathBuf::from("<inline>"),
            reason,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Check structural invariants that deserialization cannot express
    pub fn validate(&self) -> QueueResult<()> {
        for (name, tests) in &self.queue {
            if name.trim().is_empty() {
                return Err(QueueError::Configuration(
                    "suite names must not be empty".to_string(),
                ));
            }

            let mut seen = HashSet::new();
            for test in tests {
                if test.file.as_os_str().is_empty() {
                    return Err(QueueError::Configuration(format!(
                        "suite '{}' has a test without a file",
                        name
                    )));
                }
                if test.xunit.as_os_str().is_empty() {
                    return Err(QueueError::Configuration(format!(
                        "test '{}' in suite '{}' has no xunit report path",
                        test.file.display(),
                        name
                    )));
                }
                if !seen.insert(&test.file) {
                    return Err(QueueError::Configuration(format!(
                        "test '{}' appears more than once in suite '{}'",
                        test.file.display(),
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Worker pool size, never below one
    pub fn workers(&self) -> usize {
        self.queue_workers.max(1)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }

    /// Round 0 work items, in configuration order
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.queue
            .iter()
            .map(|(name, tests)| WorkItem::new(name.clone(), tests.clone()))
            .collect()
    }
}
