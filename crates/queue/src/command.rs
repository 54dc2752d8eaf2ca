//! Command construction for the external test binary
//!
//! Builds `<binary> test [flags...] [key=value...] <file> --xunit=<report>`,
//! optionally wrapped by a virtual display launcher.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{Override, QueueConfig, TestCase};
use crate::error::{QueueError, QueueResult};

const REPORT_FLAG: &str = "--xunit=";

/// Baseline `key=value` flags, kept in insertion order so command lines are
/// reproducible between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgumentSet(IndexMap<String, String>);

impl ArgumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a copy with `overrides` applied. `self` is left untouched.
    ///
    /// Removed keys keep the relative order of the remaining ones; replaced
    /// keys keep their original position and new keys are appended.
    pub fn merged(&self, overrides: &IndexMap<String, Override>) -> ArgumentSet {
        let mut merged = self.0.clone();
        for (key, value) in overrides {
            match value {
                Override::Unset => {
                    merged.shift_remove(key);
                }
                Override::Set(value) => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        ArgumentSet(merged)
    }

    /// `key=value` tokens in iteration order
    pub fn to_tokens(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ArgumentSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ArgumentSet(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A fully resolved process invocation for one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable: the test binary, or the headless wrapper when enabled
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Absolute path of the script under test
    pub file: PathBuf,
    /// Absolute path of the xunit report
    pub report_path: PathBuf,
}

impl Invocation {
    /// Every token of the command line, program first
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// The command line as a single string
    pub fn command_line(&self) -> String {
        self.tokens().collect::<Vec<_>>().join(" ")
    }

    /// The command line without the report flag, for human-facing output
    pub fn readable_command_line(&self) -> String {
        self.tokens()
            .filter(|token| !token.starts_with(REPORT_FLAG))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Turns test cases into invocations. Read-only after construction, so a
/// single builder is shared by every worker.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    binary: PathBuf,
    flags: Vec<String>,
    headless_wrapper: Vec<String>,
    base_dir: PathBuf,
    cwd: Option<PathBuf>,
}

impl CommandBuilder {
    /// `base_dir` is the directory relative paths are resolved against
    pub fn new(binary: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            flags: Vec::new(),
            headless_wrapper: vec!["xvfb-run".to_string(), "-a".to_string()],
            base_dir: base_dir.into(),
            cwd: None,
        }
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_headless_wrapper(mut self, wrapper: Vec<String>) -> Self {
        self.headless_wrapper = wrapper;
        self
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Builder for `config`, running `binary` and resolving relative paths
    /// against `base_dir`
    pub fn from_config(config: &QueueConfig, binary: &Path, base_dir: &Path) -> QueueResult<Self> {
        let binary = absolute_path(base_dir, binary)?;
        let cwd = config
            .cwd
            .as_deref()
            .map(|cwd| absolute_path(base_dir, cwd))
            .transpose()?;

        Ok(Self::new(binary, base_dir)
            .with_flags(config.flags.clone())
            .with_headless_wrapper(config.headless_wrapper.clone())
            .with_cwd(cwd))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Build the invocation for `test`, merging its overrides into a private
    /// copy of `base_args`
    pub fn build(&self, test: &TestCase, base_args: &ArgumentSet) -> QueueResult<Invocation> {
        let file = absolute_path(&self.base_dir, &test.file)?;
        let report_path = absolute_path(&self.base_dir, &test.xunit)?;
        let merged = base_args.merged(&test.overrides);

        let mut tokens = Vec::with_capacity(self.flags.len() + merged.len() + 6);
        if test.options.run_headless {
            tokens.extend(self.headless_wrapper.iter().cloned());
        }
        tokens.push(self.binary.display().to_string());
        tokens.push("test".to_string());
        tokens.extend(self.flags.iter().cloned());
        tokens.extend(merged.to_tokens());
        tokens.push(file.display().to_string());
        tokens.push(format!("{}{}", REPORT_FLAG, report_path.display()));

        let mut tokens = tokens.into_iter();
        let program = tokens.next().ok_or_else(|| {
            QueueError::Configuration("empty command line".to_string())
        })?;

        Ok(Invocation {
            program,
            args: tokens.collect(),
            cwd: self.cwd.clone(),
            file,
            report_path,
        })
    }
}

/// First candidate that exists on disk
pub fn resolve_binary(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|candidate| candidate.exists()).cloned()
}

/// Resolve `path` against `base` unless it is already absolute
pub fn absolute_path(base: &Path, path: &Path) -> QueueResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(QueueError::Configuration(
            "cannot resolve an empty path".to_string(),
        ));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else if base.is_absolute() {
        Ok(base.join(path))
    } else {
        Err(QueueError::Configuration(format!(
            "cannot resolve '{}': base directory '{}' is not absolute",
            path.display(),
            base.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> ArgumentSet {
        [
            ("--ignore-ssl-errors", "yes"),
            ("--ssl-protocal", "any"),
            ("--timeout", "10000"),
        ]
        .into_iter()
        .collect()
    }

    fn builder() -> CommandBuilder {
        CommandBuilder::new("/opt/casperjs/bin/casperjs", "/work")
            .with_flags(vec!["--verbose".to_string()])
    }

    #[test]
    fn test_unset_override_removes_flag() {
        let args: ArgumentSet = [("--timeout", "10000")].into_iter().collect();
        let test = TestCase::new("a.js", "a.xml").with_override("--timeout", Override::Unset);
        let merged = args.merged(&test.overrides);
        assert!(!merged.contains("--timeout"));
        assert!(merged.is_empty());
    }

    #[test]
    fn test_set_override_leaves_base_untouched() {
        let args: ArgumentSet = [("--timeout", "10000")].into_iter().collect();
        let test = TestCase::new("a.js", "a.xml").with_override("--timeout", Override::set("5000"));

        let merged = args.merged(&test.overrides);
        assert_eq!(merged.to_tokens(), vec!["--timeout=5000"]);
        assert_eq!(args.get("--timeout"), Some("10000"));

        let next = TestCase::new("b.js", "b.xml");
        assert_eq!(args.merged(&next.overrides).to_tokens(), vec!["--timeout=10000"]);
    }

    #[test]
    fn test_unset_of_missing_flag_is_noop() {
        let args = base_args();
        let test = TestCase::new("a.js", "a.xml").with_override("--cookies-file", Override::Unset);
        assert_eq!(args.merged(&test.overrides), args);
    }

    #[test]
    fn test_explicit_empty_value_is_kept() {
        let args = ArgumentSet::new();
        let test = TestCase::new("a.js", "a.xml").with_override("--cookies-file", Override::set(""));
        assert_eq!(args.merged(&test.overrides).to_tokens(), vec!["--cookies-file="]);
    }

    #[test]
    fn test_build_full_command() {
        let test = TestCase::new("tests/casper-sample-0.js", "test-reports/casper-sample-0-0.xml")
            .with_override("--ignore-ssl-errors", Override::Unset)
            .with_override("--ssl-protocal", Override::set("sslv3"));

        let invocation = builder().build(&test, &base_args()).unwrap();
        assert_eq!(invocation.program, "/opt/casperjs/bin/casperjs");
        assert_eq!(
            invocation.args,
            vec![
                "test",
                "--verbose",
                "--ssl-protocal=sslv3",
                "--timeout=10000",
                "/work/tests/casper-sample-0.js",
                "--xunit=/work/test-reports/casper-sample-0-0.xml",
            ]
        );
        assert_eq!(invocation.file, PathBuf::from("/work/tests/casper-sample-0.js"));
        assert_eq!(invocation.cwd, None);
    }

    #[test]
    fn test_headless_prefixes_wrapper() {
        let test = TestCase::new("a.js", "a.xml").headless();
        let invocation = builder().build(&test, &ArgumentSet::new()).unwrap();
        assert_eq!(invocation.program, "xvfb-run");
        assert_eq!(invocation.args[0], "-a");
        assert_eq!(invocation.args[1], "/opt/casperjs/bin/casperjs");
        assert!(invocation.command_line().starts_with("xvfb-run -a /opt/casperjs/bin/casperjs test"));
    }

    #[test]
    fn test_readable_command_drops_report_flag() {
        let test = TestCase::new("a.js", "/reports/a.xml");
        let invocation = builder().build(&test, &ArgumentSet::new()).unwrap();
        assert!(invocation.command_line().ends_with("--xunit=/reports/a.xml"));
        assert_eq!(
            invocation.readable_command_line(),
            "/opt/casperjs/bin/casperjs test --verbose /work/a.js"
        );
    }

    #[test]
    fn test_empty_file_is_configuration_error() {
        let test = TestCase::new("", "a.xml");
        let err = builder().build(&test, &ArgumentSet::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_resolve_binary_picks_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("casperjs");
        std::fs::write(&present, "").unwrap();

        let candidates = vec![dir.path().join("missing"), present.clone(), dir.path().to_path_buf()];
        assert_eq!(resolve_binary(&candidates), Some(present));
        assert_eq!(resolve_binary(&[dir.path().join("nope")]), None);
        assert_eq!(resolve_binary(&[]), None);
    }

    #[test]
    fn test_from_config_resolves_cwd() {
        let config = QueueConfig {
            cwd: Some(PathBuf::from("sandbox")),
            flags: vec!["--verbose".to_string()],
            ..Default::default()
        };
        let builder =
            CommandBuilder::from_config(&config, Path::new("bin/casperjs"), Path::new("/work")).unwrap();
        assert_eq!(builder.binary(), Path::new("/work/bin/casperjs"));

        let invocation = builder.build(&TestCase::new("a.js", "a.xml"), &ArgumentSet::new()).unwrap();
        assert_eq!(invocation.cwd, Some(PathBuf::from("/work/sandbox")));
    }
}
