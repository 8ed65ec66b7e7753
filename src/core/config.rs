//! Configuration system: TOML file + env var overrides + built-in suites.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DchError, Result};
use crate::expectations::version::VersionKey;
use crate::suite::tags::{DEFAULT_RELEASE_TAG_PATTERN, ReleaseTagPattern};

/// Full DCH configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub runner: RunnerConfig,
    pub paths: PathsConfig,
    pub suites: Vec<SuiteConfig>,
}

/// Connection to the database under test, as exported to the Go test binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub sslmode: String,
    pub database: String,
    /// Shell commands that bring the target version up. `{version}` is
    /// replaced with the target version.
    pub setup_commands: Vec<String>,
}

/// External toolchain and execution limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    pub go_binary: PathBuf,
    pub git_binary: PathBuf,
    /// Wall-clock budget for one `go test` execution.
    pub timeout_secs: u64,
    /// Run `go test -json` instead of parsing `-v` text.
    pub json_output: bool,
}

/// Filesystem paths used by dch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Library checkouts live under `<work_dir>/<suite>`.
    pub work_dir: PathBuf,
    /// Reports land in `<report_dir>/<suite>`.
    pub report_dir: PathBuf,
    pub jsonl_log: PathBuf,
    /// Base for relative suite expectation paths. Unset means the config
    /// file's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectations_dir: Option<PathBuf>,
}

/// One registered client-library test suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    pub name: String,
    pub repo_url: String,
    #[serde(default = "default_tag_pattern")]
    pub release_tag_pattern: String,
    /// Tag the suite is pinned to; the latest tag is advisory only.
    pub supported_tag: String,
    /// Package directory inside the checkout, if not the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_subdir: Option<PathBuf>,
    /// Regex passed to `go test -list`; also filters the discovered names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_pattern: Option<String>,
    /// Oldest target version the suite applies to.
    pub min_version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Expectation file; relative paths resolve against `paths.expectations_dir`,
    /// else the config file's directory.
    pub expectations: PathBuf,
    /// Extra environment for the test binary.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Shell commands run in the package directory before discovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_commands: Vec<String>,
}

fn default_tag_pattern() -> String {
    DEFAULT_RELEASE_TAG_PATTERN.to_string()
}

impl SuiteConfig {
    pub fn tag_pattern(&self) -> Result<ReleaseTagPattern> {
        ReleaseTagPattern::new(&self.release_tag_pattern)
    }

    pub fn list_regex(&self) -> Result<Option<Regex>> {
        Ok(self.list_pattern.as_deref().map(Regex::new).transpose()?)
    }

    pub fn min_version(&self) -> Result<VersionKey> {
        VersionKey::parse(&self.min_version)
    }

    /// Whether `target` is at or above the suite's minimum version.
    pub fn applies_to(&self, target: &VersionKey) -> Result<bool> {
        Ok(*target >= self.min_version()?)
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Filesystem-safe form of the suite name (`lib/pq` → `lib_pq`).
    #[must_use]
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 26_257,
            user: "root".to_string(),
            sslmode: "disable".to_string(),
            database: "postgres".to_string(),
            setup_commands: Vec::new(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            go_binary: PathBuf::from("go"),
            git_binary: PathBuf::from("git"),
            timeout_secs: 3 * 60 * 60,
            json_output: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[DCH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("dch").join("config.toml");
        let data = home_dir.join(".local").join("share").join("dch");
        Self {
            config_file: cfg,
            work_dir: data.join("work"),
            report_dir: data.join("reports"),
            jsonl_log: data.join("runs.jsonl"),
            expectations_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            runner: RunnerConfig::default(),
            paths: PathsConfig::default(),
            suites: builtin_suites(),
        }
    }
}

/// The suites dch knows about without a config file.
#[must_use]
pub fn builtin_suites() -> Vec<SuiteConfig> {
    vec![
        SuiteConfig {
            name: "gorm".to_string(),
            repo_url: "https://github.com/go-gorm/gorm.git".to_string(),
            release_tag_pattern: default_tag_pattern(),
            supported_tag: "v1.21.8".to_string(),
            test_subdir: Some(PathBuf::from("tests")),
            list_pattern: None,
            min_version: "v20.1.0".to_string(),
            tags: vec!["default".to_string(), "orm".to_string()],
            expectations: PathBuf::from("expectations/gorm.toml"),
            env: BTreeMap::from([("GORMDIALECT".to_string(), "postgres".to_string())]),
            setup_commands: Vec::new(),
        },
        SuiteConfig {
            name: "lib/pq".to_string(),
            repo_url: "https://github.com/lib/pq.git".to_string(),
            release_tag_pattern: default_tag_pattern(),
            supported_tag: "v1.10.0".to_string(),
            test_subdir: None,
            list_pattern: Some("^(Test|Example)".to_string()),
            min_version: "v20.1.0".to_string(),
            tags: vec!["default".to_string(), "driver".to_string()],
            expectations: PathBuf::from("expectations/lib_pq.toml"),
            env: BTreeMap::new(),
            setup_commands: Vec::new(),
        },
    ]
}

impl Config {
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DchError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DchError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Registered suite called `name`.
    pub fn suite(&self, name: &str) -> Result<&SuiteConfig> {
        self.suites
            .iter()
            .find(|suite| suite.name == name)
            .ok_or_else(|| DchError::UnknownSuite {
                name: name.to_string(),
            })
    }

    /// Suites carrying `tag`, in registry order.
    #[must_use]
    pub fn suites_tagged(&self, tag: &str) -> Vec<&SuiteConfig> {
        self.suites.iter().filter(|suite| suite.has_tag(tag)).collect()
    }

    /// Absolute path of a suite's expectation file.
    #[must_use]
    pub fn expectations_path(&self, suite: &SuiteConfig) -> PathBuf {
        if suite.expectations.is_absolute() {
            return suite.expectations.clone();
        }
        if let Some(dir) = &self.paths.expectations_dir {
            return dir.join(&suite.expectations);
        }
        self.paths
            .config_file
            .parent()
            .map_or_else(|| suite.expectations.clone(), |dir| dir.join(&suite.expectations))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DCH_DATABASE_HOST") {
            self.database.host = raw;
        }
        if let Some(raw) = lookup("DCH_DATABASE_PORT") {
            self.database.port = parse_env("DCH_DATABASE_PORT", &raw)?;
        }
        if let Some(raw) = lookup("DCH_DATABASE_USER") {
            self.database.user = raw;
        }
        if let Some(raw) = lookup("DCH_DATABASE_SSLMODE") {
            self.database.sslmode = raw;
        }
        if let Some(raw) = lookup("DCH_DATABASE_NAME") {
            self.database.database = raw;
        }

        if let Some(raw) = lookup("DCH_RUNNER_TIMEOUT_SECS") {
            self.runner.timeout_secs = parse_env("DCH_RUNNER_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("DCH_RUNNER_GO_BINARY") {
            self.runner.go_binary = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DCH_RUNNER_GIT_BINARY") {
            self.runner.git_binary = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DCH_RUNNER_JSON_OUTPUT") {
            self.runner.json_output = parse_env("DCH_RUNNER_JSON_OUTPUT", &raw)?;
        }

        if let Some(raw) = lookup("DCH_PATHS_WORK_DIR") {
            self.paths.work_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DCH_PATHS_REPORT_DIR") {
            self.paths.report_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DCH_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DCH_PATHS_EXPECTATIONS_DIR") {
            self.paths.expectations_dir = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.database.port == 0 {
            return Err(DchError::InvalidConfig {
                details: "database.port must be > 0".to_string(),
            });
        }
        if self.database.host.trim().is_empty() {
            return Err(DchError::InvalidConfig {
                details: "database.host must not be empty".to_string(),
            });
        }
        if self.runner.timeout_secs == 0 {
            return Err(DchError::InvalidConfig {
                details: "runner.timeout_secs must be > 0".to_string(),
            });
        }

        let mut names = HashSet::new();
        for suite in &self.suites {
            if suite.name.trim().is_empty() {
                return Err(DchError::InvalidConfig {
                    details: "suite name must not be empty".to_string(),
                });
            }
            if !names.insert(suite.name.as_str()) {
                return Err(DchError::InvalidConfig {
                    details: format!("suite {} is registered more than once", suite.name),
                });
            }
            let pattern = suite.tag_pattern()?;
            if pattern.parse(&suite.supported_tag).is_none() {
                return Err(DchError::InvalidConfig {
                    details: format!(
                        "suite {}: supported_tag {} does not match {}",
                        suite.name,
                        suite.supported_tag,
                        pattern.as_str()
                    ),
                });
            }
            suite.list_regex()?;
            suite.min_version().map_err(|e| DchError::InvalidConfig {
                details: format!("suite {}: min_version: {e}", suite.name),
            })?;
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| DchError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
