//! Boundary to everything the harness does not compute itself: the database
//! cluster, the remote repository, and the Go toolchain.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::config::DatabaseConfig;
use crate::core::errors::Result;
use crate::core::test_name::TestName;
use crate::expectations::version::VersionKey;
use crate::suite::outcome::RunnerOutput;
use crate::suite::tags::TagSource;

/// A provisioned database cluster and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub sslmode: String,
    pub database: String,
}

impl ClusterHandle {
    #[must_use]
    pub fn from_config(database: &DatabaseConfig) -> Self {
        Self {
            host: database.host.clone(),
            port: database.port,
            user: database.user.clone(),
            sslmode: database.sslmode.clone(),
            database: database.database.clone(),
        }
    }

    /// libpq-style environment understood by both Go drivers.
    #[must_use]
    pub fn pg_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("PGHOST".to_string(), self.host.clone()),
            ("PGPORT".to_string(), self.port.to_string()),
            ("PGUSER".to_string(), self.user.clone()),
            ("PGSSLMODE".to_string(), self.sslmode.clone()),
            ("PGDATABASE".to_string(), self.database.clone()),
        ])
    }
}

/// A Go package directory plus the environment its tests run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPackage {
    pub dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl TestPackage {
    /// Package at `dir`; the cluster environment is overlaid with `extra`.
    #[must_use]
    pub fn new(dir: PathBuf, cluster: &ClusterHandle, extra: &BTreeMap<String, String>) -> Self {
        let mut env = cluster.pg_env();
        env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { dir, env }
    }
}

/// External steps of one compatibility run.
///
/// Implementations block until the step is done. Every failure is fatal for
/// the run except through [`Collaborators::tag_source`], whose errors the
/// pipeline downgrades to an advisory.
pub trait Collaborators {
    fn provision_cluster(&self) -> Result<ClusterHandle>;

    /// Bring up `version` on the cluster.
    fn start_database(&self, cluster: &ClusterHandle, version: &VersionKey) -> Result<()>;

    fn tag_source(&self) -> &dyn TagSource;

    /// Fresh shallow checkout of `tag` at `dest`.
    fn clone_at_tag(&self, repo_url: &str, tag: &str, dest: &Path) -> Result<()>;

    /// Run suite-specific preparation commands inside the package directory.
    fn prepare_package(&self, package: &TestPackage, commands: &[String]) -> Result<()>;

    /// Top-level test names, optionally restricted to `pattern`.
    fn discover_tests(&self, package: &TestPackage, pattern: Option<&str>)
    -> Result<Vec<TestName>>;

    /// Run exactly `selected` and hand back the raw runner output.
    fn execute_tests(&self, package: &TestPackage, selected: &[TestName]) -> Result<RunnerOutput>;
}
