#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use driver_compat_harness::core::config::DatabaseConfig;
use driver_compat_harness::core::errors::{DchError, Result};
use driver_compat_harness::core::test_name::TestName;
use driver_compat_harness::expectations::version::VersionKey;
use driver_compat_harness::runner::collaborators::{ClusterHandle, Collaborators, TestPackage};
use driver_compat_harness::suite::outcome::{RunnerCompletion, RunnerFormat, RunnerOutput};
use driver_compat_harness::suite::tags::TagSource;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dch") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dch.exe" } else { "dch" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dch binary path for integration test"),
    }
}

/// Run the binary with JSON output forced off a TTY and a per-case log file.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("dch-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env_remove("DCH_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute dch command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// Tag source answering from a fixed list, or failing like an offline remote.
pub struct FakeTags {
    pub tags: Option<Vec<String>>,
}

impl TagSource for FakeTags {
    fn list_tags(&self, repo_url: &str) -> Result<Vec<String>> {
        self.tags.clone().ok_or_else(|| DchError::TagDiscovery {
            repo: repo_url.to_string(),
            details: "network unreachable".to_string(),
        })
    }
}

/// Collaborators that never leave the process and record every call.
pub struct FakeCollaborators {
    pub tags: FakeTags,
    pub discovered: Vec<&'static str>,
    /// Go test JSON lines returned by `execute_tests`.
    pub events: Vec<String>,
    pub completion: RunnerCompletion,
    pub fail_step: Option<&'static str>,
    pub calls: RefCell<Vec<String>>,
    pub executed: RefCell<Vec<TestName>>,
}

impl FakeCollaborators {
    pub fn new(discovered: &[&'static str]) -> Self {
        Self {
            tags: FakeTags {
                tags: Some(vec!["v1.21.8".to_string(), "v1.21.9".to_string()]),
            },
            discovered: discovered.to_vec(),
            events: Vec::new(),
            completion: RunnerCompletion::Exited { code: Some(1) },
            fail_step: None,
            calls: RefCell::new(Vec::new()),
            executed: RefCell::new(Vec::new()),
        }
    }

    pub fn passing(mut self, test: &str) -> Self {
        self.events
            .push(format!(r#"{{"Action":"pass","Test":"{test}","Elapsed":0.01}}"#));
        self
    }

    pub fn failing(mut self, test: &str) -> Self {
        self.events
            .push(format!(r#"{{"Action":"fail","Test":"{test}","Elapsed":0.01}}"#));
        self
    }

    pub fn offline(mut self) -> Self {
        self.tags.tags = None;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn step(&self, name: &'static str) -> Result<()> {
        self.calls.borrow_mut().push(name.to_string());
        if self.fail_step == Some(name) {
            return Err(DchError::collaborator(name, "scripted failure"));
        }
        Ok(())
    }
}

impl Collaborators for FakeCollaborators {
    fn provision_cluster(&self) -> Result<ClusterHandle> {
        self.step("provision_cluster")?;
        Ok(ClusterHandle::from_config(&DatabaseConfig::default()))
    }

    fn start_database(&self, _cluster: &ClusterHandle, _version: &VersionKey) -> Result<()> {
        self.step("start_database")
    }

    fn tag_source(&self) -> &dyn TagSource {
        self.calls.borrow_mut().push("tag_source".to_string());
        &self.tags
    }

    fn clone_at_tag(&self, _repo_url: &str, _tag: &str, _dest: &Path) -> Result<()> {
        self.step("clone_at_tag")
    }

    fn prepare_package(&self, _package: &TestPackage, _commands: &[String]) -> Result<()> {
        self.step("prepare_package")
    }

    fn discover_tests(
        &self,
        _package: &TestPackage,
        _pattern: Option<&str>,
    ) -> Result<Vec<TestName>> {
        self.step("discover_tests")?;
        Ok(self.discovered.iter().copied().map(TestName::from).collect())
    }

    fn execute_tests(&self, _package: &TestPackage, selected: &[TestName]) -> Result<RunnerOutput> {
        self.step("execute_tests")?;
        self.executed.borrow_mut().extend(selected.iter().cloned());
        Ok(RunnerOutput {
            format: RunnerFormat::GoTestJson,
            bytes: self.events.join("\n").into_bytes(),
            completion: self.completion.clone(),
        })
    }
}
