//! Process-backed [`Collaborators`]: `git` for tags and checkouts, `sh` for
//! setup commands, and the Go toolchain for discovery and execution.
//!
//! `go test` runs in its own process group. Its output is drained line by
//! line on reader threads and handed to the poll loop over a channel; the loop
//! enforces the deadline and watches the cancel flag, killing the whole group
//! when either fires.

#![allow(missing_docs)]

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};

use crate::core::config::{DatabaseConfig, RunnerConfig};
use crate::core::errors::{DchError, Result};
use crate::core::test_name::TestName;
use crate::expectations::version::VersionKey;
use crate::runner::cancel::CancelFlag;
use crate::runner::collaborators::{ClusterHandle, Collaborators, TestPackage};
use crate::suite::outcome::{RunnerCompletion, RunnerFormat, RunnerOutput};
use crate::suite::tags::{TagSource, parse_ls_remote};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Remote tags via `git ls-remote`.
#[derive(Debug, Clone)]
pub struct GitTagSource {
    git_binary: PathBuf,
}

impl GitTagSource {
    #[must_use]
    pub fn new(git_binary: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }
}

impl TagSource for GitTagSource {
    fn list_tags(&self, repo_url: &str) -> Result<Vec<String>> {
        let discovery_error = |details: String| DchError::TagDiscovery {
            repo: repo_url.to_string(),
            details,
        };
        let output = Command::new(&self.git_binary)
            .args(["ls-remote", "--tags", "--refs", repo_url])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| discovery_error(format!("{}: {e}", self.git_binary.display())))?;
        if !output.status.success() {
            return Err(discovery_error(stderr_tail(&output.stderr)));
        }
        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Collaborators backed by local processes.
pub struct ProcessCollaborators {
    database: DatabaseConfig,
    runner: RunnerConfig,
    work_dir: PathBuf,
    tags: GitTagSource,
    cancel: CancelFlag,
}

impl ProcessCollaborators {
    #[must_use]
    pub fn new(
        database: DatabaseConfig,
        runner: RunnerConfig,
        work_dir: PathBuf,
        cancel: CancelFlag,
    ) -> Self {
        let tags = GitTagSource::new(runner.git_binary.clone());
        Self {
            database,
            runner,
            work_dir,
            tags,
            cancel,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.runner.timeout_secs)
    }

    fn go(&self, package: &TestPackage) -> Command {
        let mut cmd = Command::new(&self.runner.go_binary);
        cmd.current_dir(&package.dir).envs(&package.env);
        cmd
    }
}

impl Collaborators for ProcessCollaborators {
    fn provision_cluster(&self) -> Result<ClusterHandle> {
        fs::create_dir_all(&self.work_dir).map_err(|source| DchError::io(&self.work_dir, source))?;
        Ok(ClusterHandle::from_config(&self.database))
    }

    fn start_database(&self, cluster: &ClusterHandle, version: &VersionKey) -> Result<()> {
        let version = version.to_string();
        for command in &self.database.setup_commands {
            let command = command.replace("{version}", &version);
            let output = shell(&command)
                .current_dir(&self.work_dir)
                .envs(cluster.pg_env())
                .output();
            check_output("start database", &command, output)?;
        }
        Ok(())
    }

    fn tag_source(&self) -> &dyn TagSource {
        &self.tags
    }

    fn clone_at_tag(&self, repo_url: &str, tag: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            fs::remove_dir_all(dest).map_err(|source| DchError::io(dest, source))?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| DchError::io(parent, source))?;
        }
        let output = Command::new(&self.runner.git_binary)
            .args(["clone", "--quiet", "--depth", "1", "--branch", tag, repo_url])
            .arg(dest)
            .stdin(Stdio::null())
            .output();
        check_output("clone", &format!("git clone {repo_url} at {tag}"), output)?;
        Ok(())
    }

    fn prepare_package(&self, package: &TestPackage, commands: &[String]) -> Result<()> {
        for command in commands {
            let output = shell(command)
                .current_dir(&package.dir)
                .envs(&package.env)
                .output();
            check_output("prepare package", command, output)?;
        }
        Ok(())
    }

    fn discover_tests(
        &self,
        package: &TestPackage,
        pattern: Option<&str>,
    ) -> Result<Vec<TestName>> {
        let mut cmd = self.go(package);
        cmd.args(["test", "-list", pattern.unwrap_or(".")]);
        let captured = run_supervised("discover tests", cmd, self.timeout(), &self.cancel)?;
        match captured.completion {
            RunnerCompletion::Exited { code: Some(0) } => {}
            RunnerCompletion::Exited { code } => {
                return Err(DchError::collaborator(
                    "discover tests",
                    format!("go test -list exited with {code:?}: {}", stderr_tail(&captured.stderr)),
                ));
            }
            RunnerCompletion::Cancelled { reason } => {
                return Err(DchError::RunAborted { reason });
            }
            RunnerCompletion::TimedOut { after_secs } => {
                return Err(DchError::RunAborted {
                    reason: format!("test discovery timed out after {after_secs}s"),
                });
            }
        }
        Ok(parse_test_list(&String::from_utf8_lossy(&captured.stdout)))
    }

    fn execute_tests(&self, package: &TestPackage, selected: &[TestName]) -> Result<RunnerOutput> {
        let format = if self.runner.json_output {
            RunnerFormat::GoTestJson
        } else {
            RunnerFormat::GoTestVerbose
        };
        let mut cmd = self.go(package);
        cmd.arg("test");
        cmd.arg(match format {
            RunnerFormat::GoTestJson => "-json",
            RunnerFormat::GoTestVerbose => "-v",
        });
        let pattern = run_pattern(selected);
        cmd.args(["-count=1", "-timeout", "0", "-run", pattern.as_str()]);

        let captured = run_supervised("execute tests", cmd, self.timeout(), &self.cancel)?;
        Ok(RunnerOutput {
            format,
            bytes: captured.stdout,
            completion: captured.completion,
        })
    }
}

/// Anchored `-run` expression matching exactly `selected`.
#[must_use]
pub fn run_pattern(selected: &[TestName]) -> String {
    let alternatives: Vec<String> = selected
        .iter()
        .map(|name| regex::escape(name.as_str()))
        .collect();
    format!("^({})$", alternatives.join("|"))
}

/// Name prefixes `go test -run` executes. Benchmarks are listed by
/// `go test -list` but only run under `-bench`.
const RUNNABLE_PREFIXES: [&str; 3] = ["Test", "Example", "Fuzz"];

/// Whether `go test -run` would execute `name`. `Testify` is not a test:
/// the prefix must not be followed by a lowercase letter.
#[must_use]
pub fn is_runnable_test(name: &str) -> bool {
    RUNNABLE_PREFIXES.iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| rest.chars().next().is_none_or(|c| !c.is_lowercase()))
    })
}

/// Runnable test names from `go test -list` output. The trailing `ok` line,
/// toolchain chatter and benchmarks are skipped.
#[must_use]
pub fn parse_test_list(output: &str) -> Vec<TestName> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.chars().all(|c| c.is_alphanumeric() || c == '_') && is_runnable_test(line)
        })
        .map(TestName::from)
        .collect()
}

fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    cmd
}

fn check_output(step: &'static str, what: &str, output: std::io::Result<Output>) -> Result<()> {
    let output = output.map_err(|e| DchError::collaborator(step, format!("{what}: {e}")))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(DchError::collaborator(
            step,
            format!("{what}: {}: {}", output.status, stderr_tail(&output.stderr)),
        ))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[derive(Debug)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    completion: RunnerCompletion,
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

fn spawn_reader<R, F>(source: R, tx: Sender<Chunk>, wrap: F) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
    F: Fn(Vec<u8>) -> Chunk + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(wrap(line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Spawn `cmd` in its own process group and supervise it until it exits,
/// times out, or is cancelled.
fn run_supervised(
    step: &'static str,
    mut cmd: Command,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<Captured> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .spawn()
        .map_err(|e| DchError::collaborator(step, format!("{program}: {e}")))?;

    let (tx, rx) = unbounded();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, tx.clone(), Chunk::Stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, tx.clone(), Chunk::Stderr));
    }
    drop(tx);

    let started = Instant::now();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut streams_open = true;

    let completion = loop {
        if streams_open {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Chunk::Stdout(line)) => stdout.extend_from_slice(&line),
                Ok(Chunk::Stderr(line)) => stderr.extend_from_slice(&line),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => streams_open = false,
            }
        } else {
            thread::sleep(POLL_INTERVAL);
        }

        if cancel.is_cancelled() {
            kill_group(&mut child);
            break RunnerCompletion::Cancelled {
                reason: "interrupted by signal".to_string(),
            };
        }
        if started.elapsed() >= timeout {
            kill_group(&mut child);
            break RunnerCompletion::TimedOut {
                after_secs: timeout.as_secs(),
            };
        }
        if !streams_open {
            let status = child
                .try_wait()
                .map_err(|e| DchError::collaborator(step, e.to_string()))?;
            if let Some(status) = status {
                break RunnerCompletion::Exited {
                    code: status.code(),
                };
            }
        }
    };

    if !matches!(completion, RunnerCompletion::Exited { .. }) {
        let _ = child.wait();
    }
    for reader in readers {
        let _ = reader.join();
    }
    for chunk in rx.try_iter() {
        match chunk {
            Chunk::Stdout(line) => stdout.extend_from_slice(&line),
            Chunk::Stderr(line) => stderr.extend_from_slice(&line),
        }
    }

    Ok(Captured {
        stdout,
        stderr,
        completion,
    })
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(child.id()) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}
