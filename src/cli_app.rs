//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use driver_compat_harness::core::config::{Config, SuiteConfig};
use driver_compat_harness::core::errors::DchError;
use driver_compat_harness::expectations::loader::load_expectations;
use driver_compat_harness::expectations::table::{ExpectationLists, ExpectationTable};
use driver_compat_harness::expectations::version::VersionKey;
use driver_compat_harness::logger::jsonl::JsonlWriter;
use driver_compat_harness::logger::status::{StatusSink, Verbosity};
use driver_compat_harness::runner::cancel::CancelFlag;
use driver_compat_harness::runner::pipeline::{
    HarnessContext, check_applicable, load_suite_expectations, run_compatibility_suite,
};
use driver_compat_harness::runner::process::{
    GitTagSource, ProcessCollaborators, parse_test_list,
};
use driver_compat_harness::suite::outcome::{self, RunnerFormat, RunnerOutput};
use driver_compat_harness::suite::reconcile::{RunSummary, reconcile};
use driver_compat_harness::suite::report::{WrittenReport, render_text, write_report};
use driver_compat_harness::suite::selector::{discovered_matching, select};
use driver_compat_harness::suite::tags::{
    DEFAULT_RELEASE_TAG_PATTERN, ReleaseTagPattern, TagAdvisory, advise, resolve_latest_tag,
};

/// Driver compatibility harness: score a client library's test suite against a database build.
#[derive(Debug, Parser)]
#[command(
    name = "dch",
    author,
    version,
    about = "Driver Compatibility Harness - client library test suites vs. database builds",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run registered suites against a target version.
    Run(RunArgs),
    /// Score saved discovery and runner output without running anything.
    Reconcile(ReconcileArgs),
    /// Show the latest release tag of a suite's library.
    LatestTag(LatestTagArgs),
    /// Show the blocklist and ignorelist resolved for a target version.
    Lists(ListsArgs),
    /// List registered suites.
    Suites(SuitesArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
#[command(group(ArgGroup::new("which").required(true).args(["suite", "tag"])))]
struct RunArgs {
    /// Suite to run (repeatable).
    #[arg(long, value_name = "NAME")]
    suite: Vec<String>,
    /// Run every suite carrying this tag; suites older than the target are skipped.
    #[arg(long, value_name = "TAG")]
    tag: Option<String>,
    /// Database version under test, e.g. v21.1.3.
    #[arg(long, value_name = "VERSION")]
    target: String,
    /// Library tag to test instead of the suite's supported tag.
    #[arg(long, value_name = "TAG")]
    pinned: Option<String>,
    /// Expectation file override (single suite only).
    #[arg(long, value_name = "PATH")]
    expectations: Option<PathBuf>,
    /// Report directory override.
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// `go test -json` event stream.
    Json,
    /// `go test -v` text.
    Verbose,
}

impl From<FormatArg> for RunnerFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => Self::GoTestJson,
            FormatArg::Verbose => Self::GoTestVerbose,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ReconcileArgs {
    /// Registered suite whose expectations apply.
    #[arg(long, value_name = "NAME")]
    suite: String,
    /// Database version the output was produced against.
    #[arg(long, value_name = "VERSION")]
    target: String,
    /// File with one discovered test name per line (`go test -list` output).
    #[arg(long, value_name = "PATH")]
    discovered: PathBuf,
    /// Saved runner output.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    /// Format of the runner output.
    #[arg(long, value_enum, default_value_t = FormatArg::Json)]
    format: FormatArg,
    /// Expectation file override.
    #[arg(long, value_name = "PATH")]
    expectations: Option<PathBuf>,
    /// Also write report files here.
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["suite", "repo"])))]
struct LatestTagArgs {
    /// Registered suite.
    #[arg(long, value_name = "NAME")]
    suite: Option<String>,
    /// Arbitrary repository URL.
    #[arg(long, value_name = "URL")]
    repo: Option<String>,
    /// Release tag pattern with `major`, `minor` and `point` groups (with --repo).
    #[arg(long, value_name = "REGEX", requires = "repo")]
    pattern: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ListsArgs {
    #[arg(long, value_name = "NAME")]
    suite: String,
    #[arg(long, value_name = "VERSION")]
    target: String,
    /// Expectation file override.
    #[arg(long, value_name = "PATH")]
    expectations: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SuitesArgs {
    /// Only suites carrying this tag.
    #[arg(long, value_name = "TAG")]
    tag: Option<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// The run completed and found regressions.
    #[error("{0}")]
    Regressions(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Regressions(_) => 4,
        }
    }
}

impl From<DchError> for CliError {
    fn from(err: DchError) -> Self {
        if err.is_configuration() || matches!(err, DchError::InvalidVersion { .. }) {
            Self::User(err.to_string())
        } else if matches!(
            err,
            DchError::DuplicateTestName { .. } | DchError::SelectionInconsistency { .. }
        ) {
            Self::Internal(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_suites(cli, args),
        Command::Reconcile(args) => run_reconcile(cli, args),
        Command::LatestTag(args) => run_latest_tag(cli, args),
        Command::Lists(args) => run_lists(cli, args),
        Command::Suites(args) => run_list_suites(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn verbosity(cli: &Cli) -> Verbosity {
    Verbosity::from_flags(cli.verbose, cli.quiet)
}

fn parse_target(raw: &str) -> Result<VersionKey, CliError> {
    Ok(VersionKey::parse(raw)?)
}

fn expectations_for(
    config: &Config,
    suite: &SuiteConfig,
    override_path: Option<&Path>,
) -> Result<ExpectationTable, CliError> {
    Ok(match override_path {
        Some(path) => load_expectations(path, &suite.name)?,
        None => load_suite_expectations(config, suite)?,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn suites_for_run<'a>(
    config: &'a Config,
    args: &RunArgs,
    target: &VersionKey,
) -> Result<Vec<&'a SuiteConfig>, CliError> {
    if let Some(tag) = &args.tag {
        let mut chosen = Vec::new();
        for suite in config.suites_tagged(tag) {
            if suite.applies_to(target)? {
                chosen.push(suite);
            }
        }
        if chosen.is_empty() {
            return Err(CliError::User(format!(
                "no suite tagged {tag} applies to {target}"
            )));
        }
        return Ok(chosen);
    }

    let mut chosen = Vec::with_capacity(args.suite.len());
    for name in &args.suite {
        let suite = config.suite(name)?;
        check_applicable(suite, target)?;
        chosen.push(suite);
    }
    Ok(chosen)
}

/// `--pinned` and `--expectations` name one suite's tag and file.
fn check_single_suite_overrides(args: &RunArgs, selected: usize) -> Result<(), CliError> {
    if selected == 1 {
        return Ok(());
    }
    for (flag, set) in [
        ("--pinned", args.pinned.is_some()),
        ("--expectations", args.expectations.is_some()),
    ] {
        if set {
            return Err(CliError::User(format!(
                "{flag} applies to exactly one suite, {selected} selected"
            )));
        }
    }
    Ok(())
}

fn run_suites(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let target = parse_target(&args.target)?;
    let suites = suites_for_run(&config, args, &target)?;
    check_single_suite_overrides(args, suites.len())?;

    let mode = output_mode(cli);
    let config_hash = config.stable_hash()?;
    let collaborators = ProcessCollaborators::new(
        config.database.clone(),
        config.runner.clone(),
        config.paths.work_dir.clone(),
        CancelFlag::with_signals(),
    );
    let mut events = StatusSink::stderr(JsonlWriter::open(&config.paths.jsonl_log), verbosity(cli));
    let report_root = args.report_dir.as_ref().unwrap_or(&config.paths.report_dir);

    let mut regressed = Vec::new();
    for suite in suites {
        let table = expectations_for(&config, suite, args.expectations.as_deref())?;
        let pinned = args.pinned.as_deref().unwrap_or(&suite.supported_tag);

        let mut ctx = HarnessContext {
            suite,
            expectations: &table,
            collaborators: &collaborators,
            work_dir: &config.paths.work_dir,
            config_hash: Some(config_hash.clone()),
            events: &mut events,
        };
        let summary = run_compatibility_suite(&mut ctx, &target, pinned)?;
        let lists = table.require_lists(&target)?;
        let written = write_report(&report_root.join(suite.slug()), &summary, &lists)?;
        emit_summary(mode, "run", &summary, Some(&written))?;

        if !summary.is_clean() {
            regressed.push(format!("{} ({})", suite.name, summary.regressions.len()));
        }
    }

    regressions_result(&regressed)
}

fn regressions_result(regressed: &[String]) -> Result<(), CliError> {
    if regressed.is_empty() {
        Ok(())
    } else {
        Err(CliError::Regressions(format!(
            "regressions in {}",
            regressed.join(", ")
        )))
    }
}

fn emit_summary(
    mode: OutputMode,
    command: &str,
    summary: &RunSummary,
    written: Option<&WrittenReport>,
) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            let text = render_text(summary);
            let mut stdout = io::stdout().lock();
            for line in text.lines() {
                if line.starts_with("result: PASS") {
                    writeln!(stdout, "{}", line.green().bold())?;
                } else if line.starts_with("result: FAIL") {
                    writeln!(stdout, "{}", line.red().bold())?;
                } else {
                    writeln!(stdout, "{line}")?;
                }
            }
            if let Some(written) = written {
                writeln!(
                    stdout,
                    "report: {} (sha256 {})",
                    written.text.display(),
                    written.digest
                )?;
            }
        }
        OutputMode::Json => {
            let mut payload = json!({
                "command": command,
                "clean": summary.is_clean(),
                "summary": serde_json::to_value(summary)?,
            });
            if let Some(written) = written {
                payload["report"] = json!({
                    "text": written.text.to_string_lossy(),
                    "json": written.json.to_string_lossy(),
                    "suggested_blocklist": written.suggested_blocklist.to_string_lossy(),
                    "digest": written.digest,
                });
            }
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// reconcile (offline)
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    Ok(fs::read(path).map_err(|source| DchError::io(path, source))?)
}

fn run_reconcile(cli: &Cli, args: &ReconcileArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let suite = config.suite(&args.suite)?;
    let target = parse_target(&args.target)?;
    let table = expectations_for(&config, suite, args.expectations.as_deref())?;
    let lists = table.require_lists(&target)?;

    let discovered = parse_test_list(&String::from_utf8_lossy(&read_file(&args.discovered)?));
    let list_regex = suite.list_regex()?;
    let universe = discovered_matching(&discovered, list_regex.as_ref())?;
    let selected = select(&discovered, &lists, list_regex.as_ref())?;

    let raw = RunnerOutput::completed(args.format.into(), read_file(&args.output)?, None);
    let parsed = outcome::parse(&raw, &selected)?;
    let summary = reconcile(&parsed.outcomes, &lists, &universe)?;

    let written = match &args.report_dir {
        Some(dir) => Some(write_report(dir, &summary, &lists)?),
        None => None,
    };
    emit_summary(output_mode(cli), "reconcile", &summary, written.as_ref())?;

    if summary.is_clean() {
        Ok(())
    } else {
        regressions_result(std::slice::from_ref(&suite.name))
    }
}

// ---------------------------------------------------------------------------
// latest-tag
// ---------------------------------------------------------------------------

fn run_latest_tag(cli: &Cli, args: &LatestTagArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let tags = GitTagSource::new(config.runner.git_binary.clone());
    let mode = output_mode(cli);

    if let Some(name) = &args.suite {
        let suite = config.suite(name)?;
        let pattern = suite.tag_pattern()?;
        let advisory = advise(&tags, &suite.repo_url, &pattern, &suite.supported_tag);
        match mode {
            OutputMode::Human => {
                println!("{}: supported {}", suite.name, suite.supported_tag);
                match &advisory {
                    TagAdvisory::Current { latest } => println!("  latest {latest} (up to date)"),
                    TagAdvisory::NewerAvailable { latest } => {
                        println!("  latest {} (newer release available)", latest.yellow());
                    }
                    TagAdvisory::Unknown { reason } => println!("  latest unknown: {reason}"),
                }
            }
            OutputMode::Json => {
                write_json_line(&json!({
                    "command": "latest-tag",
                    "suite": suite.name,
                    "supported": suite.supported_tag,
                    "advisory": serde_json::to_value(&advisory)?,
                }))?;
            }
        }
        return Ok(());
    }

    let repo = args
        .repo
        .as_deref()
        .ok_or_else(|| CliError::User("specify --suite or --repo".to_string()))?;
    let pattern =
        ReleaseTagPattern::new(args.pattern.as_deref().unwrap_or(DEFAULT_RELEASE_TAG_PATTERN))?;
    let latest = resolve_latest_tag(&tags, repo, &pattern)?;
    match mode {
        OutputMode::Human => println!("{latest}"),
        OutputMode::Json => write_json_line(&json!({
            "command": "latest-tag",
            "repo": repo,
            "latest": serde_json::to_value(&latest)?,
        }))?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// lists / suites
// ---------------------------------------------------------------------------

fn run_lists(cli: &Cli, args: &ListsArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let suite = config.suite(&args.suite)?;
    let target = parse_target(&args.target)?;
    let table = expectations_for(&config, suite, args.expectations.as_deref())?;
    let lists = table.require_lists(&target)?;

    match output_mode(cli) {
        OutputMode::Human => print_lists(&lists),
        OutputMode::Json => write_json_line(&json!({
            "command": "lists",
            "lists": serde_json::to_value(&lists)?,
            "shadowed": serde_json::to_value(lists.shadowed())?,
        }))?,
    }
    Ok(())
}

fn print_lists(lists: &ExpectationLists) {
    println!(
        "{} at {} (resolved from {})",
        lists.suite, lists.requested, lists.matched
    );
    for (title, name, entries) in [
        ("blocklist", &lists.blocklist_name, lists.blocklist()),
        ("ignorelist", &lists.ignorelist_name, lists.ignorelist()),
    ] {
        println!("{title} {} ({} entries)", name.bold(), entries.len());
        for (test, reason) in entries {
            println!("  {test}  {}", reason.dimmed());
        }
    }
    let shadowed = lists.shadowed();
    if !shadowed.is_empty() {
        println!("in both lists (ignorelist wins):");
        for test in shadowed {
            println!("  {test}");
        }
    }
}

fn run_list_suites(cli: &Cli, args: &SuitesArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let suites: Vec<&SuiteConfig> = match &args.tag {
        Some(tag) => config.suites_tagged(tag),
        None => config.suites.iter().collect(),
    };

    match output_mode(cli) {
        OutputMode::Human => {
            for suite in suites {
                println!(
                    "{:<10} {:<10} min {:<10} [{}]  {}",
                    suite.name.bold(),
                    suite.supported_tag,
                    suite.min_version,
                    suite.tags.join(","),
                    config.expectations_path(suite).display()
                );
            }
        }
        OutputMode::Json => {
            let entries: Vec<Value> = suites
                .into_iter()
                .map(|suite| {
                    let mut value = serde_json::to_value(suite)?;
                    value["expectations_path"] =
                        json!(config.expectations_path(suite).to_string_lossy());
                    Ok(value)
                })
                .collect::<Result<_, serde_json::Error>>()?;
            write_json_line(&json!({ "command": "suites", "suites": entries }))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Suites: {}", config.suites.len());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DCH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
