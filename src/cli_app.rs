//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use enospace_probe::core::config::Config;
use enospace_probe::core::errors::{FsOp, ProbeError};
use enospace_probe::fixture::existing::ExistingMount;
use enospace_probe::fixture::sim::SimProvisioner;
use enospace_probe::logger::events::{ProbeEvent, enum_label};
use enospace_probe::logger::jsonl::{JsonlConfig, JsonlWriter};
use enospace_probe::logger::sink::{ReportSink, TeeSink};
use enospace_probe::probe::cleanup::{CleanupResult, MetadataPolicy};
use enospace_probe::probe::context::ProbeContext;
use enospace_probe::probe::scenario::{
    EXIT_FATAL, EXIT_PASS, RepeatReport, RunReport, ScenarioOptions, run_repeated, run_scenario,
};

/// ENOSPC probe for POSIX mounts over storage containers.
#[derive(Debug, Parser)]
#[command(
    name = "enospc-probe",
    author,
    version,
    about = "Fill a mount until it reports ENOSPC and check nothing moved",
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
    /// Echo every run event to stderr.
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
    /// Probe a directory that is already mounted over a container.
    Run(RunArgs),
    /// Run the full scenario against an in-memory pool.
    Simulate(SimulateArgs),
    /// Inspect configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ProbeArgs {
    /// Bytes per write call.
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<u64>,
    /// Largest chunk the transport passes unsplit. Raise together with `--chunk-size`.
    #[arg(long, value_name = "BYTES")]
    max_safe_chunk: Option<u64>,
    /// Name of the file created under the mount.
    #[arg(long, value_name = "NAME")]
    file_name: Option<String>,
    /// Metadata reservation the store was provisioned with.
    #[arg(long, value_name = "POLICY")]
    metadata_policy: Option<MetadataPolicy>,
    /// Leave the exhausted file in place.
    #[arg(long)]
    no_cleanup: bool,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Mounted directory to fill (defaults to `probe.mount_path`).
    #[arg(long, value_name = "DIR")]
    mount: Option<PathBuf>,
    #[command(flatten)]
    probe: ProbeArgs,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Pool capacity in bytes.
    #[arg(long, value_name = "BYTES")]
    capacity: Option<u64>,
    /// Space consumed by container creation.
    #[arg(long, value_name = "BYTES")]
    overhead: Option<u64>,
    /// Space reserved for metadata. Non-zero implies the `reserved` policy.
    #[arg(long, value_name = "BYTES")]
    headroom: Option<u64>,
    /// Number of freshly provisioned runs to compare.
    #[arg(long, default_value_t = 1, value_name = "N")]
    repeat: u32,
    #[command(flatten)]
    probe: ProbeArgs,
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

/// CLI error type. Every variant exits with the fatal status.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Probe, verifier or configuration failure.
    #[error(transparent)]
    Probe(#[from] ProbeError),
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
        EXIT_FATAL
    }
}

/// Dispatch CLI commands. Returns the process exit status on completion.
pub fn run(cli: &Cli) -> Result<i32, CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_probe(cli, args),
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Config(args) => run_config(cli, args).map(|()| EXIT_PASS),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(EXIT_PASS)
        }
    }
}

// ---------------------------------------------------------------------------
// run / simulate
// ---------------------------------------------------------------------------

fn apply_probe_args(config: &mut Config, args: &ProbeArgs) {
    if let Some(chunk) = args.chunk_size {
        config.probe.chunk_size_bytes = chunk;
    }
    if let Some(max_safe) = args.max_safe_chunk {
        config.probe.max_safe_chunk_bytes = max_safe;
    }
    if let Some(name) = &args.file_name {
        config.probe.file_name.clone_from(name);
    }
    if let Some(policy) = args.metadata_policy {
        config.cleanup.metadata_policy = policy;
    }
    if args.no_cleanup {
        config.cleanup.verify = false;
    }
}

fn run_probe(cli: &Cli, args: &RunArgs) -> Result<i32, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(mount) = &args.mount {
        config.probe.mount_path = Some(mount.clone());
    }
    apply_probe_args(&mut config, &args.probe);
    config.validate()?;

    let mount = config.probe.mount_path.clone().ok_or_else(|| {
        CliError::User("no mount given: pass --mount or set probe.mount_path".to_string())
    })?;
    let opts = ScenarioOptions::from_config(&config)?;
    let mut fixture = ExistingMount::new(mount);

    let outcome = with_context(cli, &config, |ctx| run_scenario(&mut fixture, ctx, &opts));
    match outcome {
        Ok(report) => {
            emit_run_report(cli, "run", &report)?;
            Ok(report.exit_code())
        }
        Err(error) => {
            emit_failure(cli, "run", &error, opts.policy)?;
            Ok(EXIT_FATAL)
        }
    }
}

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<i32, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(capacity) = args.capacity {
        config.pool.capacity_bytes = capacity;
    }
    if let Some(overhead) = args.overhead {
        config.pool.overhead_bytes = overhead;
    }
    if let Some(headroom) = args.headroom {
        config.pool.reserved_metadata_bytes = headroom;
        if headroom > 0 && args.probe.metadata_policy.is_none() {
            config.cleanup.metadata_policy = MetadataPolicy::Reserved;
        }
    }
    apply_probe_args(&mut config, &args.probe);
    config.validate()?;

    let opts = ScenarioOptions::from_config(&config)?;
    let mut fixture = SimProvisioner::new(config.pool.clone());

    let outcome = with_context(cli, &config, |ctx| {
        run_repeated(&mut fixture, ctx, &opts, args.repeat)
    });
    match outcome {
        Ok(repeat) => {
            emit_repeat_report(cli, &repeat)?;
            Ok(repeat.exit_code())
        }
        Err(error) => {
            emit_failure(cli, "simulate", &error, opts.policy)?;
            Ok(EXIT_FATAL)
        }
    }
}

/// Wire the console and, when enabled, the JSONL activity log into one context.
fn with_context<T>(
    cli: &Cli,
    config: &Config,
    body: impl FnOnce(&mut ProbeContext<'_>) -> T,
) -> T {
    let mut console = ConsoleSink {
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let mut activity = config
        .logging
        .enabled
        .then(|| JsonlWriter::open(JsonlConfig::from(&config.logging)));

    let mut tee = TeeSink::new().with(&mut console);
    if let Some(writer) = activity.as_mut() {
        tee = tee.with(writer);
    }
    let mut ctx = ProbeContext::new(&mut tee);
    body(&mut ctx)
}

/// Step narration on stderr so stdout stays parseable.
struct ConsoleSink {
    quiet: bool,
    verbose: bool,
}

impl ReportSink for ConsoleSink {
    fn step(&mut self, message: &str) {
        if !self.quiet {
            eprintln!("{} {message}", "==>".cyan().bold());
        }
    }

    fn record(&mut self, event: &ProbeEvent) {
        if self.verbose
            && let Ok(line) = serde_json::to_string(&event.to_log_entry())
        {
            eprintln!("{}", line.dimmed());
        }
    }
}

fn emit_run_report(cli: &Cli, command: &str, report: &RunReport) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => print_run_human(report),
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "passed": report.passed(),
                "exit_code": report.exit_code(),
                "report": serde_json::to_value(report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn emit_repeat_report(cli: &Cli, repeat: &RepeatReport) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            for (index, report) in repeat.reports.iter().enumerate() {
                if repeat.reports.len() > 1 {
                    println!("{}", format!("run {}", index + 1).bold());
                }
                print_run_human(report);
            }
            if repeat.reports.len() > 1 {
                let verdict = if repeat.idempotent {
                    "reproducible".green()
                } else {
                    "NOT reproducible".red().bold()
                };
                println!("final sizes {verdict}: {:?}", repeat.final_sizes);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "simulate",
                "passed": repeat.exit_code() == EXIT_PASS,
                "exit_code": repeat.exit_code(),
                "idempotent": repeat.idempotent,
                "final_sizes": repeat.final_sizes,
                "reports": serde_json::to_value(&repeat.reports)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_run_human(report: &RunReport) {
    let verdict = if report.passed() {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    println!("{verdict}  {}", report.file_path.display());
    println!(
        "  writes:     {} x {}",
        report.probe.writes_completed,
        format_bytes(report.probe.chunk_size)
    );
    println!(
        "  final size: {} ({} bytes)",
        format_bytes(report.probe.final_size),
        report.probe.final_size
    );
    match &report.cleanup {
        Some(cleanup) => {
            println!(
                "  cleanup:    {} (policy: {})",
                enum_label(&cleanup.outcome),
                cleanup.policy
            );
            if let Some(discrepancy) = cleanup.discrepancy {
                println!("  {} {discrepancy}", "discrepancy:".yellow().bold());
            }
        }
        None => println!("  cleanup:    skipped"),
    }
    println!("  duration:   {} ms", report.duration_ms);
}

fn emit_failure(
    cli: &Cli,
    command: &str,
    error: &ProbeError,
    policy: MetadataPolicy,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            eprintln!("{} {error}", "FAIL".red().bold());
            if let Some(size) = error.last_known_size() {
                eprintln!("  last known size: {size} bytes");
            }
        }
        OutputMode::Json => write_json_line(&failure_payload(command, error, policy)?)?,
    }
    Ok(())
}

/// JSON record for a fatal run. A failed unlink also gets an aborted cleanup
/// record so consumers see which stage stopped.
fn failure_payload(
    command: &str,
    error: &ProbeError,
    policy: MetadataPolicy,
) -> Result<Value, CliError> {
    let cleanup = match error {
        ProbeError::UnexpectedIo {
            op: FsOp::Unlink, ..
        } => Some(serde_json::to_value(CleanupResult::aborted(policy))?),
        _ => None,
    };
    Ok(json!({
        "command": command,
        "passed": false,
        "exit_code": EXIT_FATAL,
        "error": {
            "code": error.code(),
            "class": enum_label(&error.class()),
            "message": error.to_string(),
            "last_known_size": error.last_known_size(),
            "errno": error.errno(),
        },
        "cleanup": cleanup,
    }))
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
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::User(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
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
                        println!("  Hash: {hash}");
                        if let Some(target) = config.target_file() {
                            println!("  Target: {}", target.display());
                        }
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                            "target_file": config.target_file(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
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

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ENSP_OUTPUT_FORMAT").ok();
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
