//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use assemblybuilder_core::{
    DropReason, RunEvent, RunHandle, RunMonitor, RunRequest, RunSummary, clean_codes, split_codes,
    start,
};
use assemblybuilder_shared::{
    AppConfig, RunConfig, RunOptions, RunStats, RunStatus, Severity, init_config, load_config,
};

use crate::catalog::Catalog;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// AssemblyBuilder: turn part-code lists into CAD assemblies.
#[derive(Parser)]
#[command(
    name = "assemblybuilder",
    version,
    about = "Resolve part codes in the document vault and assemble them in the CAD host.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the cleaned part-code list.
    Clean {
        /// Part codes; each argument may hold several separated by commas or spaces.
        codes: Vec<String>,

        /// Read additional codes from a file.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the cleaning result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Build one assembly from part codes.
    Build {
        codes: Vec<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Add to the assembly already open in the host instead of a new one.
        #[arg(long)]
        append: bool,

        /// Insert whatever resolves instead of aborting on missing codes.
        #[arg(long)]
        continue_on_missing: bool,

        /// Catalog describing the simulated vault and host.
        #[arg(long)]
        catalog: PathBuf,

        /// Print the final run snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Build one assembly per kit, expanding each through its bill of materials.
    Kit {
        kits: Vec<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(long)]
        continue_on_missing: bool,

        #[arg(long)]
        catalog: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// In text mode run log lines are rendered above the progress bar, so their
/// `tracing` mirror is silenced unless verbosity is raised.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match (cli.verbose, &cli.log_format) {
        (0, LogFormat::Text) => "assemblybuilder=info,assemblybuilder::run=off",
        (0, LogFormat::Json) => "assemblybuilder=info",
        (1, _) => "assemblybuilder=debug",
        _ => "assemblybuilder=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Clean { codes, file, json } => cmd_clean(&codes, file.as_deref(), json).await,
        Command::Build {
            codes,
            file,
            append,
            continue_on_missing,
            catalog,
            json,
        } => {
            let request = RunRequest::Codes(gather_codes(&codes, file.as_deref())?);
            cmd_run(request, append, continue_on_missing, &catalog, json).await
        }
        Command::Kit {
            kits,
            file,
            continue_on_missing,
            catalog,
            json,
        } => {
            let request = RunRequest::Kits(gather_codes(&kits, file.as_deref())?);
            cmd_run(request, false, continue_on_missing, &catalog, json).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Split every argument and the optional file into raw tokens.
fn gather_codes(args: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut raw: Vec<String> = args.iter().flat_map(|arg| split_codes(arg)).collect();
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?;
        raw.extend(split_codes(&text));
    }
    Ok(raw)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_clean(codes: &[String], file: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config()?;
    let raw = gather_codes(codes, file)?;
    let cleaned = clean_codes(&raw, config.run.dedupe, config.run.filter_noise);

    if json {
        println!("{}", serde_json::to_string_pretty(&cleaned)?);
        return Ok(());
    }

    for code in &cleaned.codes {
        println!("{code}");
    }
    for dropped in &cleaned.dropped {
        let reason = match dropped.reason {
            DropReason::Empty => "empty",
            DropReason::RowNumber => "row number",
            DropReason::Duplicate => "duplicate",
        };
        eprintln!("skipped '{}' ({reason})", dropped.token);
    }
    Ok(())
}

async fn cmd_run(
    request: RunRequest,
    append: bool,
    continue_on_missing: bool,
    catalog_path: &Path,
    json: bool,
) -> Result<()> {
    let app_config = load_config()?;
    let mut config = RunConfig::try_from(&app_config)?;
    // The simulated vault's root is its own local cache.
    config.vault.local_root = None;

    let catalog = Catalog::load(catalog_path)?;
    let services = catalog.into_services(&config.host);

    let options = RunOptions {
        append_to_existing: append || app_config.run.append_to_existing,
        abort_on_any_not_found: app_config.run.abort_on_not_found && !continue_on_missing,
    };

    let handle = start(config, services, request, options)?;
    info!(run_id = %handle.run_id, ?options, "run started");

    let (summary, monitor) = drive(handle).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(monitor.snapshot())?);
    } else {
        print_summary(&summary);
    }

    if summary.status == RunStatus::Completed {
        Ok(())
    } else {
        Err(eyre!("run ended with status {}", summary.status))
    }
}

/// Render events until the worker finishes; the first Ctrl-C cancels the run.
async fn drive(mut handle: RunHandle) -> Result<(RunSummary, RunMonitor)> {
    let progress = CliProgress::new();
    let control = handle.control();
    let mut monitor = RunMonitor::new();
    let mut cancelling = false;

    loop {
        tokio::select! {
            event = handle.events().recv() => match event {
                Some(event) => {
                    progress.render(&event, &monitor);
                    monitor.apply(event);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                progress.bar.println("Cancelling after the current step...");
                control.cancel();
            }
        }
    }
    progress.bar.finish_and_clear();

    let summary = tokio::task::spawn_blocking(move || handle.join()).await?;
    Ok((summary, monitor))
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Run finished: {}", summary.status);
    println!("  Total:     {}", summary.stats.total);
    println!("  Added:     {}", summary.stats.success);
    println!("  Failed:    {}", summary.stats.error);
    if !summary.not_found.is_empty() {
        let codes: Vec<&str> = summary.not_found.iter().map(|c| c.as_str()).collect();
        println!("  Not found: {}", codes.join(", "));
    }
    if summary.restarts > 0 {
        println!("  Restarts:  {}", summary.restarts);
    }
    if let Some(report) = &summary.finalize {
        println!(
            "  Finalized: {} components, {} unfixed, {} flexible",
            report.components, report.unfixed, report.flexible
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress renderer
// ---------------------------------------------------------------------------

/// Progress bar plus log lines printed above it.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    const SCALE: u64 = 1000;

    fn new() -> Self {
        let bar = ProgressBar::new(Self::SCALE);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {percent:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn render(&self, event: &RunEvent, monitor: &RunMonitor) {
        let snapshot = monitor.snapshot();
        match event {
            RunEvent::Status(status) => self.set_message(*status, snapshot.stats),
            RunEvent::Stats(stats) => self.set_message(snapshot.status, *stats),
            RunEvent::Progress(fraction) => {
                self.bar.set_position((fraction * Self::SCALE as f64) as u64);
            }
            RunEvent::Log(line) => {
                let marker = match line.severity {
                    Severity::Info => " ",
                    Severity::Notice => "*",
                    Severity::Success => "+",
                    Severity::Warning => "!",
                    Severity::Error => "x",
                };
                self.bar.println(format!(
                    "{} {marker} {}",
                    line.timestamp.format("%H:%M:%S"),
                    line.message
                ));
            }
            RunEvent::NotFound(_) | RunEvent::Finished(_) => {}
        }
    }

    fn set_message(&self, status: RunStatus, stats: RunStats) {
        self.bar.set_message(format!(
            "{status}  {}/{} added, {} failed",
            stats.success, stats.total, stats.error
        ));
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_split_arguments() {
        let args = vec!["2001234,2001235".to_string(), "1 2001236".to_string()];
        let raw = gather_codes(&args, None).unwrap();
        assert_eq!(raw, vec!["2001234", "2001235", "1", "2001236"]);
    }

    #[test]
    fn parses_build_flags() {
        let cli = Cli::try_parse_from([
            "assemblybuilder",
            "build",
            "2001234",
            "--catalog",
            "demo.toml",
            "--continue-on-missing",
        ])
        .unwrap();
        match cli.command {
            Command::Build {
                codes,
                continue_on_missing,
                append,
                ..
            } => {
                assert_eq!(codes, vec!["2001234"]);
                assert!(continue_on_missing);
                assert!(!append);
            }
            _ => panic!("expected build"),
        }
    }
}
