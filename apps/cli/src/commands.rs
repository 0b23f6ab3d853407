//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use sitescribe_core::{Pipeline, ProgressReporter, RunOptions, RunReport, build_converter};
use sitescribe_crawler::HttpFetcher;
use sitescribe_discovery::SitemapResolver;
use sitescribe_shared::{
    AppConfig, CancelSignal, ConversionBackend, ConversionConfig, FetchConfig, SitemapConfig,
    init_config, load_config,
};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SiteScribe: turn documentation sitemaps into clean Markdown.
#[derive(Parser)]
#[command(
    name = "sitescribe",
    version,
    about = "Fetch every page of a documentation sitemap and convert it to Markdown.",
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
    /// Fetch, convert, and write every page of a sitemap.
    Run {
        /// Sitemap URL. Optional with --skip-fetch, which then converts every
        /// stored domain.
        sitemap: Option<String>,

        /// Convert what an earlier run stored; do not fetch.
        #[arg(long)]
        skip_fetch: bool,

        /// Fetch and store only; do not convert.
        #[arg(long)]
        skip_convert: bool,

        /// Raw content directory (defaults to `defaults.raw_dir`).
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Markdown output directory (defaults to `defaults.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Re-convert pages whose output already reports success.
        #[arg(long)]
        force: bool,

        /// Re-fetch pages that are already stored.
        #[arg(long)]
        force_fetch: bool,

        /// Concurrent fetches (overrides `fetch.concurrency`).
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Concurrent page conversions (overrides `conversion.concurrency`).
        #[arg(long)]
        convert_concurrency: Option<usize>,

        /// Conversion backend: openrouter or local.
        #[arg(long)]
        backend: Option<ConversionBackend>,

        /// Write the run report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Resolve a sitemap and list its page URLs without fetching them.
    Sitemap {
        /// Sitemap URL.
        url: String,
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
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitescribe=info",
        1 => "sitescribe=debug",
        _ => "sitescribe=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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

/// Flags of `run`, after parsing.
struct RunArgs {
    sitemap: Option<String>,
    skip_fetch: bool,
    skip_convert: bool,
    input_dir: Option<PathBuf>,
    out: Option<PathBuf>,
    force: bool,
    force_fetch: bool,
    concurrency: Option<usize>,
    convert_concurrency: Option<usize>,
    backend: Option<ConversionBackend>,
    report: Option<PathBuf>,
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Run {
            sitemap,
            skip_fetch,
            skip_convert,
            input_dir,
            out,
            force,
            force_fetch,
            concurrency,
            convert_concurrency,
            backend,
            report,
        } => {
            cmd_run(RunArgs {
                sitemap,
                skip_fetch,
                skip_convert,
                input_dir,
                out,
                force,
                force_fetch,
                concurrency,
                convert_concurrency,
                backend,
                report,
            })
            .await
        }
        Command::Sitemap { url } => cmd_sitemap(&url).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    if args.skip_fetch && args.skip_convert {
        return Err(eyre!("--skip-fetch and --skip-convert together leave nothing to do"));
    }
    if args.sitemap.is_none() && !args.skip_fetch {
        return Err(eyre!("a sitemap URL is required unless --skip-fetch is given"));
    }

    let config = load_config()?;
    let (fetch, sitemap, conversion) = runtime_configs(&config, &args);

    // Fail fast on a missing API key before any network work.
    let converter = if args.skip_convert {
        build_converter(&ConversionConfig {
            backend: ConversionBackend::Local,
            ..conversion.clone()
        })?
    } else {
        build_converter(&conversion)?
    };
    let fetcher = Arc::new(HttpFetcher::new(&fetch)?);

    let options = RunOptions {
        sitemap_url: args.sitemap.clone(),
        skip_fetch: args.skip_fetch,
        skip_convert: args.skip_convert,
        raw_dir: args
            .input_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.defaults.raw_dir)),
        output_dir: args
            .out
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir)),
    };

    info!(
        sitemap = options.sitemap_url.as_deref().unwrap_or("-"),
        backend = %conversion.backend,
        raw_dir = %options.raw_dir.display(),
        output_dir = %options.output_dir.display(),
        "starting run"
    );

    let cancel = CancelSignal::new();
    spawn_ctrl_c_handler(cancel.clone());

    let pipeline = Pipeline::new(fetcher, converter, fetch, sitemap, conversion);
    let reporter = CliProgress::new();
    let report = pipeline.run(&options, &cancel, &reporter).await?;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    print_summary(&report, &options);

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Merge CLI flags over the loaded config.
fn runtime_configs(
    config: &AppConfig,
    args: &RunArgs,
) -> (FetchConfig, SitemapConfig, ConversionConfig) {
    let mut fetch = FetchConfig::from(config);
    let mut conversion = ConversionConfig::from(config);

    fetch.force = args.force_fetch;
    conversion.force = args.force;
    if let Some(concurrency) = args.concurrency {
        fetch.concurrency = concurrency.max(1);
    }
    if let Some(concurrency) = args.convert_concurrency {
        conversion.concurrency = concurrency.max(1);
    }
    if let Some(backend) = args.backend {
        conversion.backend = backend;
    }

    (fetch, SitemapConfig::from(config), conversion)
}

/// First Ctrl-C requests a graceful stop; in-flight work finishes.
fn spawn_ctrl_c_handler(cancel: CancelSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .wrap_err_with(|| format!("failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}

fn print_summary(report: &RunReport, options: &RunOptions) {
    let counts = &report.counts;
    println!();
    if report.is_success() {
        println!("  Run complete.");
    } else {
        println!("  Run complete with failures.");
    }
    if !options.skip_fetch {
        println!("  Resolved:   {}", counts.resolved);
        println!("  Fetched:    {}", counts.fetched);
        println!("  Stored:     {} (already present)", counts.fetch_skipped);
    }
    if !options.skip_convert {
        println!("  Converted:  {}", counts.converted);
        println!("  Written:    {}", counts.written);
        println!("  Unchanged:  {}", counts.unchanged);
        println!("  Skipped:    {} (already complete)", counts.convert_skipped);
        println!("  Output:     {}", options.output_dir.display());
    }
    println!("  Failed:     {}", counts.failed);
    if counts.pending > 0 {
        println!("  Pending:    {} (interrupted)", counts.pending);
    }
    println!("  Time:       {:.1}s", report.elapsed_ms as f64 / 1000.0);

    for failure in &report.failures {
        println!("    [{}] {} {}", failure.stage, failure.url, failure.reason);
    }
    println!();
}

async fn cmd_sitemap(url: &str) -> Result<ExitCode> {
    let config = load_config()?;
    let fetch = FetchConfig::from(&config);
    let fetcher = Arc::new(HttpFetcher::new(&fetch)?);
    let resolver = SitemapResolver::new(fetcher, SitemapConfig::from(&config), &fetch);

    let cancel = CancelSignal::new();
    spawn_ctrl_c_handler(cancel.clone());

    let entries = resolver.resolve(url, &cancel).await?;
    for entry in &entries {
        println!("{}", entry.url);
    }
    info!(count = entries.len(), "sitemap resolved");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_config_show() -> Result<ExitCode> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_fetched(&self, url: &str, ok: bool, current: usize, total: usize) {
        let mark = if ok { "" } else { " (failed)" };
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {url}{mark}"));
    }

    fn page_converted(&self, url: &str, ok: bool, current: usize, total: usize) {
        let mark = if ok { "" } else { " (failed)" };
        self.spinner
            .set_message(format!("Converting [{current}/{total}] {url}{mark}"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
