//! CLI binary for pdf-rephrase.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig`,
//! runs the pipeline, and writes the artifacts.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_rephrase::{run_with_backend, ArtifactPaths, HttpBackend, MetricSet, RunConfig};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic run with config.json + metrics.json in the working directory
  pdf-rephrase document.pdf

  # Explicit configuration and output directory
  pdf-rephrase --config conf/run.json --metrics conf/metrics.json \
               --output-dir out/ document.pdf

  # Print the rendered document to stdout instead of writing artifacts
  pdf-rephrase --stdout document.pdf

  # Structured output for scripting
  pdf-rephrase --json document.pdf > result.json

CONFIGURATION:
  config.json   chunk sizes, token ceiling, model ids, retry policy
  metrics.json  the evaluation rubric: {"metrics": [{name, description, threshold}]}

ENVIRONMENT VARIABLES:
  REPHRASE_API_URL   Generation endpoint (e.g. http://localhost:11434/api/generate)
  HF_HOME            Hugging Face cache directory for tokenizer downloads
  RUST_LOG           Tracing filter override (e.g. pdf_rephrase=debug)

SETUP:
  1. Start a backend:    ollama serve
  2. Set the endpoint:   export REPHRASE_API_URL=http://localhost:11434/api/generate
  3. Run:                pdf-rephrase document.pdf
"#;

/// Rephrase a PDF section by section with a rubric-gated language model.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-rephrase",
    version,
    about = "Rephrase PDF documents with a language model and a rubric-based quality gate",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file to rephrase.
    input: PathBuf,

    /// Run configuration file.
    #[arg(short, long, env = "REPHRASE_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Evaluation rubric file.
    #[arg(short, long, env = "REPHRASE_METRICS", default_value = "metrics.json")]
    metrics: PathBuf,

    /// Directory for the rendered document.
    #[arg(long, env = "REPHRASE_OUTPUT_DIR", default_value = "data/output")]
    output_dir: PathBuf,

    /// Directory for the error report.
    #[arg(long, env = "REPHRASE_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Directory for the raw extracted-sections dump.
    #[arg(long, env = "REPHRASE_EXTRACTED_DIR", default_value = "data/extracted")]
    extracted_dir: PathBuf,

    /// Generation endpoint URL (overrides config and REPHRASE_API_URL).
    #[arg(long)]
    endpoint: Option<String>,

    /// Generation model id (overrides config).
    #[arg(long)]
    model: Option<String>,

    /// Print the rendered document to stdout; skip writing artifacts.
    #[arg(long)]
    stdout: bool,

    /// Output the full run result as JSON to stdout; skip writing artifacts.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "REPHRASE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "REPHRASE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "REPHRASE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner owns the terminal while active; keep library logs quiet
    // unless the user explicitly asked for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.stdout;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Load configuration ───────────────────────────────────────────────
    let mut config = RunConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if let Some(endpoint) = cli.endpoint.clone() {
        config.endpoint = Some(endpoint);
    }
    if let Some(model) = cli.model.clone() {
        config.model_name = model;
    }

    let metrics = MetricSet::from_file(&cli.metrics)
        .with_context(|| format!("Failed to load metrics from {:?}", cli.metrics))?;

    let backend = Arc::new(HttpBackend::new(&config).context("Backend configuration")?);

    // ── Progress spinner ─────────────────────────────────────────────────
    let spinner = if show_progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Rephrasing");
        bar.set_message(cli.input.display().to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let output = run_with_backend(&cli.input, &config, metrics, backend)
        .await
        .context("Run failed")?;

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    // ── Emit results ─────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    if cli.stdout {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.document.as_bytes())
            .context("Failed to write to stdout")?;
        return Ok(());
    }

    let stem = cli
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let paths = ArtifactPaths::timestamped(&cli.output_dir, &cli.log_dir, &cli.extracted_dir, &stem);

    pdf_rephrase::write_artifacts(&paths, &output)
        .await
        .context("Failed to write artifacts")?;

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        let stats = &output.stats;
        let tick = if stats.failed_chunks == 0 && stats.best_effort_chunks == 0 {
            green("✔")
        } else if stats.passed_chunks > 0 {
            cyan("⚠")
        } else {
            red("✘")
        };
        eprintln!(
            "{tick}  {} sections, {} chunks  {}ms  →  {}",
            stats.sections,
            stats.total_chunks,
            stats.total_duration_ms,
            bold(&paths.document.display().to_string()),
        );
        eprintln!(
            "   {} passed  /  {} best-effort  /  {} failed",
            green(&stats.passed_chunks.to_string()),
            cyan(&stats.best_effort_chunks.to_string()),
            red(&stats.failed_chunks.to_string()),
        );
        if !output.report.is_empty() {
            eprintln!(
                "   {} degraded chunk(s) — see {}",
                output.report.len(),
                dim(&paths.error_report.display().to_string()),
            );
        }
    }

    Ok(())
}
