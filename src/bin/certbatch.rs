//! CLI binary for certbatch.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use certbatch::{
    BatchInputs, BatchOutput, BatchParams, CommandConverter, Pipeline, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, RenderPolicy, Stage, StatusReporter,
    TemplateDrawer,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback. Records complete out of order, so the bar
/// only counts; failures are printed above it as they happen.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    /// Spinner until `on_render_start` tells us how many records there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading sheets…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize, already_done: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>5}/{len} certificates  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(already_done as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_render_start(&self, total: usize, reusable: usize) {
        self.activate_bar(total, reusable);
        let line = if reusable > 0 {
            format!("Resuming: {reusable} of {total} certificates already rendered")
        } else {
            format!("Rendering {total} certificates…")
        };
        self.bar.println(format!("{} {}", cyan("◆"), bold(&line)));
    }

    fn on_record_complete(&self, _seat_no: &str, _done: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_record_error(&self, seat_no: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} Seat {:<10}  {}", red("✗"), seat_no, red(&msg)));
    }

    fn on_document_assembled(&self, placed: usize, skipped: usize) {
        self.bar.set_prefix("Finishing");
        let line = if skipped == 0 {
            format!("  {} {} certificates placed", green("✓"), placed)
        } else {
            format!(
                "  {} {} certificates placed  ({} missing)",
                cyan("⚠"),
                placed,
                red(&skipped.to_string())
            )
        };
        self.bar.println(line);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate a batch
  certbatch run --roster MS6.json --results BMS.json \
      --year "MAY 2024" --course "BACHELOR OF MANAGEMENT STUDIES" --semester 6

  # Same, copying the PDF somewhere else when done
  certbatch run --roster MS6.json --results BMS.json \
      --year 2024 --course B.COM --semester 5 -o ~/Desktop/certificates.pdf

  # Where did the last run stop?
  certbatch status

  # Throw away all generated files and the checkpoint
  certbatch delete

RESUMING:
  An interrupted `run` leaves checkpoint.json behind. Running the same
  command again continues from the last committed certificate. Different
  --year/--course/--semester values are rejected until `certbatch delete`.
  A run holds <checkpoint>.lock; a second run or delete against the same
  checkpoint is refused while it exists.

ROW SHEETS:
  JSON array of objects or JSON Lines. Roster rows need COLL_NO; result rows
  need RSLT, COLL_NO, SEAT_NO and optionally NAME, SEX, FREM, RES, CGPA/GRADE.

ENVIRONMENT VARIABLES:
  CERTBATCH_GEN_DIR          Generated files directory (default: gens)
  CERTBATCH_UPLOAD_DIR       Staged sheets directory (default: uploads)
  CERTBATCH_CHECKPOINT       Checkpoint file (default: checkpoint.json)
  CERTBATCH_TEMPLATE         Certificate template image
  CERTBATCH_CONCURRENCY      Certificates rendered at once (default: 10)
  CERTBATCH_CONVERTER        HTML→PDF program (default: wkhtmltopdf)
  RUST_LOG                   Overrides the log filter
"#;

/// Generate exam-pass certificates in resumable batches.
#[derive(Parser, Debug)]
#[command(
    name = "certbatch",
    version,
    about = "Generate exam-pass certificates in resumable batches",
    long_about = "Turn a roster and a results sheet into one PDF holding a certificate for every \
passing candidate. Progress is checkpointed after each certificate, so an interrupted run \
resumes where it stopped.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Directory for rendered certificates, the document and the PDF.
    #[arg(long, global = true, env = "CERTBATCH_GEN_DIR", default_value = "gens")]
    gen_dir: PathBuf,

    /// Directory the source sheets are staged into during a run.
    #[arg(long, global = true, env = "CERTBATCH_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Checkpoint file.
    #[arg(long, global = true, env = "CERTBATCH_CHECKPOINT", default_value = "checkpoint.json")]
    checkpoint: PathBuf,

    /// Certificate template image.
    #[arg(
        long,
        global = true,
        env = "CERTBATCH_TEMPLATE",
        default_value = "certificate-template.png"
    )]
    template: PathBuf,

    /// Number of certificates rendered at once.
    #[arg(short, long, global = true, env = "CERTBATCH_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// What a failed certificate does to the batch.
    #[arg(long, global = true, env = "CERTBATCH_POLICY", value_enum, default_value = "fail-fast")]
    policy: PolicyArg,

    /// Program converting the assembled HTML document to PDF.
    #[arg(long, global = true, env = "CERTBATCH_CONVERTER")]
    converter: Option<String>,

    /// Converter arguments; `{input}` and `{output}` are substituted.
    #[arg(
        long = "converter-arg",
        global = true,
        env = "CERTBATCH_CONVERTER_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    converter_args: Vec<String>,

    /// Output structured JSON instead of text.
    #[arg(long, global = true, env = "CERTBATCH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "CERTBATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CERTBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CERTBATCH_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate (or resume) a batch.
    Run(RunArgs),
    /// Show where the last batch stopped.
    Status,
    /// Delete generated files, staged sheets and the checkpoint.
    Delete,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Master roster sheet.
    #[arg(long, env = "CERTBATCH_ROSTER")]
    roster: PathBuf,

    /// Exam results sheet.
    #[arg(long, env = "CERTBATCH_RESULTS")]
    results: PathBuf,

    /// Exam session as printed, e.g. "MAY 2024".
    #[arg(long, env = "CERTBATCH_YEAR")]
    year: String,

    /// Course name as printed.
    #[arg(long, env = "CERTBATCH_COURSE")]
    course: String,

    /// Semester number (printed in Roman numerals).
    #[arg(long, env = "CERTBATCH_SEMESTER",
          value_parser = clap::value_parser!(u32).range(1..=3999))]
    semester: u32,

    /// Also copy the finished PDF to this path.
    #[arg(short, long, env = "CERTBATCH_OUTPUT")]
    output: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PolicyArg {
    FailFast,
    BestEffort,
}

impl From<PolicyArg> for RenderPolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::FailFast => RenderPolicy::FailFast,
            PolicyArg::BestEffort => RenderPolicy::BestEffort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while a batch runs.
    let show_progress =
        matches!(cli.command, Command::Run(_)) && !g.quiet && !g.no_progress && !g.json;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
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

    match cli.command {
        Command::Run(ref args) => run(g, args, show_progress).await,
        Command::Status => status(g),
        Command::Delete => delete(g),
    }
}

async fn run(g: &GlobalArgs, args: &RunArgs, show_progress: bool) -> Result<()> {
    let progress = if show_progress {
        Some(CliProgressCallback::new_dynamic())
    } else {
        None
    };
    let pipeline = build_pipeline(
        g,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn PipelineProgressCallback>),
    )?;

    // Mirror the pipeline's status message onto the bar.
    let mirror = progress
        .as_ref()
        .map(|cb| spawn_status_mirror(pipeline.status_reporter(), cb.bar.clone()));

    let inputs = BatchInputs::new(&args.roster, &args.results);
    let params = BatchParams::new(&args.year, &args.course, args.semester);
    let result = pipeline.run(&inputs, &params).await;

    if let Some(handle) = mirror {
        handle.abort();
    }
    if let Some(ref cb) = progress {
        cb.bar.finish_and_clear();
    }

    let output = result.context("Certificate generation failed")?;

    if let Some(ref dest) = args.output {
        tokio::fs::copy(&output.output_path, dest)
            .await
            .with_context(|| format!("Failed to copy PDF to {}", dest.display()))?;
    }

    if g.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if !g.quiet {
        print_summary(&output, args.output.as_ref());
    }
    Ok(())
}

fn print_summary(output: &BatchOutput, copied_to: Option<&PathBuf>) {
    let s = &output.stats;
    let skipped = s.skipped_records.len();
    eprintln!(
        "{}  {}/{} certificates  {} pages  {}ms  →  {}",
        if skipped == 0 { green("✔") } else { cyan("⚠") },
        s.total_records - skipped,
        s.total_records,
        s.pages,
        s.total_duration_ms,
        bold(&copied_to.unwrap_or(&output.output_path).display().to_string()),
    );
    eprintln!(
        "   {}",
        dim(&format!(
            "{} rendered, {} reused, resumed from {}",
            s.rendered, s.reused, output.resumed_from
        ))
    );
    if skipped > 0 {
        eprintln!("   missing: {}", red(&s.skipped_records.join(", ")));
    }
}

fn status(g: &GlobalArgs) -> Result<()> {
    let pipeline = build_pipeline(g, None)?;
    let status = pipeline
        .batch_status()
        .context("Failed to read checkpoint")?;

    if g.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialise status")?
        );
    } else if status.stage == Stage::Start && !status.checkpoint_exists {
        println!("No batch in progress.");
    } else {
        println!("Stage:        {}", status.stage);
        println!("Processed:    {}", status.processed);
        println!("Checkpoint:   {}", g.checkpoint.display());
    }
    Ok(())
}

fn delete(g: &GlobalArgs) -> Result<()> {
    let pipeline = build_pipeline(g, None)?;
    pipeline.delete_batch().context("Failed to delete batch")?;
    if !g.quiet {
        eprintln!("{} Files deleted successfully", green("✔"));
    }
    Ok(())
}

/// Map CLI args to a `Pipeline`.
fn build_pipeline(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<Pipeline> {
    let mut builder = PipelineConfig::builder()
        .gen_dir(&g.gen_dir)
        .upload_dir(&g.upload_dir)
        .checkpoint_path(&g.checkpoint)
        .template_path(&g.template)
        .concurrency(g.concurrency)
        .render_policy(g.policy.clone().into());

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let converter = match (&g.converter, g.converter_args.is_empty()) {
        (None, true) => CommandConverter::default(),
        (None, false) => CommandConverter::new("wkhtmltopdf", g.converter_args.clone()),
        (Some(program), true) => {
            CommandConverter::new(program, vec!["{input}".into(), "{output}".into()])
        }
        (Some(program), false) => CommandConverter::new(program, g.converter_args.clone()),
    };

    Ok(Pipeline::new(
        config,
        Arc::new(TemplateDrawer::new()),
        Arc::new(converter),
    ))
}

/// Copy the status message onto the bar every 250ms until aborted.
fn spawn_status_mirror(status: StatusReporter, bar: ProgressBar) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        let mut last = String::new();
        loop {
            tick.tick().await;
            let current = status.get();
            if current != last {
                bar.set_message(dim(&current));
                last = current;
            }
        }
    })
}
