//! Rigor Gate CLI
//!
//! The `rigor` command drives the guardrailed execution pipeline from a shell.
//!
//! ## Commands
//!
//! - `session`: open, close, list and prune analysis sessions
//! - `submit`: check a code file and run it if the rigor gate allows
//! - `log`: show a session's ledger
//! - `curate`: rebuild the reproducible script from successful steps
//! - `scan`: run the checkers only; nothing is executed or recorded
//! - `verify`: check a session ledger's numbering and hash chain

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

use rigor_core::metrics::METRICS;
use rigor_core::telemetry::init_tracing;
use rigor_core::{
    BoundsConfig, CancelHandle, DatasetSnapshot, RigorConfig, RigorPipeline, ScriptDialect,
    SessionId, SessionState, StaticInputs, SubmitRequest, SubmitResponse,
};
use rigor_ledger::{ExecutionRecord, Verdict};

#[derive(Parser)]
#[command(name = "rigor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Guardrailed execution for analyst-authored code", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: $RIGOR_HOME/config.toml, else .rigor/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage analysis sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Submit code for checking and, if the gate allows, execution
    Submit {
        /// Session to submit into
        session: String,

        /// File holding the code, or `-` for stdin
        code: PathBuf,

        /// Confirm the warnings reported for this code earlier
        #[arg(long)]
        confirmed: bool,

        /// Blocked record this confirmation answers (default: latest pending)
        #[arg(long, requires = "confirmed")]
        prior_seq: Option<u64>,

        /// Input file the code reads; becomes a parameter of the curated script
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        /// Dataset snapshot (JSON) the code runs against
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show a session's ledger
    Log {
        session: String,

        /// Show only the last N records
        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Rebuild the reproducible analysis script from successful steps
    Curate {
        session: String,

        /// Write the script into the session output directory
        #[arg(long)]
        save: bool,

        /// Script dialect (python or shell); overrides the config
        #[arg(long)]
        dialect: Option<ScriptDialect>,
    },

    /// Run the checkers on a code file without executing or recording it
    Scan {
        code: PathBuf,

        /// Dataset snapshot (JSON) to validate alongside the code
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check a session ledger's numbering and hash chain
    Verify { session: String },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Open a new session
    Open {
        /// Session id (default: random)
        #[arg(long)]
        id: Option<String>,
    },
    /// Close a session; its log stays readable
    Close { session: String },
    /// List known sessions
    List,
    /// Close sessions idle for longer than the given time
    Prune {
        /// Idle time in seconds
        #[arg(long, default_value = "3600")]
        idle_secs: u64,
    },
}

/// Dataset snapshot file accepted by `submit` and `scan`.
///
/// ```json
/// {
///   "columns": { "voltage": [0.12, 0.31, null] },
///   "measurements": { "temperature": 412.0 },
///   "bounds": { "temperature": { "min": 0.0, "max": 1000.0 } }
/// }
/// ```
///
/// `null` samples stand for NaN. `bounds` is layered over the configured
/// bounds table.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DatasetFile {
    columns: BTreeMap<String, Vec<Option<f64>>>,
    measurements: BTreeMap<String, f64>,
    bounds: BoundsConfig,
}

impl DatasetFile {
    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset file: {:?}", path))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse dataset file: {:?}", path))
    }

    fn snapshot(&self) -> DatasetSnapshot {
        let mut snapshot = DatasetSnapshot::new();
        for (name, samples) in &self.columns {
            let values: Vec<f64> = samples.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            snapshot = snapshot.with_values(name.clone(), &values);
        }
        snapshot.measurements = self.measurements.clone();
        snapshot
    }

    fn bounds_over(&self, base: &BoundsConfig) -> BoundsConfig {
        let mut bounds = base.clone();
        bounds.update(&self.bounds);
        bounds
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config =
        RigorConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Session { action } => {
            let pipeline = open_pipeline(&config, None).await?;
            match action {
                SessionAction::Open { id } => cmd_session_open(&pipeline, id).await,
                SessionAction::Close { session } => {
                    cmd_session_close(&pipeline, &SessionId::from(session)).await
                }
                SessionAction::List => cmd_session_list(&pipeline),
                SessionAction::Prune { idle_secs } => {
                    cmd_session_prune(&pipeline, Duration::from_secs(idle_secs)).await
                }
            }
        }
        Commands::Submit {
            session,
            code,
            confirmed,
            prior_seq,
            inputs,
            dataset,
            format,
        } => {
            let dataset = dataset.as_deref().map(DatasetFile::read).transpose()?;
            let pipeline = open_pipeline(&config, dataset.as_ref()).await?;
            let mut request = SubmitRequest::new(read_code(&code)?)
                .confirmed(confirmed)
                .inputs(inputs);
            if let Some(seq) = prior_seq {
                request = request.prior_seq(seq);
            }
            cmd_submit(&pipeline, &SessionId::from(session), request, format).await
        }
        Commands::Log {
            session,
            limit,
            format,
        } => {
            let pipeline = open_pipeline(&config, None).await?;
            cmd_log(&pipeline, &SessionId::from(session), limit, format).await
        }
        Commands::Curate {
            session,
            save,
            dialect,
        } => {
            if let Some(dialect) = dialect {
                config.curator.dialect = dialect;
            }
            let pipeline = open_pipeline(&config, None).await?;
            cmd_curate(&pipeline, &SessionId::from(session), save).await
        }
        Commands::Scan {
            code,
            dataset,
            format,
        } => {
            let dataset = dataset.as_deref().map(DatasetFile::read).transpose()?;
            cmd_scan(&config, &read_code(&code)?, dataset.as_ref(), format)
        }
        Commands::Verify { session } => {
            let pipeline = open_pipeline(&config, None).await?;
            cmd_verify(&pipeline, &SessionId::from(session)).await
        }
    }
}

/// Build the pipeline, with the dataset file as every session's snapshot.
async fn open_pipeline(config: &RigorConfig, dataset: Option<&DatasetFile>) -> Result<RigorPipeline> {
    let pipeline = RigorPipeline::from_config(config)
        .await
        .with_context(|| format!("Failed to open data root {:?}", config.data_root()))?;
    let Some(dataset) = dataset else {
        return Ok(pipeline);
    };
    let inputs = StaticInputs::new()
        .with_default_bounds(dataset.bounds_over(&config.bounds))
        .with_default_snapshot(dataset.snapshot());
    Ok(pipeline.with_inputs(Arc::new(inputs)))
}

fn read_code(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read code from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read code file: {:?}", path))
}

async fn cmd_session_open(pipeline: &RigorPipeline, id: Option<String>) -> Result<()> {
    let session = match id {
        Some(id) => pipeline.open_session_with_id(SessionId::from(id)).await?,
        None => pipeline.open_session().await?,
    };
    println!("Opened session {}", session.id);
    println!("Output directory: {}", session.output_dir.display());
    Ok(())
}

async fn cmd_session_close(pipeline: &RigorPipeline, id: &SessionId) -> Result<()> {
    let session = pipeline.close_session(id).await?;
    let records = pipeline.get_log(id).await?;
    println!(
        "Closed session {} ({} record(s) kept)",
        session.id,
        records.len()
    );
    Ok(())
}

fn cmd_session_list(pipeline: &RigorPipeline) -> Result<()> {
    let sessions = pipeline.sessions();
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in sessions {
        let state = match session.state {
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        println!(
            "{:<36}  {:<6}  last activity {}  {}",
            session.id,
            state,
            session.last_activity_at.format("%Y-%m-%d %H:%M:%S UTC"),
            session.output_dir.display()
        );
    }
    Ok(())
}

async fn cmd_session_prune(pipeline: &RigorPipeline, max_idle: Duration) -> Result<()> {
    let closed = pipeline.close_idle(max_idle).await?;
    if closed.is_empty() {
        println!("No idle sessions");
    }
    for id in closed {
        println!("Closed idle session {}", id);
    }
    Ok(())
}

async fn cmd_submit(
    pipeline: &RigorPipeline,
    session: &SessionId,
    request: SubmitRequest,
    format: Format,
) -> Result<()> {
    let cancel = CancelHandle::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let submitted = pipeline.submit_with_cancel(session, request, &cancel).await;
    ctrl_c.abort();
    METRICS.flush();

    let response = match submitted {
        Ok(response) => response,
        Err(e) if e.correlation_id().is_some() => {
            error!(error = ?e, "submission failed");
            bail!("{}", e.public_message());
        }
        Err(e) => return Err(e).context("Submission failed"),
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        Format::Text => print!("{}", render_response(&response)),
    }
    Ok(())
}

/// Review message followed by whatever the run produced.
fn render_response(response: &SubmitResponse) -> String {
    let mut out = response.review_message();
    let Some(result) = &response.result else {
        return out;
    };
    let output = &result.output;
    if let Some(code) = output.exit_code {
        let _ = writeln!(out, "Exit code: {code}");
    }
    if !output.stdout.is_empty() {
        let _ = writeln!(out, "--- stdout ---\n{}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        let _ = writeln!(out, "--- stderr ---\n{}", output.stderr.trim_end());
    }
    if output.truncated {
        out.push_str("(output truncated)\n");
    }
    for artifact in &output.artifacts {
        let _ = writeln!(
            out,
            "Artifact: {} ({} bytes) {}",
            artifact.name, artifact.bytes, artifact.path
        );
    }
    out
}

async fn cmd_log(
    pipeline: &RigorPipeline,
    session: &SessionId,
    limit: Option<usize>,
    format: Format,
) -> Result<()> {
    let records = pipeline.get_log(session).await?;
    let skip = limit.map_or(0, |n| records.len().saturating_sub(n));
    let shown = &records[skip..];

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(shown)?),
        Format::Text if shown.is_empty() => println!("No records for session {}", session),
        Format::Text => print!("{}", render_log(shown)),
    }
    Ok(())
}

fn render_log(records: &[ExecutionRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let confirmation = serde_json::to_value(record.confirmation)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        let _ = write!(out, "record {}  {}  {}", record.seq, record.outcome, confirmation);
        if let Some(prior) = record.prior_seq {
            let _ = write!(out, " (answers #{prior})");
        }
        out.push('\n');
        let _ = writeln!(out, "Attempt: {}", record.attempt_id);
        let _ = writeln!(
            out,
            "Date:    {}",
            record.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(failure) = &record.failure {
            let _ = writeln!(out, "Failure: {failure}");
        }
        let verdict = record.verdict();
        if !verdict.is_empty() {
            out.push_str("Findings:\n");
            out.push_str(&render_findings(&verdict));
        }
        out.push('\n');
        for line in record.code.lines() {
            let _ = writeln!(out, "    {line}");
        }
        out.push('\n');
    }
    out
}

fn render_findings(verdict: &Verdict) -> String {
    let mut out = String::new();
    for finding in verdict.iter() {
        let _ = write!(
            out,
            "  [{}] {}: {}",
            finding.severity, finding.rule_id, finding.message
        );
        if let Some(subject) = &finding.subject {
            let _ = write!(out, " ({subject})");
        }
        out.push('\n');
    }
    out
}

async fn cmd_curate(pipeline: &RigorPipeline, session: &SessionId, save: bool) -> Result<()> {
    if save {
        let (path, script) = pipeline.save_curated_script(session).await?;
        info!(path = %path.display(), "curated script saved");
        println!(
            "Wrote {} ({} step(s), {} superseded)",
            path.display(),
            script.selected.len(),
            script.dropped.len()
        );
    } else {
        let script = pipeline.curate_script(session).await?;
        print!("{}", script.text);
    }
    Ok(())
}

fn cmd_scan(
    config: &RigorConfig,
    code: &str,
    dataset: Option<&DatasetFile>,
    format: Format,
) -> Result<()> {
    let guardrails = config.guardrails().context("Invalid scanner configuration")?;
    let (snapshot, bounds) = match dataset {
        Some(dataset) => (dataset.snapshot(), dataset.bounds_over(&config.bounds)),
        None => (DatasetSnapshot::new(), config.bounds.clone()),
    };
    let verdicts = guardrails.check(code, &snapshot, &bounds);

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&verdicts)?);
        return Ok(());
    }
    let verdict = verdicts.merged();
    if verdict.is_empty() {
        println!("No findings");
        return Ok(());
    }
    print!("{}", render_findings(&verdict));
    let summary = if verdict.has_critical() {
        "Would be blocked: CRITICAL findings cannot be confirmed away."
    } else if verdict.has_warnings() {
        "Would need confirmation before running."
    } else {
        "Would run; informational findings only."
    };
    println!("{summary}");
    Ok(())
}

async fn cmd_verify(pipeline: &RigorPipeline, session: &SessionId) -> Result<()> {
    let count = pipeline
        .verify_log(session)
        .await
        .with_context(|| format!("Ledger verification failed for session {}", session))?;
    println!("Ledger for session {} verified: {} record(s)", session, count);
    Ok(())
}
