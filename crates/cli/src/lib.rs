use anyhow::{Context as AnyhowContext, Result};
use bisect_engine::{
    try_acquire_run_lock, Candidate, ClassificationStore, OracleRunner, Scheduler, TokioLauncher,
};
use bisect_fs::CandidateTree;
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};

mod config;
mod report;

pub use config::BisectConfig;
use config::DEFAULT_CONFIG_FILE;
use report::{RunSummary, StatusOutput};

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "bisect")]
#[command(about = "Isolate the data files that make a process crash", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML). Defaults to ./bisect.toml when present
    #[arg(short, long, global = true, env = "BISECT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bisect unclassified candidates until every one is good or bad
    Run(RunArgs),

    /// Show persisted classifications and what is left to test
    Status(StatusArgs),

    /// List unclassified candidates
    Candidates(StatusArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Directory holding the full data set (overrides candidates.source_root)
    #[arg(long)]
    source_root: Option<PathBuf>,

    /// File-name suffix that marks a candidate (overrides candidates.suffix)
    #[arg(long)]
    suffix: Option<String>,

    /// Directory for good/bad classification files (overrides store.dir)
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[derive(Args)]
struct StatusArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Print JSON to stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Directory wiped and restaged before every trial (overrides trial.dir)
    #[arg(long)]
    trial_dir: Option<PathBuf>,

    /// Refuse to run unless the trial directory has this final name
    #[arg(long)]
    expected_dir_name: Option<String>,

    /// Subject executable (overrides subject.executable)
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Subject argument, repeatable (replaces subject.args)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Subject working directory (default: the executable's directory)
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Pass the subject's stdout/stderr through
    #[arg(long)]
    inherit_output: bool,

    /// Seconds the subject must survive for a trial to pass
    #[arg(long)]
    threshold_secs: Option<f64>,

    /// Seconds between liveness heartbeats
    #[arg(long)]
    poll_interval_secs: Option<f64>,

    /// Seconds to wait before retrying a failed trial-directory wipe
    #[arg(long)]
    wipe_retry_delay_secs: Option<f64>,

    /// Wipe attempts before giving up (0 = retry forever)
    #[arg(long)]
    max_wipe_attempts: Option<u32>,

    /// Print the run summary as JSON to stdout
    #[arg(long)]
    json: bool,
}

impl SourceArgs {
    fn apply(&self, config: &mut BisectConfig) {
        if let Some(root) = &self.source_root {
            config.candidates.source_root = Some(root.clone());
        }
        if let Some(suffix) = &self.suffix {
            config.candidates.suffix = Some(suffix.clone());
        }
        if let Some(dir) = &self.state_dir {
            config.store.dir = dir.clone();
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut BisectConfig) {
        self.source.apply(config);
        if let Some(dir) = &self.trial_dir {
            config.trial.dir = Some(dir.clone());
        }
        if let Some(name) = &self.expected_dir_name {
            config.trial.expected_dir_name = Some(name.clone());
        }
        if let Some(exe) = &self.executable {
            config.subject.executable = Some(exe.clone());
        }
        if !self.args.is_empty() {
            config.subject.args = self.args.clone();
        }
        if let Some(dir) = &self.working_dir {
            config.subject.working_dir = Some(dir.clone());
        }
        if self.inherit_output {
            config.subject.inherit_output = true;
        }
        if let Some(secs) = self.threshold_secs {
            config.oracle.success_threshold_secs = secs;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.oracle.poll_interval_secs = secs;
        }
        if let Some(secs) = self.wipe_retry_delay_secs {
            config.oracle.wipe_retry_delay_secs = secs;
        }
        if let Some(attempts) = self.max_wipe_attempts {
            config.oracle.max_wipe_attempts = attempts;
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<BisectConfig> {
    if let Some(path) = explicit {
        return BisectConfig::load(path);
    }
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.is_file() {
        return BisectConfig::load(default_path);
    }
    Ok(BisectConfig::default())
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout pure JSON.
    let json_output = match &cli.command {
        Commands::Run(args) => args.json,
        Commands::Status(args) | Commands::Candidates(args) => args.json,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            run(&config, args.json).await
        }
        Commands::Status(args) => {
            args.source.apply(&mut config);
            status(&config, args.json).await
        }
        Commands::Candidates(args) => {
            args.source.apply(&mut config);
            candidates(&config, args.json).await
        }
    }
}

async fn run(config: &BisectConfig, json: bool) -> Result<()> {
    let layout = config.trial_layout()?;
    let subject = config.subject_command()?;
    let settings = config.oracle_settings()?;
    let store_layout = config.store_layout();
    let tree = CandidateTree::new(config.source_root()?, config.suffix()?);
    let mut oracle = OracleRunner::new(layout, subject, settings, tree.clone(), TokioLauncher)?
        .guard_store(&store_layout)?;

    let _lock = try_acquire_run_lock(&store_layout.dir)
        .await
        .context("Failed to acquire run lock")?;
    let store = ClassificationStore::open(store_layout).await;
    let mut scheduler = Scheduler::from_enumerator(&tree, store)?;

    let report = scheduler
        .run(&mut oracle)
        .await
        .context("Bisection aborted; persisted classifications remain valid")?;

    let summary = RunSummary::new(report, scheduler.store());
    if json {
        print_stdout(&serde_json::to_string_pretty(&summary)?)
    } else {
        print_stdout(&summary.render_text())
    }
}

async fn load_status(config: &BisectConfig) -> Result<StatusOutput> {
    let source_root = config.source_root()?;
    let suffix = config.suffix()?;
    let store = ClassificationStore::open(config.store_layout()).await;
    let all = CandidateTree::enumerate(source_root, suffix)
        .with_context(|| format!("Failed to enumerate {}", source_root.display()))?;
    let unclassified: Vec<Candidate> = all
        .into_iter()
        .filter(|candidate| !store.is_classified(candidate))
        .collect();
    Ok(StatusOutput::new(source_root, suffix, &store, unclassified))
}

async fn status(config: &BisectConfig, json: bool) -> Result<()> {
    let output = load_status(config).await?;
    if json {
        print_stdout(&serde_json::to_string_pretty(&output)?)
    } else {
        print_stdout(&output.render_text())
    }
}

async fn candidates(config: &BisectConfig, json: bool) -> Result<()> {
    let output = load_status(config).await?;
    if json {
        print_stdout(&serde_json::to_string_pretty(&output.unclassified)?)
    } else {
        let lines: Vec<&str> = output.unclassified.iter().map(Candidate::as_str).collect();
        print_stdout(&lines.join("\n"))
    }
}
