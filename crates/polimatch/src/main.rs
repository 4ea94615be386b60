//! pm: polimatch command-line interface
//!
//! Find the legislators whose voting record matches your answers.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{ArgAction, Args, Parser, Subcommand};

use polimatch_core::aggregation::Importance;
use polimatch_core::config::{Config, LogFormat};
use polimatch_core::error::format_error_with_remediation;
use polimatch_core::latent_space::{
    ArtifactSpaceProvider, LatentSpaceProvider, SpaceArtifact, SpaceId, space_key,
};
use polimatch_core::logging::{LogLevel, init_logging};
use polimatch_core::orchestrator::run_all;
use polimatch_core::storage::ResultStore;

mod output;
mod respondent;

use output::{OutputFormat, SpaceReport};
use respondent::LineRespondent;

#[derive(Parser)]
#[command(name = "pm")]
#[command(version, about = "Match your views against legislators' voting records")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty or json
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Config file (defaults to $PM_CONFIG, then the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe the latent spaces in an artifact
    Inspect(InspectArgs),

    /// Answer bill questions and get your closest legislators
    Quiz(QuizArgs),

    /// Show stored runs, or one run's global ranking
    Results(ResultsArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct InspectArgs {
    /// Latent space artifact (JSON)
    artifact: PathBuf,

    /// Only this cluster label
    #[arg(long)]
    label: Option<String>,

    /// Representative bills per dimension
    #[arg(long, default_value_t = 3)]
    top: usize,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
struct QuizArgs {
    /// Latent space artifact (JSON)
    artifact: PathBuf,

    /// Cluster labels to cover, in order (default: every usable label)
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    /// Store the finished run in this SQLite database
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Members to show in the final ranking
    #[arg(long, default_value_t = 10)]
    top: usize,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
struct ResultsArgs {
    /// SQLite database written by `pm quiz --db`
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Run id; lists stored runs when omitted
    #[arg(long)]
    run: Option<String>,

    #[arg(long, default_value_t = 10)]
    top: usize,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<polimatch_core::Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).map_err(polimatch_core::Error::from)?;

    let mut log_config = config.logging.clone();
    if cli.verbose > 0 {
        log_config.level = LogLevel::from_verbosity(cli.verbose).as_str().to_string();
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config).context("failed to initialize logging")?;

    match cli.command {
        Commands::Inspect(args) => inspect(&args),
        Commands::Quiz(args) => quiz(&config, &args),
        Commands::Results(args) => results(&config, &args),
        Commands::Config => {
            let text = config.to_toml_string().map_err(polimatch_core::Error::from)?;
            print!("{text}");
            Ok(())
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}

fn inspect(args: &InspectArgs) -> anyhow::Result<()> {
    let artifact = SpaceArtifact::load(&args.artifact)?;
    let labels: Vec<&str> = match &args.label {
        Some(label) => vec![label.as_str()],
        None => artifact.labels(),
    };

    let mut reports = Vec::with_capacity(labels.len());
    for label in labels {
        match artifact.space(label) {
            Ok(space) => reports.push(SpaceReport::usable(&space, args.top)),
            Err(err @ polimatch_core::Error::Configuration(_)) => reports.push(
                SpaceReport::unusable(space_key(&artifact.cluster_id, label), err.to_string()),
            ),
            Err(err) => return Err(err.into()),
        }
    }

    match args.format {
        OutputFormat::Json => print_json(&reports),
        OutputFormat::Plain => {
            let text = output::render_space_reports(&reports, |bill_id| {
                artifact.bill_metadata.get(bill_id).cloned()
            });
            print!("{text}");
            Ok(())
        }
    }
}

fn quiz(config: &Config, args: &QuizArgs) -> anyhow::Result<()> {
    let artifact = SpaceArtifact::load(&args.artifact)?;
    let provider = ArtifactSpaceProvider::from_artifact(&artifact);

    let space_ids: Vec<SpaceId> = if args.labels.is_empty() {
        provider.usable_space_ids()
    } else {
        args.labels
            .iter()
            .map(|label| space_key(&artifact.cluster_id, label.trim()))
            .collect()
    };
    if space_ids.is_empty() {
        bail!("{} has no usable latent spaces", args.artifact.display());
    }
    for space_id in &space_ids {
        provider.space(space_id)?;
    }

    let stdin = io::stdin();
    let mut respondent = LineRespondent::new(stdin.lock(), io::stderr())
        .with_default_importance(
            Importance::new(config.engine.default_importance).map_err(polimatch_core::Error::from)?,
        );
    let summary = run_all(provider, &space_ids, &config.engine, &mut respondent)?;
    tracing::info!(
        run_id = %summary.run_id,
        spaces = summary.results.len(),
        skipped = summary.skipped_spaces.len(),
        "Run finished"
    );

    if let Some(path) = db_path(config, args.db.as_deref()) {
        let mut store = ResultStore::open(&path)?;
        store.record_run(&summary)?;
        eprintln!("Saved run {} to {}", summary.run_id, path.display());
    }

    match args.format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Plain => {
            let text = output::render_global(summary.run_id.as_str(), &summary.global, args.top);
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            Ok(())
        }
    }
}

fn results(config: &Config, args: &ResultsArgs) -> anyhow::Result<()> {
    let Some(path) = db_path(config, args.db.as_deref()) else {
        bail!("no database given; pass --db or set storage.db_path in the config file");
    };
    if !path.exists() {
        bail!("database not found: {}", path.display());
    }
    let store = ResultStore::open(&path)?;

    match &args.run {
        None => {
            let runs = store.list_runs()?;
            match args.format {
                OutputFormat::Json => print_json(&runs),
                OutputFormat::Plain => {
                    print!("{}", output::render_runs(&runs));
                    Ok(())
                }
            }
        }
        Some(run_id) => {
            let results = store.load_cluster_results(run_id)?;
            if results.is_empty() {
                return Err(polimatch_core::Error::NotFound {
                    kind: "run",
                    id: run_id.clone(),
                }
                .into());
            }
            let global = polimatch_core::aggregation::aggregate(&results);
            match args.format {
                OutputFormat::Json => print_json(&global),
                OutputFormat::Plain => {
                    print!("{}", output::render_global(run_id, &global, args.top));
                    Ok(())
                }
            }
        }
    }
}

fn db_path(config: &Config, explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| config.storage.db_path.clone())
}
