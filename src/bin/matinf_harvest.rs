use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use matinf_harvest::config::{ConfigLoader, QueryConfig, ResolvedConfig};
use matinf_harvest::criteria::{CompositionMatch, Criterion, ElementCriteria};
use matinf_harvest::domain::parse_object_ids;
use matinf_harvest::error::HarvestError;
use matinf_harvest::links::fetch_linked_objects;
use matinf_harvest::output::{HumanOutput, JsonOutput, LogSink, OutputMode};
use matinf_harvest::pipeline::{Pipeline, PipelineRequest, ProgressSink};
use matinf_harvest::presence::filter_by_presence;
use matinf_harvest::remote::{RemoteExecutor, VroHttpClient};
use matinf_harvest::store::{RunStore, create_run_dir};

const DEFAULT_RUNS_DIR: &str = "runs";

#[derive(Parser)]
#[command(name = "matinf-harvest")]
#[command(about = "Filter MatInf samples by linked types and composition, then download their files")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    service_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the full pipeline and download linked files")]
    Run(RunArgs),
    #[command(about = "List samples and their linked objects without filtering")]
    Objects(QueryArgs),
    #[command(about = "Filter explicit sample ids by element presence")]
    Elements(ElementsArgs),
    #[command(about = "Execute a raw SQL query against MatInf")]
    Execute(ExecuteArgs),
}

#[derive(Args, Clone)]
struct QueryArgs {
    #[arg(long = "sample-type")]
    sample_type: Option<String>,

    #[arg(long = "associated-type")]
    associated_type: Vec<String>,

    /// First creation date, YYYY-MM-DD.
    #[arg(long)]
    from: Option<String>,

    /// Last creation date (inclusive), YYYY-MM-DD.
    #[arg(long)]
    to: Option<String>,

    /// Keep only samples linked to every associated type.
    #[arg(long)]
    strict: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    query: QueryArgs,

    /// `Pt` for presence or `Pt=10:20` for a percentage range.
    #[arg(long)]
    element: Vec<Criterion>,

    #[arg(long = "match", value_enum)]
    match_mode: Option<CompositionMatch>,

    /// Output directory; defaults to a fresh directory under ./runs.
    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct ElementsArgs {
    /// Comma-separated sample ids.
    #[arg(long)]
    ids: String,

    #[arg(long, required = true)]
    element: Vec<Criterion>,
}

#[derive(Args)]
struct ExecuteArgs {
    sql: String,
}

fn main() -> std::process::ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return std::process::ExitCode::from(map_exit_code(error));
        }
        return std::process::ExitCode::from(1);
    }
    std::process::ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error.root() {
        HarvestError::InvalidCriteria(_)
        | HarvestError::InvalidDate(_)
        | HarvestError::InvalidObjectId(_)
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::MissingApiKey => 2,
        HarvestError::RemoteHttp(_)
        | HarvestError::RemoteStatus { .. }
        | HarvestError::MalformedResponse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(url) = cli.service_url {
        resolved.service.url = url;
    }
    if let Some(secs) = cli.timeout {
        resolved.service.timeout = Duration::from_secs(secs);
    }

    match cli.command {
        Commands::Run(args) => run_pipeline_command(args, resolved, output_mode),
        Commands::Objects(args) => {
            let client = http_client(&resolved)?;
            let request = build_request(&args, resolved.query.take())?;
            let linked = fetch_linked_objects(&client, &request.query, request.strict)?;
            JsonOutput::print_linked(&linked).into_diagnostic()
        }
        Commands::Elements(args) => {
            let client = http_client(&resolved)?;
            let ids = parse_object_ids(&args.ids)?;
            let criteria = ElementCriteria::new(args.element)?;
            let outcome = filter_by_presence(&client, &ids, &criteria)?;
            JsonOutput::print_presence(&outcome).into_diagnostic()
        }
        Commands::Execute(args) => {
            let client = http_client(&resolved)?;
            let rows = client.execute(&args.sql)?;
            JsonOutput::print_rows(&rows).into_diagnostic()
        }
    }
}

fn run_pipeline_command(
    args: RunArgs,
    mut resolved: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let mut request = build_request(&args.query, resolved.query.take())?;
    if !args.element.is_empty() {
        request.criteria = ElementCriteria::new(args.element)?;
    }
    if let Some(mode) = args.match_mode {
        request.composition_match = mode;
    }

    let client = http_client(&resolved)?;
    let root = match args.output {
        Some(path) => path,
        None => create_run_dir(Utf8Path::new(DEFAULT_RUNS_DIR))?,
    };
    let store = RunStore::new(root, resolved.output);
    let pipeline = Pipeline::new(&client, &client);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = pipeline.run(&request, &store, &JsonOutput)?;
            JsonOutput::print_result(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let sink: &dyn ProgressSink = &LogSink;
            let result = pipeline.run(&request, &store, sink)?;
            HumanOutput::print_result(&result).into_diagnostic()
        }
    }
}

/// Config query block first, command-line flags on top.
fn build_request(
    args: &QueryArgs,
    from_config: Option<QueryConfig>,
) -> Result<PipelineRequest, HarvestError> {
    let mut query = from_config.unwrap_or_default();
    if let Some(sample_type) = &args.sample_type {
        query.sample_typename = Some(sample_type.clone());
    }
    if !args.associated_type.is_empty() {
        query.associated_typenames = args.associated_type.clone();
    }
    if let Some(from) = &args.from {
        query.start_date = Some(from.clone());
    }
    if let Some(to) = &args.to {
        query.end_date = Some(to.clone());
    }
    if args.strict {
        query.strict = true;
    }
    query.into_request()
}

fn http_client(resolved: &ResolvedConfig) -> Result<VroHttpClient, HarvestError> {
    let service = &resolved.service;
    VroHttpClient::new(&service.url, service.require_api_key()?, service.timeout)
}
