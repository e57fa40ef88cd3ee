use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use resgraph::collector::{CollectionTarget, HttpDescriber, LocalBlobStore};
use resgraph::config::Config;
use resgraph::loader::{BulkLoader, LoadOptions, LoadRequest, Parallelism};
use resgraph::mapping::MappingRegistry;
use resgraph::pipeline::{nodes_prefix, LoadTarget, Pipeline, PipelineContext, RunReport};
use resgraph::PipelineError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Exit code when a bulk load outlives its timeout.
const EXIT_TIMEOUT: u8 = 3;

/// Cloud resource inventory into a graph database
#[derive(Parser, Debug)]
#[command(name = "resgraph", version, about, long_about = None)]
struct Args {
    /// Config file (defaults to <config dir>/resgraph/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Local directory used as the staging bucket
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    /// URI the graph database uses for the staging directory (e.g. s3://bucket)
    #[arg(long, global = true)]
    uri_prefix: Option<String>,

    /// Stage prefix for raw snapshots
    #[arg(long, global = true)]
    stage: Option<String>,

    /// Extra mapping definition files (JSON or YAML)
    #[arg(long = "mappings", global = true)]
    mapping_files: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect raw snapshots for every account and region given
    Collect {
        #[command(flatten)]
        targets: TargetArgs,
        /// Role name in each customer account
        #[arg(long)]
        role: String,
        #[arg(long)]
        describer_url: Option<String>,
    },
    /// Relationalize and map stored snapshots into one staged vertex file
    Transform {
        #[command(flatten)]
        targets: TargetArgs,
        /// Reuse a run id instead of generating one
        #[arg(long)]
        run_id: Option<Uuid>,
    },
    /// Bulk load staged vertex files and wait for completion
    Load {
        /// Source URI to load; derived from --run-id when omitted
        #[arg(long, required_unless_present = "run_id")]
        source: Option<String>,
        #[arg(long)]
        run_id: Option<Uuid>,
        #[command(flatten)]
        loader: LoaderArgs,
    },
    /// Collect, transform and load in one run
    Run {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        describer_url: Option<String>,
        #[command(flatten)]
        loader: LoaderArgs,
        /// Stop after staging
        #[arg(long)]
        skip_load: bool,
    },
    /// List the available mapping definitions
    Mappings,
}

#[derive(clap::Args, Debug)]
struct SourceArgs {
    /// Customer account id
    #[arg(long)]
    account: String,
    /// Role name in the customer account
    #[arg(long)]
    role: String,
    #[arg(long)]
    region: Option<String>,
    #[arg(long, default_value = "ec2")]
    resource_type: String,
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Customer account id (repeatable)
    #[arg(long = "account", required = true)]
    accounts: Vec<String>,
    /// Region (repeatable, defaults to the configured region)
    #[arg(long = "region")]
    regions: Vec<String>,
    #[arg(long, default_value = "ec2")]
    resource_type: String,
}

#[derive(clap::Args, Debug)]
struct LoaderArgs {
    /// Loader endpoint, writer first (repeatable)
    #[arg(long = "endpoint")]
    endpoints: Vec<String>,
    /// Role the graph database assumes to read the staged files
    #[arg(long)]
    loader_role_arn: Option<String>,
    /// Region of the graph database (defaults to the configured region)
    #[arg(long)]
    loader_region: Option<String>,
    /// Seconds to wait for the load to finish
    #[arg(long)]
    timeout: Option<u64>,
    /// Seconds between status polls
    #[arg(long)]
    poll_interval: Option<u64>,
    #[arg(long, value_enum, default_value = "medium")]
    parallelism: ParallelismArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParallelismArg {
    Low,
    Medium,
    High,
    Oversubscribe,
}

impl From<ParallelismArg> for Parallelism {
    fn from(arg: ParallelismArg) -> Self {
        match arg {
            ParallelismArg::Low => Parallelism::Low,
            ParallelismArg::Medium => Parallelism::Medium,
            ParallelismArg::High => Parallelism::High,
            ParallelismArg::Oversubscribe => Parallelism::Oversubscribe,
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    // RUST_LOG directives refine the chosen level
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(tracing_level).into())
        .from_env_lossy();

    let (writer, guard, ansi) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, false)
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, true)
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(log_file.is_some())
        .with_line_number(log_file.is_some())
        .init();

    tracing::debug!("resgraph started with log level: {:?}", level);

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:?}");
            return ExitCode::FAILURE;
        }
    };

    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let timed_out = err
                .downcast_ref::<PipelineError>()
                .is_some_and(PipelineError::is_timeout);
            if timed_out {
                eprintln!("Timed out: {err:#}");
                eprintln!("The load may still be running; check its status before resubmitting.");
                ExitCode::from(EXIT_TIMEOUT)
            } else {
                eprintln!("Error: {err:?}");
                ExitCode::FAILURE
            }
        }
    }
}

async fn execute(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    if let Command::Mappings = args.command {
        let registry = load_registry(&config, &args.mapping_files)?;
        for def in registry.iter() {
            println!(
                "{}\t{}\t{}\t{}",
                def.resource_type,
                def.label,
                def.table,
                def.header().join(",")
            );
        }
        return Ok(());
    }

    let staging_dir = config.effective_staging_dir(args.staging_dir.as_deref());
    let mut store = LocalBlobStore::new(staging_dir);
    if let Some(prefix) = args
        .uri_prefix
        .as_deref()
        .or(config.staging_uri_prefix.as_deref())
    {
        store = store.with_uri_prefix(prefix);
    }
    let stage = config.effective_stage(args.stage.as_deref());
    let registry = load_registry(&config, &args.mapping_files)?;
    let pipeline = Pipeline::new(Arc::new(store), registry);

    match args.command {
        Command::Mappings => Ok(()),
        Command::Collect {
            targets,
            role,
            describer_url,
        } => {
            let resource_type = targets.resource_type.clone();
            let targets = targets.expand(&config, &role);
            let ctx = PipelineContext::new(first_target(&targets)?, &stage);
            let describer = describer(&config, describer_url.as_deref())?;
            let snapshots = pipeline
                .collect_many(&ctx, describer, &targets, &resource_type)
                .await?;
            for snapshot in &snapshots {
                println!(
                    "{}",
                    pipeline.store().uri(&snapshot.key.object_key(&ctx.stage))
                );
            }
            Ok(())
        }
        Command::Transform { targets, run_id } => {
            let resource_type = targets.resource_type.clone();
            // reading stored snapshots needs no role
            let targets = targets.expand(&config, "");
            let mut ctx = PipelineContext::new(first_target(&targets)?, &stage);
            if let Some(run_id) = run_id {
                ctx = ctx.with_run_id(run_id);
            }
            let staged = pipeline.transform_stored_many(&ctx, &targets, &resource_type)?;
            println!("run id:   {}", ctx.run_id);
            println!("vertices: {}", staged.file.len());
            println!("staged:   {}", pipeline.store().uri(&staged.key));
            Ok(())
        }
        Command::Load {
            source,
            run_id,
            loader,
        } => {
            let source = match (source, run_id) {
                (Some(source), _) => source,
                (None, Some(run_id)) => pipeline.store().uri(&nodes_prefix(run_id)),
                (None, None) => anyhow::bail!("either --source or --run-id is required"),
            };
            let target = loader.target(&config)?;
            let bulk = loader.bulk_loader(&config)?;

            let request = LoadRequest {
                source,
                role_arn: target.role_arn,
                region: target.region,
                endpoints: target.endpoints,
            };
            let (job, summary) = bulk
                .load(request, target.timeout)
                .await
                .map_err(PipelineError::from)?;
            println!("load id:   {}", job.load_id);
            println!("processed: {}", summary.rows_processed);
            println!("skipped:   {}", summary.rows_skipped);
            Ok(())
        }
        Command::Run {
            source,
            describer_url,
            loader,
            skip_load,
        } => {
            let ctx = PipelineContext::new(source.target(&config), &stage);
            let describer = describer(&config, describer_url.as_deref())?;

            let report = if skip_load {
                pipeline
                    .run(&ctx, describer, &source.resource_type, None)
                    .await?
            } else {
                let target = loader.target(&config)?;
                let bulk = loader.bulk_loader(&config)?;
                pipeline
                    .run(&ctx, describer, &source.resource_type, Some((&bulk, &target)))
                    .await?
            };
            print_report(&report);
            Ok(())
        }
    }
}

impl SourceArgs {
    fn target(&self, config: &Config) -> CollectionTarget {
        CollectionTarget::new(
            &self.account,
            &self.role,
            &config.effective_region(self.region.as_deref()),
        )
    }
}

impl TargetArgs {
    /// Every account in every region, accounts outermost.
    fn expand(&self, config: &Config, role: &str) -> Vec<CollectionTarget> {
        let regions = if self.regions.is_empty() {
            vec![config.effective_region(None)]
        } else {
            self.regions.clone()
        };
        self.accounts
            .iter()
            .flat_map(|account| {
                regions
                    .iter()
                    .map(move |region| CollectionTarget::new(account, role, region))
            })
            .collect()
    }
}

fn first_target(targets: &[CollectionTarget]) -> Result<CollectionTarget> {
    targets
        .first()
        .cloned()
        .context("at least one --account is required")
}

impl LoaderArgs {
    /// The graph database's region is independent of the collection region.
    fn target(&self, config: &Config) -> Result<LoadTarget> {
        Ok(LoadTarget {
            role_arn: config.effective_loader_role(self.loader_role_arn.as_deref())?,
            region: config.effective_region(self.loader_region.as_deref()),
            endpoints: config.effective_endpoints(&self.endpoints)?,
            timeout: config.effective_load_timeout(self.timeout),
        })
    }

    fn bulk_loader(&self, config: &Config) -> Result<BulkLoader> {
        let options = LoadOptions {
            poll_interval: config.effective_poll_interval(self.poll_interval),
            parallelism: self.parallelism.into(),
        };
        BulkLoader::new(options).context("building loader client")
    }
}

fn describer(config: &Config, cli: Option<&str>) -> Result<HttpDescriber> {
    let url = config.effective_describer_url(cli)?;
    Ok(HttpDescriber::new(&url)?)
}

fn load_registry(config: &Config, cli_files: &[PathBuf]) -> Result<MappingRegistry> {
    let mut registry = MappingRegistry::builtin().context("loading built-in mappings")?;
    for path in config.mapping_files.iter().chain(cli_files) {
        registry
            .load_file(path)
            .with_context(|| format!("loading mappings from {}", path.display()))?;
    }
    Ok(registry)
}

fn print_report(report: &RunReport) {
    println!("run id:   {}", report.run_id);
    println!("type:     {}", report.resource_type);
    println!("tables:   {}", report.tables);
    println!("vertices: {}", report.vertices);
    println!("staged:   {}", report.staged_uri);
    if let Some(load_id) = &report.load_id {
        println!("load id:  {}", load_id);
    }
    if let Some(summary) = &report.load_summary {
        println!(
            "loaded:   {} processed, {} skipped",
            summary.rows_processed, summary.rows_skipped
        );
    }
}
