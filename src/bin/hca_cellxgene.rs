use std::fs;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hca_cellxgene_exporter::assemble::{self, DatasetMetadata, MatrixAssembler};
use hca_cellxgene_exporter::batch::{self, BatchResolver, BatchRow, ObservationCache};
use hca_cellxgene_exporter::bundle;
use hca_cellxgene_exporter::config::{FailurePolicy, LibPrepPolicy, Overrides, RunConfig};
use hca_cellxgene_exporter::domain::BiomaterialId;
use hca_cellxgene_exporter::error::ExportError;
use hca_cellxgene_exporter::ingest::{IngestClient, IngestHttpClient};
use hca_cellxgene_exporter::observation::Observation;
use hca_cellxgene_exporter::report::RunReport;

#[derive(Parser)]
#[command(name = "hca-cellxgene")]
#[command(about = "Export HCA ingest metadata into cellxgene-ready observation tables and datasets")]
#[command(version, author)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long, global = true)]
    ingest_api: Option<String>,

    #[arg(long, global = true)]
    resolver_workers: Option<usize>,

    #[arg(long, global = true)]
    assembly_workers: Option<usize>,

    #[arg(long, global = true, value_enum)]
    lib_prep_policy: Option<LibPrepPolicy>,

    #[arg(long, global = true, value_enum)]
    on_failure: Option<FailurePolicy>,

    #[arg(short, long, global = true, default_value = "out")]
    output: Utf8PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve observations and write obs.csv")]
    Obs(ObsArgs),
    #[command(about = "Resolve observations, assemble matrices and write the dataset bundle")]
    Dataset(DatasetArgs),
}

#[derive(Args)]
struct ObsArgs {
    #[arg(long, conflicts_with = "uuid")]
    input: Option<Utf8PathBuf>,

    #[arg(long)]
    uuid: Option<BiomaterialId>,

    #[arg(long, requires = "uuid")]
    cell_type: Option<String>,

    #[arg(long, requires = "uuid", default_value_t = 1)]
    rows: usize,
}

#[derive(Args)]
struct DatasetArgs {
    #[arg(long)]
    input: Utf8PathBuf,

    #[arg(long)]
    title: String,

    #[arg(long)]
    x_normalization: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(export) = report.downcast_ref::<ExportError>() {
            return ExitCode::from(map_exit_code(export));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ExportError) -> u8 {
    match error {
        ExportError::InvalidBiomaterialId(_)
        | ExportError::BatchInput(_)
        | ExportError::Config(_)
        | ExportError::NotFound(_) => 2,
        ExportError::IngestHttp(_)
        | ExportError::IngestStatus { .. }
        | ExportError::Resolution { .. }
        | ExportError::Partial { .. } => 3,
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
    let config = RunConfig::resolve(Overrides {
        ingest_api: cli.common.ingest_api.clone(),
        resolver_workers: cli.common.resolver_workers,
        assembly_workers: cli.common.assembly_workers,
        lib_prep_policy: cli.common.lib_prep_policy,
        on_failure: cli.common.on_failure,
    })
    .into_diagnostic()?;

    let client = IngestHttpClient::new(&config.ingest_api).into_diagnostic()?;

    match cli.command {
        Commands::Obs(args) => run_obs(args, &cli.common.output, &config, &client),
        Commands::Dataset(args) => run_dataset(args, &cli.common.output, &config, &client),
    }
}

fn run_obs<C: IngestClient>(
    args: ObsArgs,
    out_dir: &Utf8Path,
    config: &RunConfig,
    client: &C,
) -> miette::Result<()> {
    let rows = obs_rows(&args).into_diagnostic()?;

    let cache = ObservationCache::new();
    let resolver = BatchResolver::new(client, config.lib_prep_policy, config.resolver_workers);
    let outcomes = resolver.resolve_rows(&rows, &cache);

    let mut report = RunReport::new("obs", rows.len());
    report.record_outcomes(&outcomes);

    if config.on_failure == FailurePolicy::Abort {
        if let Some(failure) = outcomes.iter().find_map(|outcome| outcome.as_ref().err()) {
            return Err(ExportError::Resolution {
                uuid: failure.uuid.clone(),
                message: failure.message.clone(),
            })
            .into_diagnostic();
        }
    }

    let observations: Vec<Observation> = outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().ok())
        .map(|resolved| resolved.observation.clone())
        .collect();

    let path = bundle::write_observations(out_dir, &observations).into_diagnostic()?;
    report.record_output(path.as_str());
    report.print().into_diagnostic()?;

    finish(&report)
}

fn run_dataset<C: IngestClient>(
    args: DatasetArgs,
    out_dir: &Utf8Path,
    config: &RunConfig,
    client: &C,
) -> miette::Result<()> {
    let text = fs::read_to_string(args.input.as_std_path())
        .map_err(|err| ExportError::Filesystem(format!("{}: {err}", args.input)))
        .into_diagnostic()?;
    let rows = batch::parse_rows(&text).into_diagnostic()?;

    let cache = ObservationCache::new();
    let resolver = BatchResolver::new(client, config.lib_prep_policy, config.resolver_workers);
    let outcomes = resolver.resolve_rows(&rows, &cache);

    let mut report = RunReport::new("dataset", rows.len());
    report.record_outcomes(&outcomes);

    if config.on_failure == FailurePolicy::Abort {
        if let Some(failure) = outcomes.iter().find_map(|outcome| outcome.as_ref().err()) {
            return Err(ExportError::Resolution {
                uuid: failure.uuid.clone(),
                message: failure.message.clone(),
            })
            .into_diagnostic();
        }
    }

    let requests = assemble::block_requests(&rows, &outcomes).into_diagnostic()?;
    let assembler = MatrixAssembler::new(config.assembly_workers).into_diagnostic()?;

    let mut blocks = Vec::new();
    for result in assembler.load_blocks(requests) {
        match result {
            Ok(block) => blocks.push(block),
            Err(failure) => {
                if config.on_failure == FailurePolicy::Abort {
                    return Err(failure.error).into_diagnostic();
                }
                report.record_block_failure(&failure);
            }
        }
    }

    let metadata = DatasetMetadata {
        schema_version: config.schema_version.clone(),
        title: args.title,
        x_normalization: args.x_normalization,
    };
    let dataset = assemble::concat(blocks, metadata).into_diagnostic()?;
    report.cells = Some(dataset.matrix.rows);

    let written = bundle::write_dataset(out_dir, &dataset).into_diagnostic()?;
    report.record_output(written.observations.as_str());
    report.record_output(written.matrix.as_str());
    report.record_output(written.metadata.as_str());
    report.print().into_diagnostic()?;

    finish(&report)
}

fn obs_rows(args: &ObsArgs) -> Result<Vec<BatchRow>, ExportError> {
    match (&args.input, &args.uuid) {
        (Some(input), None) => {
            let text = fs::read_to_string(input.as_std_path())
                .map_err(|err| ExportError::Filesystem(format!("{input}: {err}")))?;
            batch::parse_rows(&text)
        }
        (None, Some(uuid)) => {
            if args.rows == 0 {
                return Err(ExportError::BatchInput(
                    "rows must be at least 1".to_string(),
                ));
            }
            Ok(vec![
                BatchRow {
                    identifier: uuid.clone(),
                    cell_type: args.cell_type.clone(),
                    matrix: None,
                    barcodes: None,
                };
                args.rows
            ])
        }
        _ => Err(ExportError::BatchInput(
            "either --input or --uuid is required".to_string(),
        )),
    }
}

fn finish(report: &RunReport) -> miette::Result<()> {
    let failed = report.failed_rows();
    if failed > 0 {
        return Err(ExportError::Partial { failed }).into_diagnostic();
    }
    Ok(())
}
