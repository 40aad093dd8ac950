// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Meshfetch CLI
//!
//! Bulk download of RIPE Atlas measurement results, either of given
//! measurements or across the anchoring mesh, and repartitioning of the
//! downloaded files per probe.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use meshfetch_atlas::{DiskCache, RemoteClient};
use meshfetch_core::{default_dir, MeasurementAf, MeasurementType};
use meshfetch_core::FetchJob;
use meshfetch_pipeline::{
    default_destination, describe_path, plan_jobs, AnchoringMesh, CollisionMode, Fetcher,
    JobScheduler, MeasurementRef, MeshfetchConfig, PairFilter, Repartitioner, SelfPairs,
    UnpackFilter,
};
use meshfetch_storage::Dictionary;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "meshfetch")]
#[command(about = "Bulk fetcher for RIPE Atlas measurement results", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "MESHFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch measurement results into store files
    Fetch(FetchArgs),

    /// Repartition store files into one file per (measurement, probe)
    Unpack(UnpackArgs),

    /// Summarize store files
    Describe {
        /// Store file or directory
        path: PathBuf,

        /// zstd dictionary of compressed stores
        #[arg(long)]
        dictionary: Option<PathBuf>,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// Address family (4 or 6)
    #[arg(long, value_parser = parse_af)]
    af: MeasurementAf,

    /// Measurement type
    #[arg(long = "type")]
    measurement_type: MeasurementType,

    /// Measurement ID (repeatable); without one, the anchoring mesh is fetched
    #[arg(long = "msm-id")]
    msm_ids: Vec<u64>,

    /// Window start (RFC 3339)
    #[arg(long)]
    start_date: DateTime<Utc>,

    /// Window stop (RFC 3339)
    #[arg(long)]
    stop_date: DateTime<Utc>,

    /// Split the window into files of this many hours
    #[arg(long)]
    split: Option<i64>,

    /// Only fetch results of these probes (repeatable, with --msm-id)
    #[arg(long = "probe", requires = "msm_ids")]
    probes: Vec<u64>,

    /// Mesh: omit pairs whose source and target are the same anchor
    #[arg(long, conflicts_with_all = ["only_self", "msm_ids"])]
    no_self: bool,

    /// Mesh: keep only pairs whose source and target are the same anchor
    #[arg(long, conflicts_with = "msm_ids")]
    only_self: bool,

    /// Mesh: keep one direction of each anchor pair
    #[arg(long, conflicts_with = "msm_ids")]
    half: bool,

    /// Concurrent jobs
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Output directory (default: <type>_v<af>_<start>_<stop>)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Write zstd-compressed, indexed stores
    #[arg(long)]
    compress: bool,

    /// zstd dictionary for compressed stores
    #[arg(long)]
    dictionary: Option<PathBuf>,

    /// Print the planned files without fetching
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct UnpackArgs {
    /// Directory of fetched store files
    src: PathBuf,

    /// Output directory (default: <src>_pairs)
    dst: Option<PathBuf>,

    #[arg(long, value_parser = parse_af)]
    af: Option<MeasurementAf>,

    #[arg(long = "type")]
    measurement_type: Option<MeasurementType>,

    /// Only files starting at or after this date
    #[arg(long)]
    start_date: Option<DateTime<Utc>>,

    /// Only files stopping at or before this date
    #[arg(long)]
    stop_date: Option<DateTime<Utc>>,

    /// Measurements processed concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// What to do with outputs that already exist: append, overwrite or skip
    #[arg(long)]
    mode: Option<CollisionMode>,

    /// Records held in memory per partition window
    #[arg(long)]
    window_size: Option<usize>,

    /// Write zstd-compressed, indexed outputs
    #[arg(long)]
    compress: bool,

    /// zstd dictionary of compressed stores
    #[arg(long)]
    dictionary: Option<PathBuf>,
}

fn parse_af(value: &str) -> std::result::Result<MeasurementAf, String> {
    let value: u8 = value.parse().map_err(|_| format!("invalid address family {:?}", value))?;
    MeasurementAf::from_value(value).map_err(|e| e.to_string())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "meshfetch=debug" } else { "meshfetch=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_dictionary(path: Option<&Path>) -> Result<Option<Dictionary>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let dictionary = Dictionary::load(path)
        .with_context(|| format!("Failed to load dictionary {:?}", path))?;
    tracing::info!("Loaded dictionary {:?} ({} bytes)", path, dictionary.len());
    Ok(Some(dictionary))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = MeshfetchConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(path) = &cli.config {
        tracing::debug!("Using configuration {:?}", path);
    }

    match cli.command {
        Commands::Fetch(args) => fetch(&config, args).await,
        Commands::Unpack(args) => unpack(&config, args).await,
        Commands::Describe { path, dictionary } => describe(&path, dictionary.as_deref()),
    }
}

fn open_client(config: &MeshfetchConfig) -> Result<RemoteClient> {
    let cache = match &config.atlas.cache_dir {
        Some(cache_dir) => DiskCache::new(cache_dir.clone()),
        None => DiskCache::open_default(),
    }
    .context("Failed to open response cache")?;
    Ok(RemoteClient::new(config.client_config(), Arc::new(cache))?)
}

async fn plan_fetch(args: &FetchArgs, client: &RemoteClient) -> Result<Vec<FetchJob>> {
    let split = args.split.map(chrono::Duration::hours);
    if !args.msm_ids.is_empty() {
        let measurements: Vec<MeasurementRef> = args
            .msm_ids
            .iter()
            .map(|id| MeasurementRef::new(args.af, args.measurement_type, *id))
            .collect();
        return Ok(plan_jobs(
            &measurements,
            args.start_date,
            args.stop_date,
            split,
            &args.probes,
            args.compress,
        )?);
    }

    let self_pairs = if args.no_self {
        SelfPairs::Exclude
    } else if args.only_self {
        SelfPairs::Only
    } else {
        SelfPairs::Include
    };
    let filter = PairFilter {
        self_pairs,
        half: args.half,
    };
    let mesh = AnchoringMesh::from_api(client)
        .await
        .context("Failed to fetch the anchoring mesh")?;
    let jobs = mesh.plan(
        (args.af, args.measurement_type),
        (args.start_date, args.stop_date),
        split,
        &filter,
        args.compress,
    )?;
    if jobs.is_empty() {
        bail!(
            "No {} {} mesh measurement runs from {} to {}",
            args.measurement_type,
            args.af,
            args.start_date,
            args.stop_date
        );
    }
    Ok(jobs)
}

async fn fetch(config: &MeshfetchConfig, args: FetchArgs) -> Result<()> {
    let client = open_client(config)?;
    let jobs = plan_fetch(&args, &client).await?;
    tracing::info!("Planned {} jobs", jobs.len());
    let dir = args.dir.clone().unwrap_or_else(|| {
        PathBuf::from(default_dir(
            args.af,
            args.measurement_type,
            args.start_date,
            args.stop_date,
        ))
    });

    if args.dry_run {
        for job in &jobs {
            println!("{}", dir.join(job.meta.filename()).display());
        }
        println!("{} files", jobs.len());
        return Ok(());
    }

    let dictionary = load_dictionary(
        args.dictionary
            .as_deref()
            .or(config.fetch.dictionary.as_deref()),
    )?;
    let fetcher = Fetcher::new(client, &dir)
        .with_retry(config.retry_policy())
        .with_dictionary(dictionary);

    let scheduler = JobScheduler::new(args.jobs.unwrap_or(config.fetch.jobs)).with_ctrl_c();
    let summary = scheduler.run(Arc::new(fetcher), jobs).await?;

    println!(
        "✓ {} fetched, {} already present, {} failed ({})",
        summary.fetched,
        summary.skipped,
        summary.failed,
        dir.display()
    );
    if summary.failed > 0 {
        bail!("{} of {} jobs failed", summary.failed, summary.total());
    }
    Ok(())
}

async fn unpack(config: &MeshfetchConfig, args: UnpackArgs) -> Result<()> {
    let dst = args.dst.unwrap_or_else(|| default_destination(&args.src));
    let dictionary = load_dictionary(
        args.dictionary
            .as_deref()
            .or(config.fetch.dictionary.as_deref()),
    )?;
    let filter = UnpackFilter {
        af: args.af,
        measurement_type: args.measurement_type,
        start_date: args.start_date,
        stop_date: args.stop_date,
    };

    let unpacker = Repartitioner::new(&args.src, &dst)
        .with_mode(args.mode.unwrap_or(config.unpack.mode))
        .with_window_size(args.window_size.unwrap_or(config.unpack.window_size))
        .compressed(args.compress)
        .with_filter(filter)
        .with_dictionary(dictionary);

    let scheduler = JobScheduler::new(args.jobs.unwrap_or(config.unpack.jobs)).with_ctrl_c();
    let stats = unpacker.run(&scheduler).await?;

    println!(
        "✓ {} records from {} measurements into {} pairs, {} pairs skipped ({})",
        stats.records,
        stats.measurements,
        stats.pairs_written,
        stats.pairs_skipped,
        dst.display()
    );
    if stats.failed > 0 {
        bail!("{} measurements failed", stats.failed);
    }
    Ok(())
}

fn describe(path: &Path, dictionary: Option<&Path>) -> Result<()> {
    let dictionary = load_dictionary(dictionary)?;
    let summaries = describe_path(path, dictionary.as_ref())
        .with_context(|| format!("Failed to read {:?}", path))?;

    let mut total = 0;
    for summary in &summaries {
        let name = summary.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        println!(
            "{:<60} {:>10} records {:>6} probes{}",
            name,
            summary.records,
            summary.probes,
            if summary.indexed { "  (indexed)" } else { "" }
        );
        if let Some(meta) = &summary.meta {
            println!(
                "    {} {}, {} to {}",
                meta.af,
                meta.measurement_type,
                meta.start_date(),
                meta.stop_date()
            );
        }
        total += summary.records;
    }
    println!("{} files, {} records", summaries.len(), total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const WINDOW: [&str; 4] = [
        "--start-date",
        "2019-01-01T00:00:00Z",
        "--stop-date",
        "2019-01-01T02:00:00Z",
    ];

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        let mut argv = vec!["meshfetch", "fetch", "--af", "4", "--type", "ping"];
        argv.extend_from_slice(&WINDOW);
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
    }

    fn fetch_args(cli: Cli) -> FetchArgs {
        match cli.command {
            Commands::Fetch(args) => args,
            _ => panic!("expected the fetch command"),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mesh_flags_exclude_measurement_ids() {
        assert!(parse(&["--no-self"]).is_ok());
        assert!(parse(&["--msm-id", "1001", "--half"]).is_err());
        assert!(parse(&["--no-self", "--only-self"]).is_err());
        assert!(parse(&["--probe", "7"]).is_err());
        assert!(parse(&["--msm-id", "1001", "--probe", "7"]).is_ok());
        assert!(parse(&["--af", "5"]).is_err());
    }

    #[tokio::test]
    async fn test_plan_given_measurements() {
        let cli = parse(&["--msm-id", "1001", "--msm-id", "1002", "--split", "1"]).unwrap();
        let args = fetch_args(cli);
        let config = meshfetch_atlas::ClientConfig::new("http://127.0.0.1:9/api/v2");
        let client = RemoteClient::new(config, Arc::new(meshfetch_atlas::NoCache)).unwrap();

        let jobs = plan_fetch(&args, &client).await.unwrap();
        let msm_ids: Vec<u64> = jobs.iter().map(|j| j.meta.msm_id).collect();
        assert_eq!(msm_ids, vec![1001, 1001, 1002, 1002]);
    }
}
