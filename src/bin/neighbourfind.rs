//! `neighbourfind`: CLI wiring for the `neighbourfind` core library.
//! `serve`, `insert`, `distance`, `cluster-summary` subcommands, built on
//! `clap`'s `#[derive(Args)]`/`#[derive(Subcommand)]`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use neighbourfind::config::BootstrapConfig;
use neighbourfind::durable::sled_store::SledStore;
use neighbourfind::durable::DurableStore;
use neighbourfind::graph::ClusterPolicy;
use neighbourfind::logging::{init_logging, LogFormat};
use neighbourfind::mask::Mask;
use neighbourfind::reference::Reference;
use neighbourfind::{fasta, http, NeighbourFindService};

#[derive(Parser)]
#[command(name = "neighbourfind", about = "Reference-compressed bacterial genome neighbour store")]
struct Cli {
    /// Path to the bootstrap TOML config (reference, mask, thresholds, policies).
    #[arg(long, global = true)]
    config: PathBuf,

    /// Path to the sled database directory.
    #[arg(long, global = true)]
    db_path: PathBuf,

    #[arg(long, global = true, value_enum, default_value = "pretty", help_heading = "Logging")]
    log_format: LogFormat,

    #[arg(long, global = true, help_heading = "Logging")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP surface.
    Serve {
        #[arg(long, default_value = "0.0.0.0:5000")]
        addr: SocketAddr,
    },
    /// Insert every record of a Fasta file.
    Insert {
        #[arg(long)]
        fasta: PathBuf,
    },
    /// Print the SNP distance between two already-stored guids.
    Distance { a: String, b: String },
    /// Print cluster membership for a configured policy.
    ClusterSummary {
        #[arg(long)]
        policy: String,
    },
}

fn build_service(cli: &Cli) -> anyhow::Result<Arc<NeighbourFindService>> {
    let config = BootstrapConfig::load(&cli.config).context("loading bootstrap config")?;
    let reference_raw = fasta::read_reference(&config.reference_path).context("reading reference fasta")?;
    let reference = Reference::new(&reference_raw)?;
    let mask_positions = match &config.mask_path {
        Some(path) => fasta::read_mask_positions(path).context("reading mask file")?,
        None => Vec::new(),
    };
    let mask = Mask::new(reference.len(), mask_positions);

    let durable: Arc<dyn DurableStore> =
        Arc::new(SledStore::open(&cli.db_path, 100).context("opening sled database")?);
    config
        .check_or_initialize(durable.as_ref(), &reference_hash(&reference_raw), &mask.hash())
        .context("checking persisted config compatibility")?;

    let policies: Vec<ClusterPolicy> = config.policies.iter().map(ClusterPolicy::from).collect();
    let num_workers = if config.num_workers == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        config.num_workers
    };

    Ok(Arc::new(NeighbourFindService::new(
        reference,
        mask,
        config.max_ns,
        config.snp_ceiling,
        config.snp_compression_ceiling,
        config.recompress_frequency,
        config.recompress_cutoff_prop,
        policies,
        durable,
        num_workers,
    )))
}

fn reference_hash(raw: &str) -> String {
    blake3::hash(raw.as_bytes()).to_hex().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logging_guard = init_logging(cli.log_file.as_deref(), cli.log_format)?;

    let service = build_service(&cli)?;

    match &cli.command {
        Command::Serve { addr } => {
            tracing::info!(%addr, "starting neighbourfind HTTP surface");
            let listener = tokio::net::TcpListener::bind(*addr).await?;
            axum::serve(listener, http::router(service)).await?;
        }
        Command::Insert { fasta: fasta_path } => {
            let samples = fasta::read_samples(fasta_path).context("reading samples fasta")?;
            let bar = indicatif::ProgressBar::new(samples.len() as u64);
            for sample in samples {
                let outcome = service.insert(&sample.guid, &sample.sequence)?;
                tracing::info!(guid = %sample.guid, outcome = ?outcome, "inserted");
                bar.inc(1);
            }
            bar.finish();
        }
        Command::Distance { a, b } => match service.distance(a, b, usize::MAX)? {
            Some(d) => println!("{d}"),
            None => println!("one or both guids are invalid"),
        },
        Command::ClusterSummary { policy } => {
            for cluster_id in service.cluster_ids(policy)? {
                let members = service.cluster_members(policy, &cluster_id)?;
                println!("{cluster_id}\t{}", members.join(","));
            }
        }
    }

    Ok(())
}
