//! vigil-notary node.
//!
//! Runs a single-node notary, one replica of a replicated cluster, or the
//! coordinator front of such a cluster. Cluster keys are dealt
//! deterministically from a shared seed so a statically configured
//! deployment agrees on the group identity without a key ceremony; real
//! deployments would replace this with externally provisioned shares.

use anyhow::Context;
use clap::Parser;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vigil_merkle::NotaryId;
use vigil_notary::{NotaryServer, NotaryService, ReplicaServer};
use vigil_uniqueness::{
    deal_shares, BftUniquenessProvider, ClusterConfig, ClusterReplica, Coordinator,
    PersistentUniquenessProvider, Replica, ReplicaAddress, SchnorrKeyPair, SystemClock,
};

#[derive(Parser)]
#[command(name = "vigil-notary")]
#[command(about = "Uniqueness notary for a permissioned ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Run a single-node non-validating notary
    Run {
        /// Listen port for the notary session
        #[arg(short, long, default_value = "7600")]
        port: u16,

        /// Uniqueness database path
        #[arg(long, default_value = "notary.db")]
        db: PathBuf,

        /// 32-byte hex seed for the notary identity key
        #[arg(long, default_value = "00")]
        seed: String,
    },

    /// Run one replica of a replicated notary cluster
    Replica {
        /// This replica's 1-based share index
        #[arg(short, long)]
        index: u32,

        /// Listen port for the coordinator link
        #[arg(short, long, default_value = "7700")]
        port: u16,

        /// Spend-table database path
        #[arg(long, default_value = "replica.db")]
        db: PathBuf,

        /// Cluster size (3f + 1)
        #[arg(long, default_value = "4")]
        cluster_size: u32,

        /// Shared cluster seed, hex
        #[arg(long, default_value = "00")]
        seed: String,
    },

    /// Run the coordinator front of a replicated notary
    Cluster {
        /// Listen port for the notary session
        #[arg(short, long, default_value = "7600")]
        port: u16,

        /// Replica addresses in share-index order, host:port
        #[arg(long, required = true, num_args = 1..)]
        peers: Vec<String>,

        /// Shared cluster seed, hex
        #[arg(long, default_value = "00")]
        seed: String,
    },

    /// Show protocol constants
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("vigil_notary=info".parse().expect("valid directive"))
                .add_directive("vigil_uniqueness=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { port, db, seed } => run_single(port, db, &seed).await,
        Command::Replica {
            index,
            port,
            db,
            cluster_size,
            seed,
        } => run_replica(index, port, db, cluster_size, &seed).await,
        Command::Cluster { port, peers, seed } => run_cluster(port, peers, &seed).await,
        Command::Info => {
            show_info();
            Ok(())
        }
    }
}

fn parse_seed(seed: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(seed).context("seed must be hex")?;
    let mut out = [0u8; 32];
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    Ok(out)
}

/// Deterministic cluster key material from the shared seed.
fn derive_cluster(seed: &[u8; 32], n: u32) -> (vigil_merkle::PublicKey, Vec<vigil_uniqueness::SecretShare>) {
    let f = (n.saturating_sub(1)) / 3;
    let threshold = 2 * f + 1;
    let mut rng = rand_chacha::ChaCha8Rng::from_seed(*seed);
    let (group_key, shares) = deal_shares(&mut rng, n, threshold);
    (group_key.compress().to_bytes(), shares)
}

async fn run_single(port: u16, db: PathBuf, seed: &str) -> anyhow::Result<()> {
    let keypair = SchnorrKeyPair::from_seed(&parse_seed(seed)?);
    let provider =
        Arc::new(PersistentUniquenessProvider::open(&db).context("open uniqueness database")?);
    let service = Arc::new(NotaryService::non_validating(
        keypair,
        provider,
        Arc::new(SystemClock),
    ));

    tracing::info!(identity = %service.identity(), db = %db.display(), "starting single-node notary");
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    NotaryServer::new(service).serve(listener).await?;
    Ok(())
}

async fn run_replica(
    index: u32,
    port: u16,
    db: PathBuf,
    cluster_size: u32,
    seed: &str,
) -> anyhow::Result<()> {
    anyhow::ensure!(index >= 1 && index <= cluster_size, "index out of range");
    let (_, mut shares) = derive_cluster(&parse_seed(seed)?, cluster_size);
    let share = shares.remove(index as usize - 1);

    let replica = Arc::new(
        Replica::open(&db, share, Arc::new(SystemClock)).context("open replica database")?,
    );
    tracing::info!(index, db = %db.display(), "starting replica");
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    ReplicaServer::new(replica).serve(listener).await?;
    Ok(())
}

async fn run_cluster(port: u16, peers: Vec<String>, seed: &str) -> anyhow::Result<()> {
    let n = peers.len() as u32;
    let (group_key, shares) = derive_cluster(&parse_seed(seed)?, n);
    let public_shares = shares
        .iter()
        .map(|s| s.public_share().compress().to_bytes())
        .collect();

    let addresses = peers
        .iter()
        .map(|peer| {
            let (host, port) = peer
                .rsplit_once(':')
                .context("peer must be host:port")?;
            Ok(ReplicaAddress {
                host: host.to_string(),
                port: port.parse().context("bad peer port")?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = ClusterConfig::new(addresses.clone(), group_key, public_shares)
        .context("invalid cluster shape")?;
    let quorum = config.quorum();

    let members: Vec<Box<dyn ClusterReplica>> = addresses
        .iter()
        .enumerate()
        .map(|(i, addr)| {
            Box::new(vigil_notary::RemoteReplica::new(i as u32 + 1, addr.to_string()))
                as Box<dyn ClusterReplica>
        })
        .collect();

    let provider = Arc::new(
        BftUniquenessProvider::new(config, Coordinator::new(members, quorum))
            .context("invalid cluster keys")?,
    );
    let service = Arc::new(NotaryService::replicated(
        NotaryId(group_key),
        provider,
        Arc::new(SystemClock),
    ));

    tracing::info!(identity = %service.identity(), replicas = n, quorum, "starting replicated notary");
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    NotaryServer::new(service).serve(listener).await?;
    Ok(())
}

fn show_info() {
    println!("vigil-notary");
    println!();
    println!("Session transport:");
    println!("  Framing:           u32 length prefix + bincode payload");
    println!("  Max frame:         {} bytes", vigil_notary::MAX_FRAME_BYTES);
    println!();
    println!("Replication:");
    println!("  Cluster size:      n = 3f + 1");
    println!("  Signature quorum:  2f + 1 partial Schnorr signatures");
    println!("  Curve:             ristretto255");
    println!();
    println!("Uniqueness:");
    println!("  Storage:           sqlite append-only table, WAL");
    println!("  Conflict rule:     first commit wins, no preemption");
}
