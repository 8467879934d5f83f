use clap::Parser;
use log::{info, warn};
use resolver::fetcher::HttpFetcher;
use resolver::service::UsernameResolver;
use shared::{HostCommand, Identifier, NetworkIdentity, ReplicatedUser, ResolverConfig, SessionRecord};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Player identifiers to resolve (17 digits each)
    #[arg(required = true)]
    ids: Vec<String>,

    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Credential for the JSON summaries endpoint
    #[arg(short = 'k', long)]
    api_key: Option<String>,

    /// Comma separated banned tags, e.g. "size, style"
    #[arg(short, long)]
    blacklist: Option<String>,

    /// Disable the banned-tag gate
    #[arg(long)]
    no_blacklist: bool,

    /// Do not prefix names with "[n]"
    #[arg(long)]
    no_prefix: bool,

    /// Per-request timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Delay before the original network identity is restored
    #[arg(long)]
    settle_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<(ResolverConfig, Vec<String>), Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => ResolverConfig::default(),
        };

        if let Some(key) = self.api_key {
            config.api_key = key;
        }
        if let Some(list) = self.blacklist {
            config.blacklist = list;
        }
        if self.no_blacklist {
            config.blacklist_enabled = false;
        }
        if self.no_prefix {
            config.prefix_unique_id = false;
        }
        if let Some(ms) = self.timeout_ms {
            config.fetch_timeout_ms = ms;
        }
        if let Some(ms) = self.settle_ms {
            config.settle_delay_ms = ms;
        }

        Ok((config, self.ids))
    }
}

/// Resolves the given identifiers against the live endpoints, playing the
/// part of the host: one in-memory session record per identifier.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let (config, ids) = Args::parse().into_config()?;

    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout())?);
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    let resolver = UsernameResolver::from_config(&config, fetcher, commands_tx)?;

    let mut sessions = Vec::new();
    for (index, raw) in ids.iter().enumerate() {
        let raw_id = match raw.parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Skipping {:?}: not a number", raw);
                continue;
            }
        };

        let user = ReplicatedUser::new(NetworkIdentity::new(index as u64 + 2, 0));
        let shown = resolver.on_join(raw_id, user.clone()).await;
        info!("{} joined, showing {:?}", raw, shown);
        sessions.push((raw_id, user));
    }

    // Wait for every run still in flight.
    for (raw_id, _) in &sessions {
        let Ok(id) = Identifier::new(*raw_id) else {
            continue;
        };
        if let Some(mut rx) = resolver.subscribe(id).await {
            let _ = rx.wait_for(Option::is_some).await;
        }
    }

    // Give phase two of each resync time to land.
    tokio::time::sleep(config.settle_delay() + Duration::from_millis(10)).await;

    while let Ok(command) = commands_rx.try_recv() {
        match command {
            HostCommand::RequestRemoval { id } => println!("remove  {}", id),
            HostCommand::NameUpdated { id, display_name } => {
                println!("renamed {} -> {}", id, display_name)
            }
        }
    }

    for (raw_id, user) in &sessions {
        println!(
            "{} {:?} (identity {:?})",
            raw_id,
            user.display_name(),
            user.network_identity()
        );
    }

    resolver.on_session_end().await;
    Ok(())
}
