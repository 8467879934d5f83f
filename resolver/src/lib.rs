//! # Username Resolver Library
//!
//! This library resolves the display name of a player from the opaque numeric
//! identifier the host reports on join. Names come from third-party lookups
//! that are slow and unreliable, so resolution runs in the background while
//! the player keeps a placeholder name.
//!
//! ## Core Responsibilities
//!
//! ### Single-Flight Lookups
//! At most one lookup runs per identifier. Reconnect races and repeated host
//! queries for the same player share the run already in flight, and a
//! successful result is cached until the player disconnects or the session
//! ends.
//!
//! ### Fallback Fetch Chain
//! With an API credential configured, one JSON request yields the name.
//! Without one, a lookup page is scraped for the player's profile locator and
//! the profile page is scraped for the name. Every request is time-bounded.
//!
//! ### Content Blacklist
//! Names carrying configured rich-text tags (oversized text, styles) are
//! denied. A denied player is never cached and the host is asked to remove
//! them.
//!
//! ### Identity Resync
//! The host's replication layer only re-sends names when a player's network
//! identity changes. Applying a name briefly swaps in a transient identity
//! and restores the original one after a short settle delay.
//!
//! ## Module Organization
//!
//! ### Fetcher Module (`fetcher`)
//! The `Fetcher` trait and its `reqwest` implementation.
//!
//! ### Extract Module (`extract`)
//! Regex extraction from HTML pages and JSON extraction from the summaries
//! endpoint.
//!
//! ### Blacklist Module (`blacklist`)
//! The banned-tag gate.
//!
//! ### Pipeline Module (`pipeline`)
//! One resolution run: strategy selection, fetch/extract stages, gate.
//!
//! ### Cache Module (`cache`)
//! Resolved names and in-flight markers with generation-stamped tickets.
//!
//! ### Resync Module (`resync`)
//! The two-phase identity swap.
//!
//! ### Service Module (`service`)
//! `UsernameResolver`, the component the host feeds events into.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use resolver::fetcher::HttpFetcher;
//! use resolver::service::UsernameResolver;
//! use shared::{NetworkIdentity, ReplicatedUser, ResolverConfig};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ResolverConfig::default();
//!     let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout())?);
//!     let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
//!
//!     let resolver = UsernameResolver::from_config(&config, fetcher, commands_tx)?;
//!
//!     // Host reports a join; the placeholder comes back immediately.
//!     let user = ReplicatedUser::new(NetworkIdentity::new(1, 0));
//!     let shown = resolver.on_join(76561198000000000, user).await;
//!     assert_eq!(shown, "???");
//!
//!     // Name updates and removal requests arrive on the command channel.
//!     while let Some(command) = commands_rx.recv().await {
//!         println!("{:?}", command);
//!     }
//!     Ok(())
//! }
//! ```

pub mod blacklist;
pub mod cache;
pub mod extract;
pub mod fetcher;
pub mod pipeline;
pub mod resync;
pub mod service;

pub use cache::Lookup;
pub use pipeline::{Outcome, ResolveError};
pub use service::UsernameResolver;
