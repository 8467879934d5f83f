//! Host-facing resolver component
//!
//! `UsernameResolver` owns the name cache for one session and is driven by
//! the host's join, disconnect and session-end events, either through direct
//! calls or by feeding `HostEvent`s into `run`. Outbound requests (removal,
//! name updates) go back over a `HostCommand` channel.
//!
//! Each lookup runs on its own task. The only state shared between runs is
//! the cache, and every outcome is checked against it before any side effect
//! is applied, so a run that finishes after a disconnect does nothing.

use crate::cache::{Lookup, NameCache, OutcomeReceiver, Ticket};
use crate::fetcher::Fetcher;
use crate::pipeline::{Outcome, ResolutionPipeline};
use crate::resync::IdentityResync;
use log::{debug, error, info, warn};
use shared::{HostCommand, HostEvent, Identifier, ResolverConfig, SessionRecord, PLACEHOLDER_NAME};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

pub struct UsernameResolver {
    cache: RwLock<NameCache>,
    pipeline: ResolutionPipeline,
    resync: IdentityResync,
    commands: mpsc::UnboundedSender<HostCommand>,
}

impl UsernameResolver {
    pub fn new(
        pipeline: ResolutionPipeline,
        resync: IdentityResync,
        commands: mpsc::UnboundedSender<HostCommand>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache: RwLock::new(NameCache::new()),
            pipeline,
            resync,
            commands,
        })
    }

    pub fn from_config(
        config: &ResolverConfig,
        fetcher: Arc<dyn Fetcher>,
        commands: mpsc::UnboundedSender<HostCommand>,
    ) -> Result<Arc<Self>, regex::Error> {
        let pipeline = ResolutionPipeline::from_config(config, fetcher)?;
        let resync = IdentityResync::new(config.settle_delay(), config.prefix_unique_id);

        info!(
            "Username resolver ready ({:?} strategy, blacklist {})",
            pipeline.strategy(),
            if pipeline.blacklist().is_enabled() {
                "on"
            } else {
                "off"
            }
        );

        Ok(Self::new(pipeline, resync, commands))
    }

    /// Handles a player joining and returns the name to show right now.
    ///
    /// That is the cached name if one exists, otherwise the placeholder
    /// while a lookup runs in the background.
    pub async fn on_join(self: &Arc<Self>, raw_id: u64, record: Arc<dyn SessionRecord>) -> String {
        let id = match Identifier::new(raw_id) {
            Ok(id) => id,
            Err(e) => {
                debug!("Not resolving join: {}", e);
                return PLACEHOLDER_NAME.to_string();
            }
        };

        match self.resolve(id, record).await {
            Lookup::Cached(name) => name,
            Lookup::Started(..) | Lookup::InFlight(_) => PLACEHOLDER_NAME.to_string(),
        }
    }

    /// Starts a lookup for `id` unless one is cached or already running.
    ///
    /// `Started` and `InFlight` carry a receiver for the run's outcome. A
    /// cached name is written straight to `record` if it still shows the
    /// placeholder.
    pub async fn resolve(self: &Arc<Self>, id: Identifier, record: Arc<dyn SessionRecord>) -> Lookup {
        // Test-and-set under the write lock so racing joins start one run.
        let lookup = {
            let mut cache = self.cache.write().await;
            let lookup = cache.begin(id, Arc::clone(&record));
            if let Lookup::Cached(name) = &lookup {
                if record.is_connected() && record.display_name() == PLACEHOLDER_NAME {
                    self.apply_name(&mut cache, id, record, name);
                }
            }
            lookup
        };

        if let Lookup::Started(ticket, _) = &lookup {
            let resolver = Arc::clone(self);
            let ticket = *ticket;
            tokio::spawn(async move {
                resolver.run_lookup(ticket).await;
            });
        }

        lookup
    }

    async fn run_lookup(self: Arc<Self>, ticket: Ticket) {
        let id = ticket.id();
        let outcome = self.pipeline.run(id).await;

        let mut cache = self.cache.write().await;
        if !cache.is_current(ticket) {
            debug!("Discarding outcome for {}: invalidated while in flight", id);
            return;
        }

        match &outcome {
            Outcome::Resolved(name) => {
                let live = cache.live_record(ticket);
                match live {
                    Some(record) => self.apply_name(&mut cache, id, record, name),
                    None => debug!("Session for {} closed, caching {:?} only", id, name),
                }
            }
            Outcome::Denied { id, tag } => {
                warn!("Player {} uses banned tag {:?}, requesting removal", id, tag);
                self.send(HostCommand::RequestRemoval { id: *id });
            }
            Outcome::Failed(e) => {
                warn!("Could not resolve name for {}: {}", id, e);
            }
        }

        cache.complete(ticket, outcome);
    }

    fn apply_name(
        &self,
        cache: &mut NameCache,
        id: Identifier,
        record: Arc<dyn SessionRecord>,
        name: &str,
    ) {
        let applied = self.resync.apply(record, name);
        cache.record_unique_id(id, applied.unique_id);
        info!("New player: {} connected ({})", applied.display_name, id);
        self.send(HostCommand::NameUpdated {
            id,
            display_name: applied.display_name,
        });
    }

    fn send(&self, command: HostCommand) {
        if let Err(e) = self.commands.send(command) {
            error!("Failed to queue host command: {}", e);
        }
    }

    pub async fn on_disconnect(&self, raw_id: u64) {
        // Zero means the connection never had an identifier.
        if raw_id == 0 {
            return;
        }

        match Identifier::new(raw_id) {
            Ok(id) => {
                if self.cache.write().await.invalidate(id) {
                    debug!("Forgot cached state for {}", id);
                }
            }
            Err(e) => debug!("Ignoring disconnect: {}", e),
        }
    }

    pub async fn on_session_end(&self) {
        self.cache.write().await.clear();
    }

    /// Cached name, or the placeholder.
    pub async fn display_name(&self, id: Identifier) -> String {
        self.cache
            .read()
            .await
            .get(id)
            .map_or_else(|| PLACEHOLDER_NAME.to_string(), str::to_string)
    }

    /// Number shown in the `[n]` prefix of the player's name.
    pub async fn unique_id(&self, id: Identifier) -> Option<u32> {
        self.cache.read().await.unique_id(id)
    }

    /// Watches the outcome of the run currently in flight for `id`.
    pub async fn subscribe(&self, id: Identifier) -> Option<OutcomeReceiver> {
        self.cache.read().await.subscribe(id)
    }

    pub async fn is_pending(&self, id: Identifier) -> bool {
        self.cache.read().await.is_pending(id)
    }

    /// Consumes host events until the sending side hangs up.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                HostEvent::Join { id, record } => {
                    self.on_join(id, record).await;
                }
                HostEvent::Disconnect { id } => {
                    self.on_disconnect(id).await;
                }
                HostEvent::SessionEnd => {
                    self.on_session_end().await;
                }
            }
        }

        info!("Host event channel closed, resolver stopping");
    }
}
