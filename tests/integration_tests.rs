//! Integration tests for the username resolver
//!
//! These tests drive the resolver the way a host would: join, disconnect and
//! session-end events against in-memory session records, with the network
//! replaced by a scripted fetcher.

use async_trait::async_trait;
use resolver::fetcher::{FetchError, Fetcher};
use resolver::{Lookup, Outcome, UsernameResolver};
use shared::{
    HostCommand, HostEvent, Identifier, NetworkIdentity, ReplicatedUser, ResolverConfig,
    SessionRecord, PLACEHOLDER_NAME,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};

const PLAYER: u64 = 76561198000000000;
const LOOKUP_URL: &str = "https://steamid.io/lookup/76561198000000000";
const PROFILE_URL: &str = "https://steamcommunity.com/profiles/76561198000000000";

/// Fetcher serving canned pages, optionally held until permits are added.
struct FakeWeb {
    pages: Mutex<HashMap<String, String>>,
    hits: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeWeb {
    fn new(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            gate,
        }
    }

    fn page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    fn player(self, name: &str) -> Self {
        self.page(
            LOOKUP_URL,
            &format!(
                "<dl>\n<dt class=\"key\">profile</dt>\n<dd class=\"value\"><a href=\"{}\">{}</a></dd>\n</dl>",
                PROFILE_URL, PROFILE_URL
            ),
        )
        .page(
            PROFILE_URL,
            &format!(
                "<div class=\"persona\"><span class=\"actual_persona_name\">{}</span></div>",
                name
            ),
        )
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeWeb {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        let page = self.pages.lock().unwrap().get(url).cloned();
        page.ok_or_else(|| FetchError::Status(404))
    }
}

fn player_id() -> Identifier {
    Identifier::new(PLAYER).unwrap()
}

fn setup(
    config: ResolverConfig,
    web: Arc<FakeWeb>,
) -> (Arc<UsernameResolver>, mpsc::UnboundedReceiver<HostCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let resolver = UsernameResolver::from_config(&config, web, tx).unwrap();
    (resolver, rx)
}

async fn outcome_of(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    rx.wait_for(Option::is_some).await.unwrap().clone().unwrap()
}

/// END-TO-END SCENARIOS
mod scenario_tests {
    use super::*;

    /// Join, fallback lookup, prefixed name and identity restore
    #[tokio::test(start_paused = true)]
    async fn fallback_round_trip_sets_prefixed_name() {
        let web = Arc::new(FakeWeb::new(None).player("PlayerOne"));
        let config = ResolverConfig {
            blacklist_enabled: false,
            prefix_unique_id: true,
            ..ResolverConfig::default()
        };
        let (resolver, mut commands) = setup(config.clone(), web.clone());
        let original = NetworkIdentity::new(9, 0);
        let user = ReplicatedUser::new(original);

        let shown = resolver.on_join(PLAYER, user.clone()).await;
        assert_eq!(shown, PLACEHOLDER_NAME);

        let command = commands.recv().await.unwrap();
        assert_eq!(
            command,
            HostCommand::NameUpdated {
                id: player_id(),
                display_name: "[1] PlayerOne".to_string(),
            }
        );

        // Phase one: name visible, transient identity replicated.
        assert_eq!(user.display_name(), "[1] PlayerOne");
        assert!(user.network_identity().is_transient());

        // Phase two after the settle delay.
        tokio::time::sleep(config.settle_delay() + Duration::from_millis(1)).await;
        assert_eq!(user.network_identity(), original);
        assert_eq!(user.display_name(), "[1] PlayerOne");

        let ticks = user.replicated();
        assert_eq!(ticks.len(), 2);
        assert!(ticks[0].network_identity.is_transient());
        assert_eq!(ticks[1].network_identity, original);

        assert_eq!(resolver.display_name(player_id()).await, "PlayerOne");
        assert_eq!(resolver.unique_id(player_id()).await, Some(1));
        assert_eq!(web.hits(), 2);
    }

    /// Banned tag in the raw name: removal requested, nothing cached
    #[tokio::test]
    async fn banned_tag_requests_removal() {
        let web = Arc::new(FakeWeb::new(None).player("&lt;size=150&gt;PlayerOne&lt;/size&gt;"));
        let config = ResolverConfig {
            blacklist_enabled: true,
            blacklist: "size".to_string(),
            ..ResolverConfig::default()
        };
        let (resolver, mut commands) = setup(config, web);
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        resolver.on_join(PLAYER, user.clone()).await;

        assert_eq!(
            commands.recv().await,
            Some(HostCommand::RequestRemoval { id: player_id() })
        );
        assert_eq!(resolver.display_name(player_id()).await, PLACEHOLDER_NAME);
        assert!(!resolver.is_pending(player_id()).await);
        assert_eq!(user.display_name(), PLACEHOLDER_NAME);
        assert!(user.replicated().is_empty());
    }

    /// Primary strategy when a credential is configured
    #[tokio::test]
    async fn credential_selects_summaries_endpoint() {
        let web = Arc::new(FakeWeb::new(None).page(
            "http://api.steampowered.com/ISteamUser/GetPlayerSummaries/v2/?key=KEY&steamids=76561198000000000",
            r#"{"response":{"players":[{"steamid":"76561198000000000","personaname":"ApiPlayer"}]}}"#,
        ));
        let config = ResolverConfig {
            api_key: "KEY".to_string(),
            prefix_unique_id: false,
            ..ResolverConfig::default()
        };
        let (resolver, mut commands) = setup(config, web.clone());
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        resolver.on_join(PLAYER, user.clone()).await;

        assert!(matches!(
            commands.recv().await,
            Some(HostCommand::NameUpdated { .. })
        ));
        assert_eq!(user.display_name(), "ApiPlayer");
        assert_eq!(web.hits(), 1);
    }

    /// A failed run leaves the session alone and a later join retries
    #[tokio::test]
    async fn failure_allows_fresh_retry() {
        let web = Arc::new(FakeWeb::new(None));
        let (resolver, _commands) = setup(ResolverConfig::default(), web.clone());
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        let Lookup::Started(_, rx) = resolver.resolve(player_id(), user.clone()).await else {
            panic!("expected a new run");
        };
        assert!(matches!(outcome_of(rx).await, Outcome::Failed(_)));

        assert!(user.replicated().is_empty());
        assert_eq!(web.hits(), 1);

        let again = resolver.resolve(player_id(), user.clone()).await;
        assert!(matches!(again, Lookup::Started(..)));
    }
}

/// CONCURRENCY AND INVALIDATION TESTS
mod lifecycle_tests {
    use super::*;

    /// Reconnect race: many joins before the first completes, one run
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_start_single_run() {
        let gate = Arc::new(Semaphore::new(0));
        let web = Arc::new(FakeWeb::new(Some(gate.clone())).player("PlayerOne"));
        let (resolver, _commands) = setup(ResolverConfig::default(), web.clone());

        let mut joins = Vec::new();
        for n in 0..16 {
            let resolver = Arc::clone(&resolver);
            joins.push(tokio::spawn(async move {
                let user = ReplicatedUser::new(NetworkIdentity::new(100 + n, 0));
                resolver.resolve(player_id(), user).await
            }));
        }

        let mut started = 0;
        let mut receivers = Vec::new();
        for join in joins {
            match join.await.unwrap() {
                Lookup::Started(_, rx) => {
                    started += 1;
                    receivers.push(rx);
                }
                Lookup::InFlight(rx) => receivers.push(rx),
                Lookup::Cached(name) => panic!("nothing should be cached yet, got {}", name),
            }
        }
        assert_eq!(started, 1);
        assert_eq!(receivers.len(), 16);

        gate.add_permits(2);

        let mut outcomes = Vec::new();
        for rx in receivers {
            outcomes.push(outcome_of(rx).await);
        }
        assert!(outcomes
            .iter()
            .all(|o| *o == Outcome::Resolved("PlayerOne".to_string())));
        assert_eq!(web.hits(), 2);
    }

    /// Disconnect while the run is in flight: late outcome is dropped
    #[tokio::test]
    async fn disconnect_mid_run_discards_outcome() {
        let gate = Arc::new(Semaphore::new(0));
        let web = Arc::new(FakeWeb::new(Some(gate.clone())).player("PlayerOne"));
        let (resolver, mut commands) = setup(ResolverConfig::default(), web.clone());
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        resolver.on_join(PLAYER, user.clone()).await;
        resolver.on_disconnect(PLAYER).await;
        gate.add_permits(2);

        while web.hits() < 2 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(resolver.display_name(player_id()).await, PLACEHOLDER_NAME);
        assert!(user.replicated().is_empty());
        assert!(commands.try_recv().is_err());
    }

    /// A player who reconnects mid-run gets the name on the new record
    #[tokio::test]
    async fn reconnect_mid_run_names_live_record() {
        let gate = Arc::new(Semaphore::new(0));
        let web = Arc::new(FakeWeb::new(Some(gate.clone())).player("PlayerOne"));
        let (resolver, mut commands) = setup(ResolverConfig::default(), web.clone());
        let old = ReplicatedUser::new(NetworkIdentity::new(9, 0));
        let new = ReplicatedUser::new(NetworkIdentity::new(10, 0));

        resolver.on_join(PLAYER, old.clone()).await;
        old.disconnect();
        assert_eq!(resolver.on_join(PLAYER, new.clone()).await, PLACEHOLDER_NAME);
        gate.add_permits(2);

        assert_eq!(
            commands.recv().await,
            Some(HostCommand::NameUpdated {
                id: player_id(),
                display_name: "[1] PlayerOne".to_string(),
            })
        );
        assert_eq!(new.display_name(), "[1] PlayerOne");
        assert_eq!(new.replicated()[0].display_name, "[1] PlayerOne");
        assert_eq!(old.display_name(), PLACEHOLDER_NAME);
        assert!(old.replicated().is_empty());
        assert_eq!(web.hits(), 2);
    }

    /// Session end wipes resolved and pending state alike
    #[tokio::test]
    async fn session_end_clears_everything() {
        let gate = Arc::new(Semaphore::new(0));
        let web = Arc::new(FakeWeb::new(Some(gate.clone())).player("PlayerOne"));
        let (resolver, mut commands) = setup(ResolverConfig::default(), web.clone());
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        resolver.on_join(PLAYER, user.clone()).await;
        gate.add_permits(2);
        commands.recv().await.unwrap();
        assert_eq!(resolver.display_name(player_id()).await, "PlayerOne");
        // Take the permits back so the next run stalls.
        let _closed = gate.acquire_many(2).await.unwrap();

        let other = Identifier::new(76561198000000001).unwrap();
        let stranger = ReplicatedUser::new(NetworkIdentity::new(10, 0));
        resolver.resolve(other, stranger).await;
        assert!(resolver.is_pending(other).await);

        resolver.on_session_end().await;

        assert_eq!(resolver.display_name(player_id()).await, PLACEHOLDER_NAME);
        assert_eq!(resolver.unique_id(player_id()).await, None);
        assert!(!resolver.is_pending(other).await);
    }

    /// Session end while a run is in flight: the late outcome is dropped
    #[tokio::test]
    async fn session_end_mid_run_discards_outcome() {
        let gate = Arc::new(Semaphore::new(0));
        let web = Arc::new(FakeWeb::new(Some(gate.clone())).player("PlayerOne"));
        let (resolver, mut commands) = setup(ResolverConfig::default(), web.clone());
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        let Lookup::Started(_, mut rx) = resolver.resolve(player_id(), user.clone()).await else {
            panic!("expected a new run");
        };
        resolver.on_session_end().await;
        gate.add_permits(2);

        // The run's channel closes without an outcome.
        assert!(rx.wait_for(Option::is_some).await.is_err());

        while web.hits() < 2 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(user.replicated().is_empty());
        assert_eq!(user.display_name(), PLACEHOLDER_NAME);
        assert_eq!(resolver.display_name(player_id()).await, PLACEHOLDER_NAME);
        assert!(commands.try_recv().is_err());
    }

    /// Malformed identifiers never reach the network
    #[tokio::test]
    async fn malformed_identifiers_never_fetch() {
        let web = Arc::new(FakeWeb::new(None).player("PlayerOne"));
        let (resolver, _commands) = setup(ResolverConfig::default(), web.clone());
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        for raw in [1, 7656119800000000, 765611980000000000, u64::MAX] {
            assert_eq!(resolver.on_join(raw, user.clone()).await, PLACEHOLDER_NAME);
        }
        tokio::task::yield_now().await;

        assert_eq!(web.hits(), 0);
    }

    /// Events delivered through the host channel
    #[tokio::test]
    async fn host_event_loop() {
        let web = Arc::new(FakeWeb::new(None).player("PlayerOne"));
        let (resolver, mut commands) = setup(ResolverConfig::default(), web);
        let (events, events_rx) = mpsc::unbounded_channel();
        let loop_handle = tokio::spawn(Arc::clone(&resolver).run(events_rx));
        let user = ReplicatedUser::new(NetworkIdentity::new(9, 0));

        events
            .send(HostEvent::Join {
                id: PLAYER,
                record: user.clone(),
            })
            .unwrap();
        commands.recv().await.unwrap();
        assert_eq!(resolver.display_name(player_id()).await, "PlayerOne");

        events.send(HostEvent::Disconnect { id: PLAYER }).unwrap();
        drop(events);
        loop_handle.await.unwrap();

        assert_eq!(resolver.display_name(player_id()).await, PLACEHOLDER_NAME);
    }
}
