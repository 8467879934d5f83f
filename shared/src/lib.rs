use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

pub const IDENTIFIER_DIGITS: usize = 17;
pub const PLACEHOLDER_NAME: &str = "???";

pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier {value} has {digits} digits, expected 17")]
    WrongLength { value: u64, digits: usize },
    #[error("identifier {0:?} is not a decimal number")]
    NotNumeric(String),
}

/// Player identifier as reported by the host on join.
///
/// Only 17-digit values are accepted; everything else is rejected before any
/// lookup is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Identifier(u64);

impl Identifier {
    pub fn new(value: u64) -> Result<Self, IdentifierError> {
        let digits = value.checked_ilog10().map_or(1, |d| d as usize + 1);
        if digits != IDENTIFIER_DIGITS {
            return Err(IdentifierError::WrongLength { value, digits });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for u64 {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentifierError::NotNumeric(s.to_string()));
        }
        let value = s
            .parse::<u64>()
            .map_err(|_| IdentifierError::NotNumeric(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token the replication layer keys a connected user by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkIdentity {
    pub value: u64,
    pub sub_id: u8,
}

impl NetworkIdentity {
    /// Address 0.0.0.1 on sub-id 255. Never handed to a real connection.
    pub const TRANSIENT: NetworkIdentity = NetworkIdentity {
        value: 1,
        sub_id: 255,
    };

    pub fn new(value: u64, sub_id: u8) -> Self {
        Self { value, sub_id }
    }

    pub fn is_transient(&self) -> bool {
        *self == Self::TRANSIENT
    }
}

/// Replicated per-player state owned by the host.
///
/// The resolver only ever borrows it through this trait. Mutations take
/// `&self` because the host keeps its own synchronization.
pub trait SessionRecord: Send + Sync {
    fn display_name(&self) -> String;
    fn set_display_name(&self, name: &str);
    fn network_identity(&self) -> NetworkIdentity;
    fn set_network_identity(&self, identity: NetworkIdentity);
    /// Requests a replication tick for the record.
    fn mark_dirty(&self);
    /// False once the host has torn the session down.
    fn is_connected(&self) -> bool;
}

/// What the replication layer would have pushed on a dirty tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSnapshot {
    pub display_name: String,
    pub network_identity: NetworkIdentity,
}

#[derive(Debug)]
struct UserState {
    display_name: String,
    network_identity: NetworkIdentity,
    connected: bool,
    replicated: Vec<ReplicationSnapshot>,
}

/// In-memory `SessionRecord` that keeps every dirty tick it was asked for.
#[derive(Debug)]
pub struct ReplicatedUser {
    state: Mutex<UserState>,
}

impl ReplicatedUser {
    pub fn new(network_identity: NetworkIdentity) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(UserState {
                display_name: PLACEHOLDER_NAME.to_string(),
                network_identity,
                connected: true,
                replicated: Vec::new(),
            }),
        })
    }

    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn replicated(&self) -> Vec<ReplicationSnapshot> {
        self.lock().replicated.clone()
    }

    fn lock(&self) -> MutexGuard<'_, UserState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionRecord for ReplicatedUser {
    fn display_name(&self) -> String {
        self.lock().display_name.clone()
    }

    fn set_display_name(&self, name: &str) {
        self.lock().display_name = name.to_string();
    }

    fn network_identity(&self) -> NetworkIdentity {
        self.lock().network_identity
    }

    fn set_network_identity(&self, identity: NetworkIdentity) {
        self.lock().network_identity = identity;
    }

    fn mark_dirty(&self) {
        let mut state = self.lock();
        let snapshot = ReplicationSnapshot {
            display_name: state.display_name.clone(),
            network_identity: state.network_identity,
        };
        state.replicated.push(snapshot);
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

/// Events raised by the host session layer.
pub enum HostEvent {
    Join {
        id: u64,
        record: Arc<dyn SessionRecord>,
    },
    Disconnect {
        id: u64,
    },
    SessionEnd,
}

impl fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::Join { id, .. } => f.debug_struct("Join").field("id", id).finish(),
            HostEvent::Disconnect { id } => f.debug_struct("Disconnect").field("id", id).finish(),
            HostEvent::SessionEnd => f.write_str("SessionEnd"),
        }
    }
}

/// Requests sent back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostCommand {
    RequestRemoval {
        id: Identifier,
    },
    NameUpdated {
        id: Identifier,
        display_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Credentialed JSON endpoint, `{key}` and `{id}` are substituted.
    pub summaries_url: String,
    /// First fallback stage, `{id}` is substituted.
    pub lookup_url: String,
    /// Pulls the profile locator out of the lookup page.
    pub lookup_pattern: String,
    /// Pulls the display name out of the profile page.
    pub profile_pattern: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            summaries_url:
                "http://api.steampowered.com/ISteamUser/GetPlayerSummaries/v2/?key={key}&steamids={id}"
                    .to_string(),
            lookup_url: "https://steamid.io/lookup/{id}".to_string(),
            lookup_pattern: r#"<dt class="key">profile</dt>\s*<dd class="value"><a href="([^"]+)""#
                .to_string(),
            profile_pattern: r#"<span class="actual_persona_name">(.*)</span>"#.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub blacklist_enabled: bool,
    /// Comma separated tag names, e.g. `size, style, color`.
    pub blacklist: String,
    /// Empty means no credential, which selects the fallback lookups.
    pub api_key: String,
    pub prefix_unique_id: bool,
    pub fetch_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub endpoints: EndpointConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            blacklist_enabled: true,
            blacklist: "size, style".to_string(),
            api_key: String::new(),
            prefix_unique_id: true,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            endpoints: EndpointConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn blacklist_tags(&self) -> Vec<String> {
        self.blacklist
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn credential(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }

    /// Zero falls back to the default bound; lookups are never unbounded.
    pub fn fetch_timeout(&self) -> Duration {
        match self.fetch_timeout_ms {
            0 => Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
