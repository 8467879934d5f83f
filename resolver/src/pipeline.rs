//! Per-identifier resolution run
//!
//! One run picks exactly one strategy:
//! - **Primary**, when a credential is configured: one GET against the JSON
//!   summaries endpoint, name taken from the first player entry.
//! - **Fallback** otherwise: a lookup page yields a profile locator, then the
//!   profile page yields the name.
//!
//! Every fetch is bounded by the configured timeout. Any fetch failure or
//! missing match ends the run as `Failed`; nothing is retried inside a run.
//! A candidate name always passes the blacklist gate before it is reported
//! as `Resolved`.

use crate::blacklist::{Blacklist, Verdict};
use crate::extract::{extract_persona_name, PatternExtractor};
use crate::fetcher::{FetchError, Fetcher};
use log::debug;
use reqwest::Url;
use shared::{Identifier, ResolverConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Primary,
    FallbackLookup,
    FallbackProfile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Primary => "primary",
            Stage::FallbackLookup => "fallback lookup",
            Stage::FallbackProfile => "fallback profile",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("{stage} fetch failed: {source}")]
    Fetch {
        stage: Stage,
        #[source]
        source: FetchError,
    },
    #[error("no name found at {stage} stage")]
    ParseMiss { stage: Stage },
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Resolved(String),
    Denied { id: Identifier, tag: String },
    Failed(ResolveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Primary,
    Fallback,
}

pub struct ResolutionPipeline {
    fetcher: Arc<dyn Fetcher>,
    credential: Option<String>,
    summaries_url: String,
    lookup_url: String,
    lookup: PatternExtractor,
    profile: PatternExtractor,
    blacklist: Blacklist,
    fetch_timeout: Duration,
}

impl ResolutionPipeline {
    pub fn from_config(
        config: &ResolverConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, regex::Error> {
        let endpoints = &config.endpoints;

        Ok(Self {
            fetcher,
            credential: config.credential().map(str::to_string),
            summaries_url: endpoints.summaries_url.clone(),
            lookup_url: endpoints.lookup_url.clone(),
            lookup: PatternExtractor::new(&endpoints.lookup_pattern)?,
            profile: PatternExtractor::new(&endpoints.profile_pattern)?,
            blacklist: Blacklist::new(config.blacklist_enabled, config.blacklist_tags()),
            fetch_timeout: config.fetch_timeout(),
        })
    }

    pub fn strategy(&self) -> Strategy {
        if self.credential.is_some() {
            Strategy::Primary
        } else {
            Strategy::Fallback
        }
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub async fn run(&self, id: Identifier) -> Outcome {
        let candidate = match &self.credential {
            Some(key) => self.run_primary(id, key).await,
            None => self.run_fallback(id).await,
        };

        let name = match candidate {
            Ok(name) => name,
            Err(e) => return Outcome::Failed(e),
        };

        match self.blacklist.check(&name) {
            Verdict::Allowed => Outcome::Resolved(name),
            Verdict::Denied { tag } => Outcome::Denied { id, tag },
        }
    }

    async fn run_primary(&self, id: Identifier, key: &str) -> Result<String, ResolveError> {
        let url = self
            .summaries_url
            .replace("{key}", key)
            .replace("{id}", &id.to_string());

        let body = self.fetch(Stage::Primary, &url).await?;
        extract_persona_name(&body).ok_or(ResolveError::ParseMiss {
            stage: Stage::Primary,
        })
    }

    async fn run_fallback(&self, id: Identifier) -> Result<String, ResolveError> {
        let url = self.lookup_url.replace("{id}", &id.to_string());
        let page = self.fetch(Stage::FallbackLookup, &url).await?;
        let profile_url = self
            .lookup
            .extract(&page)
            .as_deref()
            .and_then(profile_locator)
            .ok_or(ResolveError::ParseMiss {
                stage: Stage::FallbackLookup,
            })?;

        debug!("{} resolved to profile {}", id, profile_url);

        let page = self.fetch(Stage::FallbackProfile, &profile_url).await?;
        self.profile
            .extract(&page)
            .ok_or(ResolveError::ParseMiss {
                stage: Stage::FallbackProfile,
            })
    }

    async fn fetch(&self, stage: Stage, url: &str) -> Result<String, ResolveError> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url)).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(source)) => Err(ResolveError::Fetch { stage, source }),
            Err(_) => Err(ResolveError::Fetch {
                stage,
                source: FetchError::Timeout(self.fetch_timeout),
            }),
        }
    }
}

/// Turns a scraped `href` into a fetchable URL.
///
/// The attribute text is still HTML-escaped, so `&amp;` is decoded first.
/// Anything that is not an absolute http(s) URL is rejected.
fn profile_locator(href: &str) -> Option<String> {
    let url = Url::parse(&href.replace("&amp;", "&")).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url.into())
}
