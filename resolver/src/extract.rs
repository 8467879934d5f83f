//! Name extraction from fetched documents

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// Single-capture pattern run against an HTML document.
///
/// Matching is case-insensitive, the first capture group is the result and
/// an empty capture counts as no match.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    pattern: Regex,
}

impl PatternExtractor {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { pattern })
    }

    pub fn extract(&self, document: &str) -> Option<String> {
        self.pattern
            .captures(document)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Deserialize)]
struct SummariesEnvelope {
    response: SummariesResponse,
}

#[derive(Deserialize)]
struct SummariesResponse {
    #[serde(default)]
    players: Vec<PlayerSummary>,
}

#[derive(Deserialize)]
struct PlayerSummary {
    personaname: Option<String>,
}

/// Reads `response.players[0].personaname` from a player-summaries body.
pub fn extract_persona_name(body: &str) -> Option<String> {
    let envelope: SummariesEnvelope = serde_json::from_str(body).ok()?;
    envelope
        .response
        .players
        .into_iter()
        .next()?
        .personaname
        .filter(|name| !name.is_empty())
}
