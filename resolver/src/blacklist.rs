//! Banned rich-text tag gate
//!
//! Names come back HTML-escaped, so a tag such as `size` shows up in the raw
//! text as `&lt;size=`. The gate looks for exactly that marker. Matching is
//! case-sensitive and runs on the undecoded text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied { tag: String },
}

#[derive(Debug, Clone)]
pub struct Blacklist {
    enabled: bool,
    /// (tag, marker) pairs in configured order.
    rules: Vec<(String, String)>,
}

impl Blacklist {
    pub fn new<I, S>(enabled: bool, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rules = tags
            .into_iter()
            .map(Into::into)
            .filter(|tag| !tag.is_empty())
            .map(|tag| {
                let marker = tag_marker(&tag);
                (tag, marker)
            })
            .collect();

        Self { enabled, rules }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rules: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(tag, _)| tag.as_str())
    }

    /// First configured tag whose marker appears in `candidate` wins.
    pub fn check(&self, candidate: &str) -> Verdict {
        if !self.enabled {
            return Verdict::Allowed;
        }

        self.rules
            .iter()
            .find(|(_, marker)| candidate.contains(marker.as_str()))
            .map_or(Verdict::Allowed, |(tag, _)| Verdict::Denied { tag: tag.clone() })
    }
}

pub fn tag_marker(tag: &str) -> String {
    format!("&lt;{}=", tag)
}
