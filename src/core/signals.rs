//! Defensive-signal detection over rendered page content.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Deserialize, Serialize};

use crate::core::error::SessionError;

/// Marker lists scanned after navigations and submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalMarkers {
    /// Substrings that indicate a human-verification challenge.
    pub challenge: Vec<String>,
    /// Substrings that indicate a traffic block page.
    pub block: Vec<String>,
}

impl Default for SignalMarkers {
    fn default() -> Self {
        Self {
            challenge: ["cf-challenge", "h-captcha", "g-recaptcha"]
                .into_iter()
                .map(String::from)
                .collect(),
            block: ["request blocked", "access denied", "http 403", "forbidden"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// What a scan found, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Challenge wall.
    Challenge,
    /// Traffic block.
    Blocked,
}

/// Case-insensitive multi-pattern scanner.
///
/// Challenge markers take precedence: a page that contains both is reported as a
/// challenge, since that is the signal that needs a human.
#[derive(Debug, Clone)]
pub struct SignalDetector {
    challenge: Option<AhoCorasick>,
    block: Option<AhoCorasick>,
}

impl Default for SignalDetector {
    fn default() -> Self {
        Self::new(&SignalMarkers::default())
    }
}

impl SignalDetector {
    /// Build matchers from marker lists. Empty lists never match.
    #[must_use]
    pub fn new(markers: &SignalMarkers) -> Self {
        Self {
            challenge: build(&markers.challenge),
            block: build(&markers.block),
        }
    }

    /// Classify `html`.
    #[must_use]
    pub fn classify(&self, html: &str) -> Option<Signal> {
        if self.challenge.as_ref().is_some_and(|ac| ac.is_match(html)) {
            return Some(Signal::Challenge);
        }
        if self.block.as_ref().is_some_and(|ac| ac.is_match(html)) {
            return Some(Signal::Blocked);
        }
        None
    }

    /// Map a scan of `html` at `stage` onto the session error taxonomy.
    #[must_use]
    pub fn scan(&self, html: &str, stage: &str) -> Option<SessionError> {
        self.classify(html).map(|signal| match signal {
            Signal::Challenge => SessionError::DefensiveSignal {
                stage: stage.to_string(),
            },
            Signal::Blocked => SessionError::Blocked {
                stage: stage.to_string(),
            },
        })
    }
}

fn build(patterns: &[String]) -> Option<AhoCorasick> {
    let patterns: Vec<&str> = patterns
        .iter()
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .collect();
    if patterns.is_empty() {
        return None;
    }
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostFirst)
        .build(&patterns)
        .ok()
}
