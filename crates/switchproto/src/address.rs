//! Address catalog for the remote application's OSC namespace.
//!
//! Every address is classified once, when it is parsed, into a [`Domain`]
//! and a [`ReplyExpectation`]. The dispatcher routes on the expectation
//! instead of matching string prefixes at request time.
//!
//! Reply-bearing addresses under the root (default `/live`):
//!
//! | Pattern                        | Expectation  |
//! |--------------------------------|--------------|
//! | `<root>/<domain>/get/...`      | awaits reply |
//! | `<root>/test`                  | awaits reply |
//! | `<root>/error`                 | awaits reply |
//! | everything else                | one-way      |
//!
//! where `<domain>` is one of song, track, device, scene, clip, clip_slot,
//! view, api, application. Matching is per path segment, so
//! `/live/songbook/get/x` does not count as a song getter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default namespace root of the remote application.
pub const DEFAULT_ROOT: &str = "/live";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Missing OSC address")]
    Empty,
    #[error("OSC address must start with '/': {0:?}")]
    NoLeadingSlash(String),
    #[error("OSC address contains an empty segment: {0:?}")]
    EmptySegment(String),
    #[error("OSC address contains whitespace or control characters: {0:?}")]
    BadCharacter(String),
}

/// Object family an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Song,
    Track,
    Device,
    Scene,
    Clip,
    ClipSlot,
    View,
    Api,
    Application,
    Test,
    Error,
    /// Outside the root, or an unknown first segment.
    Other,
}

impl Domain {
    /// Domains whose `get` operations are answered.
    pub const GETTERS: [Domain; 9] = [
        Domain::Song,
        Domain::Track,
        Domain::Device,
        Domain::Scene,
        Domain::Clip,
        Domain::ClipSlot,
        Domain::View,
        Domain::Api,
        Domain::Application,
    ];

    pub fn from_segment(segment: &str) -> Self {
        match segment {
            "song" => Domain::Song,
            "track" => Domain::Track,
            "device" => Domain::Device,
            "scene" => Domain::Scene,
            "clip" => Domain::Clip,
            "clip_slot" => Domain::ClipSlot,
            "view" => Domain::View,
            "api" => Domain::Api,
            "application" => Domain::Application,
            "test" => Domain::Test,
            "error" => Domain::Error,
            _ => Domain::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Song => "song",
            Domain::Track => "track",
            Domain::Device => "device",
            Domain::Scene => "scene",
            Domain::Clip => "clip",
            Domain::ClipSlot => "clip_slot",
            Domain::View => "view",
            Domain::Api => "api",
            Domain::Application => "application",
            Domain::Test => "test",
            Domain::Error => "error",
            Domain::Other => "other",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the remote application answers an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyExpectation {
    AwaitsReply,
    OneWay,
}

/// A validated, classified OSC address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OscAddress {
    raw: String,
    domain: Domain,
    expectation: ReplyExpectation,
}

impl OscAddress {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn expectation(&self) -> ReplyExpectation {
        self.expectation
    }

    pub fn awaits_reply(&self) -> bool {
        self.expectation == ReplyExpectation::AwaitsReply
    }

    pub fn into_string(self) -> String {
        self.raw
    }
}

impl fmt::Display for OscAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for OscAddress {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Classifies addresses relative to a namespace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCatalog {
    root: String,
}

impl Default for AddressCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl AddressCatalog {
    /// `root` is either empty (bare namespace) or a path like `/live`.
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    /// Validate and classify an address.
    pub fn classify(&self, raw: &str) -> Result<OscAddress, AddressError> {
        validate(raw)?;

        let domain = match self.strip_root(raw) {
            Some(rest) => rest
                .trim_start_matches('/')
                .split('/')
                .next()
                .map(Domain::from_segment)
                .unwrap_or(Domain::Other),
            None => Domain::Other,
        };

        let expectation = match domain {
            Domain::Test | Domain::Error => ReplyExpectation::AwaitsReply,
            Domain::Other => ReplyExpectation::OneWay,
            _ => {
                let is_get = self
                    .strip_root(raw)
                    .and_then(|rest| rest.trim_start_matches('/').split('/').nth(1))
                    == Some("get");
                if is_get {
                    ReplyExpectation::AwaitsReply
                } else {
                    ReplyExpectation::OneWay
                }
            }
        };

        Ok(OscAddress {
            raw: raw.to_string(),
            domain,
            expectation,
        })
    }

    /// Address prefixes that await a reply, reported by `status`.
    pub fn reply_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = Domain::GETTERS
            .iter()
            .map(|d| format!("{}/{}/get", self.root, d))
            .collect();
        prefixes.push(format!("{}/test", self.root));
        prefixes.push(format!("{}/error", self.root));
        prefixes
    }

    /// The part of `raw` after the root, if `raw` lives under it.
    fn strip_root<'a>(&self, raw: &'a str) -> Option<&'a str> {
        if self.root.is_empty() {
            return Some(raw);
        }
        let rest = raw.strip_prefix(self.root.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

fn validate(raw: &str) -> Result<(), AddressError> {
    if raw.is_empty() {
        return Err(AddressError::Empty);
    }
    if !raw.starts_with('/') {
        return Err(AddressError::NoLeadingSlash(raw.to_string()));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AddressError::BadCharacter(raw.to_string()));
    }
    if raw.len() > 1 && raw[1..].split('/').any(str::is_empty) {
        return Err(AddressError::EmptySegment(raw.to_string()));
    }
    Ok(())
}
