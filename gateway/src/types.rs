use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
}

impl PrState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
        }
    }
}

/// A pull request as handed to the aggregation layer. Built from the typed
/// upstream records at the boundary and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PullRequest {
    pub title: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub state: PrState,
    pub url: String,
    /// `owner/name` of the repository the pull request belongs to
    pub repository: String,
}

impl PullRequest {
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.state == PrState::Open && !self.is_merged()
    }

    pub fn is_closed_unmerged(&self) -> bool {
        self.state == PrState::Closed && !self.is_merged()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Caller supplied upstream credential. Only ever leaves the process in the
/// `Authorization` header; `Debug` is redacted and cache keys use the
/// fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        AccessToken(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Non-empty and made of visible ASCII only, so it can be sent as a
    /// header value as is.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_graphic())
    }

    /// Short, stable, non-reversible identifier of the token.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}
