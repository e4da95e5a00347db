//! Domain types shared across the synchronization workflows.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Typed failure surfaced by clients and workflows. `Unauthorized` is never
/// retried and flips the connection's `is_alive` flag; `NotFound` is terminal;
/// the rest re-enter the owning stage's retry budget.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncError {
    #[error("access to PIM service denied")]
    Unauthorized,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Unknown(String),
}

impl SyncError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Unauthorized)
    }
}

/// Bounded-attempt backoff policy threaded through every workflow.
///
/// `next_attempt()` is the only attempt-incrementing transition; a fresh
/// context starts at attempt 0 and different stages configure their own
/// budgets independently.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryContext {
    pub current_attempt: u32,
    pub max_attempts: u32,
    pub attempt_delay_secs: u64,
}

impl RetryContext {
    pub fn empty(max_attempts: u32, attempt_delay: Duration) -> Self {
        Self {
            current_attempt: 0,
            max_attempts,
            attempt_delay_secs: attempt_delay.as_secs(),
        }
    }

    pub fn next_attempt(self) -> Self {
        Self {
            current_attempt: self.current_attempt + 1,
            ..self
        }
    }

    pub fn should_retry(&self) -> bool {
        self.current_attempt < self.max_attempts
    }

    pub fn attempt_delay(&self) -> Duration {
        Duration::from_secs(self.attempt_delay_secs)
    }
}

/// Short-lived access token and its expiry. Scoped to one workflow execution;
/// never written into checkpoints, so a resumed process re-acquires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialLease {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// A lease is refreshed once it is within this margin of expiry.
const STALE_MARGIN_MINUTES: i64 = 15;

impl CredentialLease {
    pub fn new(access_token: String, expires_in_secs: i64, now: DateTime<Utc>) -> Self {
        Self {
            access_token,
            expires_at: now + ChronoDuration::seconds(expires_in_secs),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::minutes(STALE_MARGIN_MINUTES) >= self.expires_at
    }
}

/// Opaque "next page" pointer. Empty means "build the first page from the
/// source filters"; non-empty is a self-contained link from the previous page
/// and all other filter parameters are discarded when following it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageCursor(Option<String>);

impl PageCursor {
    pub fn start() -> Self {
        Self(None)
    }

    pub fn from_link(link: impl Into<String>) -> Self {
        let link = link.into();
        if link.is_empty() {
            Self(None)
        } else {
            Self(Some(link))
        }
    }

    /// Next cursor from an upstream page response; `None` or an empty link
    /// means the source is drained.
    pub fn advance(next: Option<String>) -> Self {
        Self(next.filter(|l| !l.is_empty()))
    }

    pub fn is_start(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_link(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Data sources tracked in the progress ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Categories,
    Products,
    Media,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Categories => "categories",
            SourceKind::Products => "products",
            SourceKind::Media => "media",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "categories" => Some(SourceKind::Categories),
            "products" => Some(SourceKind::Products),
            "media" => Some(SourceKind::Media),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunKind {
    Manual,
    Automatic,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Manual => "manual",
            RunKind::Automatic => "automatic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(RunKind::Manual),
            "automatic" => Some(RunKind::Automatic),
            _ => None,
        }
    }
}

/// One append-only ledger entry. A source's "last successful sync time" for
/// the next run is the most recent entry with `succeeded = true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncDetail {
    pub synced_at: DateTime<Utc>,
    pub ingested_count: i64,
    pub source: SourceKind,
    pub run_kind: RunKind,
    pub succeeded: bool,
}

impl SyncDetail {
    pub fn now(ingested_count: i64, source: SourceKind, run_kind: RunKind, succeeded: bool) -> Self {
        Self {
            synced_at: Utc::now(),
            ingested_count,
            source,
            run_kind,
            succeeded,
        }
    }
}

/// Channel discovered from the PIM during connection preparation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel_code: String,
    pub channel_name: String,
    pub category_tree: String,
}

/// Flat property submitted to the downstream ingestion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Property {
    pub id: String,
    pub value: String,
    pub language: Option<String>,
}

impl Property {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            language: None,
        }
    }

    pub fn localized(
        id: impl Into<String>,
        value: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            language: Some(language.into()),
        }
    }
}

/// Flat entity submitted to the downstream ingestion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub key: String,
    pub delete: bool,
    pub properties: Vec<Property>,
}

impl Entity {
    pub fn upsert(key: impl Into<String>, properties: Vec<Property>) -> Self {
        Self {
            key: key.into(),
            delete: false,
            properties,
        }
    }
}

/// Per-family media derived from one product: download URLs plus the
/// product-level properties carried onto each media entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FamilyMedia {
    pub urls: Vec<String>,
    pub carried_properties: Vec<Property>,
}

/// One-way derived artifact handed from the product workflow to the media
/// workflow. Keyed by product; media never holds a back-pointer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFetchRequest {
    pub product_key: String,
    pub families: BTreeMap<String, FamilyMedia>,
}

impl MediaFetchRequest {
    pub fn is_empty(&self) -> bool {
        self.families.values().all(|f| f.urls.is_empty())
    }
}
