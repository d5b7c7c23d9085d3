//! Remote telemetry gateway.
//!
//! Typed boundary over the external observability platform's catalog, metrics
//! and trace-search APIs. The gateway owns auth, pagination and per-call
//! timeouts; the sync pipeline only ever sees complete logical sequences.
//! Empty results are valid answers, never errors.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;

use crate::store::entities::{CatalogEntry, TelemetryEntry};

pub mod datadog;
pub mod mock;

pub use datadog::DatadogGateway;
pub use mock::MockGateway;

/// Errors from the remote platform boundary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport, auth or timeout failure. Aborts the current sync stage.
    #[error("remote platform unavailable: {0}")]
    RemoteUnavailable(String),

    /// The platform answered but the payload did not parse.
    #[error("unexpected payload from remote platform: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Payload(err.to_string())
        } else {
            GatewayError::RemoteUnavailable(err.to_string())
        }
    }
}

/// Client abstraction over the external catalog/metrics/trace-search APIs.
#[async_trait]
pub trait TelemetryGateway: Send + Sync {
    /// Fetch the full service catalog, walking all pages.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, GatewayError>;

    /// Fetch services observed emitting trace telemetry within `window`.
    async fn fetch_instrumented_services(
        &self,
        window: Duration,
    ) -> Result<Vec<TelemetryEntry>, GatewayError>;

    /// Best-effort service dependency hints from catalog metadata.
    ///
    /// An empty map means "no hinted dependencies"; a fetch failure is an
    /// `Err`, so callers can tell the two apart.
    async fn fetch_dependency_hints(
        &self,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, GatewayError>;
}

/// Known tracer languages: lexicon key to display name. First match wins.
pub const LANGUAGE_LEXICON: &[(&str, &str)] = &[
    ("python", "Python"),
    ("java", "Java"),
    ("go", "Go"),
    ("node", "Node.js"),
    ("ruby", "Ruby"),
    ("php", "PHP"),
    ("dotnet", ".NET"),
    ("cpp", "C++"),
];

/// Parse colon-delimited `key:value` tags. A tag without a colon becomes a
/// key with an empty value.
pub fn parse_tags(raw: &[String]) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for tag in raw {
        match tag.split_once(':') {
            Some((key, value)) => tags.insert(key.to_string(), value.to_string()),
            None => tags.insert(tag.clone(), String::new()),
        };
    }
    tags
}

/// Infer the tracer language from telemetry tags.
///
/// A `language:` prefixed tag is checked against the lexicon first; failing
/// that, any tag containing a lexicon key matches. No match yields `None`.
pub fn infer_language(raw: &[String]) -> Option<String> {
    for tag in raw {
        let lower = tag.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("language:") {
            for (key, display) in LANGUAGE_LEXICON {
                if value == *key {
                    return Some((*display).to_string());
                }
            }
        }
    }

    for tag in raw {
        let lower = tag.to_ascii_lowercase();
        for (key, display) in LANGUAGE_LEXICON {
            if lower.contains(key) {
                return Some((*display).to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests;
