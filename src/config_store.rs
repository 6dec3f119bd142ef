use anyhow::Context;
use md5::{Digest, Md5};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;

use crate::catalog::Catalog;

/// Embedded fallback catalog used when `CONFIG_LOCATION` names no recognized scheme.
const DEFAULT_CATALOG: &str = include_str!("../resources/default-catalog.json");

/// A listener invoked after a successful reload that changed the catalog's digest.
type Listener = Box<dyn Fn(Digest16) + Send + Sync>;

/// 16-byte content digest of the raw catalog bytes, used to detect a meaningful change between
/// reloads without re-parsing and re-diffing the parsed structure.
pub type Digest16 = [u8; 16];

/// Envelope the HTTP config-location path unwraps before parsing: `{"id": ..., "data": {...}}`.
#[derive(Deserialize)]
struct Envelope {
    #[allow(dead_code)]
    id: Option<String>,
    data: serde_json::Value,
}

struct State {
    catalog: Arc<Catalog>,
    digest: Digest16,
}

/// Hot-reloading holder for the dataset catalog. Loads from `file://`, `http(s)://`, or an
/// embedded default depending on the scheme of the configured location, and notifies registered
/// listeners whenever a reload's digest differs from the last one observed.
pub struct ConfigStore {
    location: String,
    http: reqwest::Client,
    bearer_token: Option<String>,
    state: RwLock<State>,
    listeners: RwLock<Vec<Listener>>,
}

impl ConfigStore {
    /// Performs an initial load and constructs the store. `bearer_token` is injected as
    /// `Authorization: Bearer <token>` on HTTP fetches when set, mirroring the original's
    /// auth0-token-provider integration.
    pub async fn load(location: impl Into<String>, bearer_token: Option<String>) -> anyhow::Result<Self> {
        let location = location.into();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build config-store HTTP client")?;

        let (raw, catalog) = fetch_and_parse(&http, &location, bearer_token.as_deref()).await?;
        let digest = digest_of(&raw);

        Ok(Self {
            location,
            http,
            bearer_token,
            state: RwLock::new(State {
                catalog: Arc::new(catalog),
                digest,
            }),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Returns the currently active catalog.
    pub async fn current(&self) -> Arc<Catalog> {
        self.state.read().await.catalog.clone()
    }

    /// Registers a listener invoked (with the new digest) after every reload that changes it.
    pub async fn on_change(&self, listener: Listener) {
        self.listeners.write().await.push(listener);
    }

    /// Performs one reload attempt. On parse/fetch failure the prior catalog is retained and the
    /// error is logged, not propagated, so a transient fetch failure does not take the service
    /// down.
    pub async fn reload_once(&self) {
        let outcome =
            fetch_and_parse(&self.http, &self.location, self.bearer_token.as_deref()).await;

        let (raw, catalog) = match outcome {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("catalog reload failed, retaining prior catalog: {:#}", e);
                return;
            }
        };

        let digest = digest_of(&raw);

        let changed = {
            let mut state = self.state.write().await;
            if state.digest == digest {
                false
            } else {
                state.catalog = Arc::new(catalog);
                state.digest = digest;
                true
            }
        };

        if changed {
            tracing::info!("catalog changed, notifying listeners");
            for listener in self.listeners.read().await.iter() {
                listener(digest);
            }
        }
    }

    /// Spawns the periodic reload ticker. The returned task runs until the process exits.
    pub fn spawn_reload_ticker(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.reload_once().await;
            }
        });
    }
}

async fn fetch_and_parse(
    http: &reqwest::Client,
    location: &str,
    bearer_token: Option<&str>,
) -> anyhow::Result<(Vec<u8>, Catalog)> {
    let raw = if let Some(path) = location.strip_prefix("file://") {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("read catalog file at {path}"))?
    } else if location.starts_with("http://") || location.starts_with("https://") {
        fetch_http_with_retries(http, location, bearer_token).await?
    } else {
        DEFAULT_CATALOG.as_bytes().to_vec()
    };

    let catalog = parse_catalog(&raw, location.starts_with("http"))?;

    Ok((raw, catalog))
}

async fn fetch_http_with_retries(
    http: &reqwest::Client,
    location: &str,
    bearer_token: Option<&str>,
) -> anyhow::Result<Vec<u8>> {
    const ATTEMPTS: u32 = 3;

    let mut last_err = None;

    for attempt in 1..=ATTEMPTS {
        let mut request = http.get(location);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => return Ok(bytes.to_vec()),
                Err(e) => last_err = Some(e),
            },
            Err(e) => last_err = Some(e),
        }

        tracing::warn!(attempt, "config-location fetch failed, retrying");
    }

    Err(anyhow::anyhow!(
        "fetch catalog from {location} failed after {ATTEMPTS} attempts: {:#}",
        last_err.expect("at least one attempt recorded")
    ))
}

/// Parses raw catalog bytes. For HTTP-sourced content, unwraps the `{id, data}` envelope first.
fn parse_catalog(raw: &[u8], is_http: bool) -> anyhow::Result<Catalog> {
    if is_http {
        let envelope: Envelope = serde_json::from_slice(raw).context("parse config envelope")?;
        serde_json::from_value(envelope.data).context("parse catalog from envelope data")
    } else {
        serde_json::from_slice(raw).context("parse catalog")
    }
}

fn digest_of(raw: &[u8]) -> Digest16 {
    let mut hasher = Md5::new();
    hasher.update(raw);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_catalog() {
        let raw = br#"{"producers":[],"consumers":[]}"#;
        let catalog = parse_catalog(raw, false).unwrap();
        assert!(catalog.producers.is_empty());
        assert!(catalog.consumers.is_empty());
    }

    #[test]
    fn unwraps_http_envelope() {
        let raw = br#"{"id":"abc","data":{"producers":[],"consumers":[]}}"#;
        let catalog = parse_catalog(raw, true).unwrap();
        assert!(catalog.producers.is_empty());
    }

    #[test]
    fn digest_changes_with_content() {
        let a = digest_of(b"one");
        let b = digest_of(b"two");
        assert_ne!(a, b);
        assert_eq!(digest_of(b"one"), a);
    }
}
