//! Signing keys for inbound connector tokens, discovered through an OpenID metadata document.

use crate::error::GatewayError;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Keys older than this are refetched before use.
const KEY_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
/// An unknown `kid` triggers a refetch only when the keys are at least this old.
const UNKNOWN_KID_REFRESH_AFTER: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct OpenIdMetadata {
    jwks_uri: String,
}

/// One RSA signing key from the JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningKey {
    pub kid: String,
    #[serde(default)]
    pub kty: String,
    pub n: String,
    pub e: String,
    /// Channel ids this key is endorsed for. Empty means no restriction.
    #[serde(default)]
    pub endorsements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeySet {
    #[serde(default)]
    keys: Vec<SigningKey>,
}

struct CachedKeys {
    keys: Vec<SigningKey>,
    fetched_at: Instant,
}

impl CachedKeys {
    fn find(&self, kid: &str) -> Option<SigningKey> {
        self.keys.iter().find(|k| k.kid == kid).cloned()
    }
}

/// Cached JWKS for one OpenID metadata URL.
pub struct OpenIdKeyStore {
    client: reqwest::Client,
    metadata_url: String,
    max_age: Duration,
    cache: RwLock<Option<CachedKeys>>,
    /// Held while fetching so concurrent misses share one refresh.
    refresh: Mutex<()>,
}

fn unknown_key(kid: &str) -> GatewayError {
    GatewayError::Authentication(format!("unknown signing key {}", kid))
}

impl OpenIdKeyStore {
    pub fn new(metadata_url: impl Into<String>, timeout_ms: u64) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            metadata_url: metadata_url.into(),
            max_age: KEY_MAX_AGE,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
        })
    }

    #[cfg(test)]
    fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Key with id `kid`, fetching or refreshing the key set when needed. When a refresh fails,
    /// a key from the previous set is still served.
    pub async fn key(&self, kid: &str) -> Result<SigningKey, GatewayError> {
        let stale = {
            let cache = self.cache.read().await;
            match cache.as_ref() {
                Some(c) => {
                    let age = c.fetched_at.elapsed();
                    if age < self.max_age {
                        if let Some(k) = c.find(kid) {
                            return Ok(k);
                        }
                        if age < UNKNOWN_KID_REFRESH_AFTER {
                            return Err(unknown_key(kid));
                        }
                    }
                    c.find(kid)
                }
                None => None,
            }
        };

        let _refresh = self.refresh.lock().await;
        {
            // Another caller may have refreshed while we waited.
            let cache = self.cache.read().await;
            if let Some(c) = cache.as_ref() {
                let age = c.fetched_at.elapsed();
                if age < self.max_age && age < UNKNOWN_KID_REFRESH_AFTER {
                    return c.find(kid).ok_or_else(|| unknown_key(kid));
                }
            }
        }

        match self.fetch().await {
            Ok(keys) => {
                let fresh = CachedKeys {
                    keys,
                    fetched_at: Instant::now(),
                };
                let found = fresh.find(kid);
                *self.cache.write().await = Some(fresh);
                found.ok_or_else(|| unknown_key(kid))
            }
            Err(e) => match stale {
                Some(k) => {
                    log::warn!("signing key refresh failed, serving cached key {}: {}", kid, e);
                    Ok(k)
                }
                None => Err(e),
            },
        }
    }

    async fn fetch(&self) -> Result<Vec<SigningKey>, GatewayError> {
        let res = self.client.get(&self.metadata_url).send().await?;
        if !res.status().is_success() {
            return Err(GatewayError::Authentication(format!(
                "openid metadata {} returned {}",
                self.metadata_url,
                res.status().as_u16()
            )));
        }
        let metadata: OpenIdMetadata = res.json().await?;
        let res = self.client.get(&metadata.jwks_uri).send().await?;
        if !res.status().is_success() {
            return Err(GatewayError::Authentication(format!(
                "jwks {} returned {}",
                metadata.jwks_uri,
                res.status().as_u16()
            )));
        }
        let set: KeySet = res.json().await?;
        let keys: Vec<SigningKey> = set
            .keys
            .into_iter()
            .filter(|k| k.kty.is_empty() || k.kty == "RSA")
            .collect();
        log::info!(
            "loaded {} signing key(s) from {}",
            keys.len(),
            metadata.jwks_uri
        );
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const JWKS: &str = include_str!("../../tests/fixtures/jwks.json");

    #[tokio::test]
    async fn keys_are_fetched_once_and_cached() {
        let server = MockServer::start_async().await;
        let metadata = server.mock(|when, then| {
            when.method(GET).path("/v1/.well-known/openidconfiguration");
            then.status(200).json_body(json!({
                "issuer": "https://api.botframework.com",
                "jwks_uri": server.url("/v1/.well-known/keys")
            }));
        });
        let jwks = server.mock(|when, then| {
            when.method(GET).path("/v1/.well-known/keys");
            then.status(200)
                .header("content-type", "application/json")
                .body(JWKS);
        });
        let store =
            OpenIdKeyStore::new(server.url("/v1/.well-known/openidconfiguration"), 2_000).unwrap();

        let key = store.key("test-key-1").await.unwrap();
        assert_eq!(key.e, "AQAB");
        assert!(key.endorsements.iter().any(|e| e == "webchat"));
        store.key("test-key-1").await.unwrap();
        assert_eq!(metadata.calls(), 1);
        assert_eq!(jwks.calls(), 1);

        // Unknown kid right after a fetch does not hammer the endpoint.
        let err = store.key("rotated").await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
        assert_eq!(jwks.calls(), 1);
    }

    #[tokio::test]
    async fn expired_keys_survive_failed_refresh() {
        let server = MockServer::start_async().await;
        let mut metadata = server.mock(|when, then| {
            when.method(GET).path("/v1/.well-known/openidconfiguration");
            then.status(200).json_body(json!({
                "jwks_uri": server.url("/v1/.well-known/keys")
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/.well-known/keys");
            then.status(200)
                .header("content-type", "application/json")
                .body(JWKS);
        });
        let store = OpenIdKeyStore::new(server.url("/v1/.well-known/openidconfiguration"), 2_000)
            .unwrap()
            .with_max_age(Duration::ZERO);
        store.key("test-key-1").await.unwrap();

        metadata.delete();
        let outage = server.mock(|when, then| {
            when.method(GET).path("/v1/.well-known/openidconfiguration");
            then.status(503);
        });
        let key = store.key("test-key-1").await.unwrap();
        assert_eq!(key.kid, "test-key-1");
        assert_eq!(outage.calls(), 1);
        assert!(store.key("never-seen").await.is_err());
    }

    #[tokio::test]
    async fn metadata_failure_is_reported() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/meta");
            then.status(503);
        });
        let store = OpenIdKeyStore::new(server.url("/meta"), 2_000).unwrap();
        assert!(store.key("test-key-1").await.is_err());
    }
}
