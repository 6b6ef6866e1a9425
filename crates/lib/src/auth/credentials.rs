//! OAuth client-credentials token cache keyed by (authority, scope).
//!
//! Each key owns an async mutex held across the refresh, so concurrent callers for one key wait
//! for a single in-flight token request instead of racing their own.

use crate::error::GatewayError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;
/// Used when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// A cached access token for one (authority, scope) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub authority: String,
    pub scope: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True while `now` is more than the safety margin before `expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    /// Seconds; some authorities send it as a string.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

fn expires_in_secs(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
}

type CacheKey = (String, String);
type Slot = Arc<Mutex<Option<Credential>>>;

/// Client-credentials token cache. The single owner and mutator of cached tokens.
pub struct CredentialCache {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    slots: RwLock<HashMap<CacheKey, Slot>>,
}

impl CredentialCache {
    /// `timeout_ms` bounds each token request.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            slots: RwLock::new(HashMap::new()),
        })
    }

    async fn slot(&self, authority: &str, scope: &str) -> Slot {
        let key = (authority.to_string(), scope.to_string());
        if let Some(slot) = self.slots.read().await.get(&key) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Access token for (authority, scope); fetched when absent or about to expire.
    pub async fn get_token(&self, authority: &str, scope: &str) -> Result<String, GatewayError> {
        let slot = self.slot(authority, scope).await;
        let mut entry = slot.lock().await;
        if let Some(cred) = entry.as_ref() {
            if cred.is_valid_at(Utc::now()) {
                return Ok(cred.access_token.clone());
            }
        }
        let fresh = self.fetch(authority, scope).await?;
        let token = fresh.access_token.clone();
        *entry = Some(fresh);
        Ok(token)
    }

    /// Drop the cached entry if it still holds `stale_token`. An entry already replaced by a
    /// concurrent refresh is kept.
    pub async fn invalidate(&self, authority: &str, scope: &str, stale_token: &str) {
        let slot = self.slot(authority, scope).await;
        let mut entry = slot.lock().await;
        if entry
            .as_ref()
            .is_some_and(|c| c.access_token == stale_token)
        {
            log::debug!("credential cache: invalidated token for {} {}", authority, scope);
            *entry = None;
        }
    }

    /// Snapshot of the cached entry, if any.
    pub async fn credential(&self, authority: &str, scope: &str) -> Option<Credential> {
        let slot = self.slot(authority, scope).await;
        let entry = slot.lock().await;
        entry.clone()
    }

    /// POST {authority}/oauth2/v2.0/token with the client-credentials grant.
    async fn fetch(&self, authority: &str, scope: &str) -> Result<Credential, GatewayError> {
        let url = format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/'));
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        log::debug!("credential cache: requesting token from {} for {}", url, scope);
        let res = self.client.post(&url).form(&params).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            log::warn!("token endpoint {} returned {}: {}", url, status, body);
            return Err(GatewayError::Authentication(format!(
                "token endpoint returned {}",
                status.as_u16()
            )));
        }
        let body = res.text().await?;
        let data: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            GatewayError::Authentication(format!("unreadable token response: {}", e))
        })?;
        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                GatewayError::Authentication("token response lacks access_token".to_string())
            })?;
        let expires_at = Utc::now() + Duration::seconds(expires_in_secs(data.expires_in.as_ref()));
        log::info!("credential cache: token acquired for {} (expires {})", scope, expires_at);
        Ok(Credential {
            authority: authority.to_string(),
            scope: scope.to_string(),
            access_token,
            expires_at,
        })
    }
}
