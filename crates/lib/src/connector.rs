//! Outbound delivery to the connector's activities endpoint.

use crate::activity::Activity;
use crate::auth::{ChannelRoute, ChannelRouter, CredentialCache};
use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Capability to deliver an activity to the conversation it names.
#[async_trait]
pub trait ActivitySender: Send + Sync {
    /// Deliver `activity` with the credentials of `route`, the route the inbound turn was
    /// verified on. Returns the connector-assigned id (empty when none was returned).
    async fn send(&self, activity: &Activity, route: ChannelRoute) -> Result<String, GatewayError>;
}

#[derive(Debug, Default, Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Client for `POST {serviceUrl}/v3/conversations/{conversationId}/activities`.
pub struct ConnectorClient {
    client: reqwest::Client,
    credentials: Arc<CredentialCache>,
    router: ChannelRouter,
}

/// Activities endpoint for `service_url`; the conversation id is percent-encoded as one segment.
fn activities_url(service_url: &str, conversation_id: &str) -> Result<reqwest::Url, GatewayError> {
    let mut url = reqwest::Url::parse(service_url)
        .map_err(|e| GatewayError::Validation(format!("invalid serviceUrl {}: {}", service_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| GatewayError::Validation(format!("serviceUrl {} cannot be a base", service_url)))?
        .pop_if_empty()
        .extend(["v3", "conversations", conversation_id, "activities"]);
    Ok(url)
}

impl ConnectorClient {
    /// `timeout_ms` bounds each delivery request.
    pub fn new(
        credentials: Arc<CredentialCache>,
        router: ChannelRouter,
        timeout_ms: u64,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            credentials,
            router,
        })
    }

    /// Send `activity` to its conversation using the token authority of `route`. A 401
    /// invalidates the cached token and retries once; transport failures are returned without
    /// retrying.
    pub async fn send(
        &self,
        activity: &Activity,
        route: ChannelRoute,
    ) -> Result<String, GatewayError> {
        let service_url = activity
            .service_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Validation("activity has no serviceUrl".to_string()))?;
        let conversation_id = activity
            .conversation_id()
            .ok_or_else(|| GatewayError::Validation("activity has no conversation id".to_string()))?;
        let url = activities_url(service_url, conversation_id)?;
        let authority = self.router.authority(route);

        let mut retried = false;
        loop {
            let token = self
                .credentials
                .get_token(&authority.login_url, &authority.scope)
                .await?;
            let res = self
                .client
                .post(url.clone())
                .bearer_auth(&token)
                .json(activity)
                .send()
                .await?;
            let status = res.status();
            if status.is_success() {
                let body = res.text().await.unwrap_or_default();
                let id = serde_json::from_str::<ResourceResponse>(&body)
                    .unwrap_or_default()
                    .id
                    .unwrap_or_default();
                log::debug!(
                    "delivered {} activity to {} ({} route), id {:?}",
                    activity.typ,
                    conversation_id,
                    route.as_str(),
                    id
                );
                return Ok(id);
            }
            let body = res.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED && !retried {
                log::warn!(
                    "connector rejected token for {} ({} route); refreshing and retrying once",
                    service_url,
                    route.as_str()
                );
                self.credentials
                    .invalidate(&authority.login_url, &authority.scope, &token)
                    .await;
                retried = true;
                continue;
            }
            log::warn!("connector {} returned {}: {}", url, status, body);
            return Err(GatewayError::ChannelDelivery {
                status: status.as_u16(),
                body,
            });
        }
    }
}

#[async_trait]
impl ActivitySender for ConnectorClient {
    async fn send(&self, activity: &Activity, route: ChannelRoute) -> Result<String, GatewayError> {
        ConnectorClient::send(self, activity, route).await
    }
}
