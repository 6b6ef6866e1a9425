//! Inbound webhook verification: bearer token, then body, then token/activity consistency.
//!
//! Expected issuer, audience and signing keys come from [`BotSettings`], never from the request.

use crate::activity::Activity;
use crate::auth::openid::OpenIdKeyStore;
use crate::auth::route::{ChannelRoute, ChannelRouter};
use crate::config::BotSettings;
use crate::error::GatewayError;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;

/// Clock skew tolerated on `exp`/`nbf`.
const CLOCK_SKEW_SECS: u64 = 300;

/// Claims the gateway reads from a connector token beyond the standard validation.
#[derive(Debug, Deserialize)]
struct ConnectorClaims {
    #[serde(default)]
    serviceurl: Option<String>,
}

/// An activity that passed verification, with the route its reply must use.
#[derive(Debug, Clone)]
pub struct VerifiedActivity {
    pub activity: Activity,
    pub route: ChannelRoute,
}

pub struct InboundVerifier {
    settings: Arc<BotSettings>,
    keys: OpenIdKeyStore,
    router: ChannelRouter,
}

fn bearer_token(authorization: Option<&str>) -> Result<&str, GatewayError> {
    let value = authorization
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::Authentication("missing Authorization header".to_string()))?;
    let (scheme, token) = value.split_once(' ').ok_or_else(|| {
        GatewayError::Authentication("malformed Authorization header".to_string())
    })?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(GatewayError::Authentication(
            "Authorization scheme is not Bearer".to_string(),
        ));
    }
    Ok(token)
}

fn rejected(what: &str, e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Authentication(format!("{}: {}", what, e))
}

impl InboundVerifier {
    pub fn new(settings: Arc<BotSettings>, router: ChannelRouter) -> Result<Self, GatewayError> {
        let keys = OpenIdKeyStore::new(settings.open_id_metadata(), settings.token_timeout_ms())?;
        Ok(Self {
            settings,
            keys,
            router,
        })
    }

    /// Verify an inbound call. `authorization` is the raw header value, `body` the raw JSON.
    pub async fn verify(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<VerifiedActivity, GatewayError> {
        let token = bearer_token(authorization)?;
        let (claims, endorsements) = self.validate_token(token).await?;

        let activity: Activity = serde_json::from_slice(body)
            .map_err(|e| GatewayError::Validation(format!("malformed activity: {}", e)))?;

        let service_url = activity.service_url.as_deref().unwrap_or("");
        if let Some(claimed) = claims.serviceurl.as_deref() {
            if claimed != service_url {
                return Err(GatewayError::Authentication(format!(
                    "serviceurl claim {} does not match activity serviceUrl {}",
                    claimed, service_url
                )));
            }
        }
        if !endorsements.is_empty() {
            let channel = activity.channel_id.as_deref().unwrap_or("");
            if !endorsements.iter().any(|e| e == channel) {
                return Err(GatewayError::Authentication(format!(
                    "signing key is not endorsed for channel {:?}",
                    channel
                )));
            }
        }

        let route = self.router.route_for(service_url);
        Ok(VerifiedActivity { activity, route })
    }

    async fn validate_token(
        &self,
        token: &str,
    ) -> Result<(ConnectorClaims, Vec<String>), GatewayError> {
        let header = decode_header(token).map_err(|e| rejected("unreadable token header", e))?;
        if header.alg != Algorithm::RS256 {
            return Err(GatewayError::Authentication(format!(
                "unexpected token algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| GatewayError::Authentication("token has no kid".to_string()))?;
        let key = self
            .keys
            .key(&kid)
            .await
            .map_err(|e| rejected("signing key unavailable", e))?;
        let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e)
            .map_err(|e| rejected("invalid signing key", e))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.settings.app_id()]);
        validation.set_issuer(self.settings.valid_issuers());
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = CLOCK_SKEW_SECS;

        let data = decode::<ConnectorClaims>(token, &decoding_key, &validation)
            .map_err(|e| rejected("token rejected", e))?;
        Ok((data.claims, key.endorsements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityType;
    use crate::config::Config;
    use httpmock::prelude::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SIGNING_KEY: &str = include_str!("../../tests/fixtures/signing_key.pem");
    const JWKS: &str = include_str!("../../tests/fixtures/jwks.json");
    const SERVICE_URL: &str = "https://europe.webchat.botframework.com/";

    fn settings(server: &MockServer) -> Arc<BotSettings> {
        let mut config = Config::default();
        config.bot.app_id = Some("app-id".to_string());
        config.bot.app_password = Some("secret".to_string());
        config.channel.open_id_metadata = Some(server.url("/v1/.well-known/openidconfiguration"));
        config.channel.regional_hosts = vec!["europe.webchat.botframework.com".to_string()];
        Arc::new(BotSettings::from_config(&config).unwrap())
    }

    fn mock_keys(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/v1/.well-known/openidconfiguration");
            then.status(200).json_body(json!({
                "issuer": "https://api.botframework.com",
                "jwks_uri": server.url("/v1/.well-known/keys")
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/.well-known/keys");
            then.status(200)
                .header("content-type", "application/json")
                .body(JWKS);
        });
    }

    fn sign(claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test-key-1".to_string());
        let key = EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }

    fn claims() -> serde_json::Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "iss": "https://api.botframework.com",
            "aud": "app-id",
            "exp": now + 3600,
            "nbf": now - 10,
            "serviceurl": SERVICE_URL
        })
    }

    fn body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "message",
            "channelId": "webchat",
            "serviceUrl": SERVICE_URL,
            "conversation": { "id": "conv-1" },
            "from": { "id": "user1" },
            "recipient": { "id": "app-id" },
            "text": "hello"
        }))
        .unwrap()
    }

    async fn verifier(server: &MockServer) -> InboundVerifier {
        mock_keys(server);
        let settings = settings(server);
        InboundVerifier::new(settings.clone(), ChannelRouter::new(settings)).unwrap()
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("bearer  abc ")).unwrap(), "abc");
        assert!(bearer_token(None).is_err());
        assert!(bearer_token(Some("")).is_err());
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer")).is_err());
    }

    #[tokio::test]
    async fn valid_token_yields_activity_and_route() {
        let server = MockServer::start_async().await;
        let v = verifier(&server).await;
        let auth = format!("Bearer {}", sign(claims()));

        let verified = v.verify(Some(&auth), &body()).await.unwrap();
        assert_eq!(verified.activity.typ, ActivityType::Message);
        assert_eq!(verified.activity.text.as_deref(), Some("hello"));
        assert_eq!(verified.activity.service_url.as_deref(), Some(SERVICE_URL));
        assert_eq!(verified.route, ChannelRoute::Regional);
    }

    #[tokio::test]
    async fn missing_or_bad_tokens_are_rejected() {
        let server = MockServer::start_async().await;
        let v = verifier(&server).await;

        for auth in [None, Some("Bearer not-a-jwt".to_string())] {
            let err = v.verify(auth.as_deref(), &body()).await.unwrap_err();
            assert!(matches!(err, GatewayError::Authentication(_)));
        }

        let mut wrong_aud = claims();
        wrong_aud["aud"] = json!("someone-else");
        let mut wrong_iss = claims();
        wrong_iss["iss"] = json!("https://evil.example");
        let mut expired = claims();
        expired["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        for c in [wrong_aud, wrong_iss, expired] {
            let auth = format!("Bearer {}", sign(c));
            let err = v.verify(Some(&auth), &body()).await.unwrap_err();
            assert!(matches!(err, GatewayError::Authentication(_)));
        }
    }

    #[tokio::test]
    async fn token_is_checked_before_body() {
        let server = MockServer::start_async().await;
        let v = verifier(&server).await;

        let err = v.verify(None, b"{not json").await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));

        let auth = format!("Bearer {}", sign(claims()));
        let err = v.verify(Some(&auth), b"{not json").await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(err.inbound_status(), 400);
    }

    #[tokio::test]
    async fn service_url_claim_must_match() {
        let server = MockServer::start_async().await;
        let v = verifier(&server).await;
        let mut c = claims();
        c["serviceurl"] = json!("https://attacker.example/");
        let auth = format!("Bearer {}", sign(c));
        let err = v.verify(Some(&auth), &body()).await.unwrap_err();
        assert_eq!(err.inbound_status(), 401);
    }

    #[tokio::test]
    async fn channel_must_be_endorsed() {
        let server = MockServer::start_async().await;
        let v = verifier(&server).await;
        let auth = format!("Bearer {}", sign(claims()));
        let mut activity: serde_json::Value = serde_json::from_slice(&body()).unwrap();
        activity["channelId"] = json!("sms");
        let err = v
            .verify(Some(&auth), &serde_json::to_vec(&activity).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
    }
}
