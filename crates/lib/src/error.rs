//! Gateway error taxonomy shared by the verifier, credential cache and connector client.

/// Errors surfaced by the gateway's protocol components.
///
/// Inbound failures (`Authentication`, `Validation`) are mapped to HTTP status codes by the
/// server; outbound failures are returned to the caller of `ConnectorClient::send`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or inconsistent settings; detected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Token endpoint rejection, or an inbound token that failed verification.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Malformed inbound payload or an activity missing required routing fields.
    #[error("invalid activity: {0}")]
    Validation(String),
    /// Non-2xx answer from the connector's activities endpoint.
    #[error("channel delivery failed: {status} {body}")]
    ChannelDelivery { status: u16, body: String },
    /// Network-level failure (timeout, DNS, connection reset).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GatewayError {
    /// HTTP status the inbound endpoint answers with for this error.
    pub fn inbound_status(&self) -> u16 {
        match self {
            GatewayError::Authentication(_) => 401,
            GatewayError::Validation(_) => 400,
            _ => 500,
        }
    }
}
