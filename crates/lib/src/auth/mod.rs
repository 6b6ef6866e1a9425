//! Connector authentication: outbound app tokens and inbound token verification.

mod credentials;
mod openid;
mod route;
mod verifier;

pub use credentials::{Credential, CredentialCache};
pub use openid::{OpenIdKeyStore, SigningKey};
pub use route::{ChannelRoute, ChannelRouter};
pub use verifier::{InboundVerifier, VerifiedActivity};
