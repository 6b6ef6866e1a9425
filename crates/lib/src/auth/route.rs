//! Regional vs global channel route, derived from an activity's service URL.
//!
//! The verifier and the connector client share one [`ChannelRouter`], so the authority used for
//! a reply is always the one matching the turn's inbound service URL.

use crate::config::{BotSettings, RouteSelection, TokenAuthority};
use std::sync::Arc;

/// Connector route for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRoute {
    Global,
    Regional,
}

impl ChannelRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRoute::Global => "global",
            ChannelRoute::Regional => "regional",
        }
    }
}

/// Maps service URLs to routes and routes to token authorities.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    settings: Arc<BotSettings>,
}

impl ChannelRouter {
    pub fn new(settings: Arc<BotSettings>) -> Self {
        Self { settings }
    }

    /// Route for `service_url`. Under per-request selection a URL is regional when its host
    /// equals, or is a subdomain of, one of the configured regional hosts.
    pub fn route_for(&self, service_url: &str) -> ChannelRoute {
        match self.settings.route_selection() {
            RouteSelection::Global => ChannelRoute::Global,
            RouteSelection::Regional => ChannelRoute::Regional,
            RouteSelection::PerRequest => {
                let Some(host) = reqwest::Url::parse(service_url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
                else {
                    return ChannelRoute::Global;
                };
                let regional = self.settings.regional_hosts().iter().any(|r| {
                    host == *r
                        || host
                            .strip_suffix(r.as_str())
                            .is_some_and(|prefix| prefix.ends_with('.'))
                });
                if regional {
                    ChannelRoute::Regional
                } else {
                    ChannelRoute::Global
                }
            }
        }
    }

    /// Login authority and scope for `route`.
    pub fn authority(&self, route: ChannelRoute) -> &TokenAuthority {
        match route {
            ChannelRoute::Global => self.settings.global_authority(),
            ChannelRoute::Regional => self.settings.regional_authority(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn router(selection: RouteSelection) -> ChannelRouter {
        let mut config = Config::default();
        config.bot.app_id = Some("app".to_string());
        config.bot.app_password = Some("secret".to_string());
        config.channel.channel_service = Some("https://europe.api.botframework.com".to_string());
        config.channel.regional_hosts = vec!["europe.webchat.botframework.com".to_string()];
        config.channel.regional_login_url =
            Some("https://login.microsoftonline.com/eu.botframework.com".to_string());
        config.channel.route_selection = selection;
        ChannelRouter::new(Arc::new(BotSettings::from_config(&config).unwrap()))
    }

    #[test]
    fn per_request_matches_regional_hosts() {
        let r = router(RouteSelection::PerRequest);
        assert_eq!(
            r.route_for("https://europe.webchat.botframework.com/"),
            ChannelRoute::Regional
        );
        assert_eq!(
            r.route_for("https://EUROPE.api.botframework.com/v3"),
            ChannelRoute::Regional
        );
        assert_eq!(
            r.route_for("https://edge.europe.webchat.botframework.com/"),
            ChannelRoute::Regional
        );
        assert_eq!(
            r.route_for("https://webchat.botframework.com/"),
            ChannelRoute::Global
        );
        assert_eq!(
            r.route_for("https://noteurope.webchat.botframework.com/"),
            ChannelRoute::Global
        );
        assert_eq!(r.route_for("not a url"), ChannelRoute::Global);
    }

    #[test]
    fn pinned_selection_ignores_service_url() {
        assert_eq!(
            router(RouteSelection::Global).route_for("https://europe.webchat.botframework.com/"),
            ChannelRoute::Global
        );
        assert_eq!(
            router(RouteSelection::Regional).route_for("https://webchat.botframework.com/"),
            ChannelRoute::Regional
        );
    }

    #[test]
    fn authority_follows_route() {
        let r = router(RouteSelection::PerRequest);
        assert_eq!(
            r.authority(ChannelRoute::Regional).login_url,
            "https://login.microsoftonline.com/eu.botframework.com"
        );
        assert_eq!(
            r.authority(ChannelRoute::Global).login_url,
            crate::config::GLOBAL_LOGIN_URL
        );
    }
}
