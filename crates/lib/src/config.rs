//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.parley/config.json`) and then overridden by the
//! Bot Framework style environment variables (`MicrosoftAppId`, `ChannelService`, ...). This is
//! the only module that reads the process environment; everything else receives a
//! [`BotSettings`] built once at startup.

use crate::error::GatewayError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const GLOBAL_LOGIN_URL: &str = "https://login.microsoftonline.com/botframework.com";
pub const GLOBAL_OAUTH_SCOPE: &str = "https://api.botframework.com/.default";
pub const GLOBAL_OPENID_METADATA: &str =
    "https://login.botframework.com/v1/.well-known/openidconfiguration";
pub const BOT_FRAMEWORK_ISSUER: &str = "https://api.botframework.com";
pub const DEFAULT_DIRECT_LINE_BASE: &str = "https://directline.botframework.com";
const LOGIN_HOST: &str = "https://login.microsoftonline.com";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bot identity (app id, secret, app type).
    #[serde(default)]
    pub bot: BotConfig,

    /// Connector endpoints and route selection.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Direct Line settings for the conversation test client.
    #[serde(default)]
    pub direct_line: DirectLineConfig,
}

/// Gateway bind, port and outbound timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Listen port (default 8080). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the connector must reach the endpoint).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Timeout for token endpoint requests, in milliseconds.
    #[serde(default = "default_token_timeout_ms")]
    pub token_timeout_ms: u64,

    /// Timeout for outbound activity delivery, in milliseconds.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Notice sent to the user when a turn fails.
    #[serde(default)]
    pub error_notice: Option<String>,

    /// Public URL of `/api/messages`, used by `parley probe`. Overridden by BotEndpoint env.
    #[serde(default)]
    pub bot_endpoint: Option<String>,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_token_timeout_ms() -> u64 {
    10_000
}

fn default_delivery_timeout_ms() -> u64 {
    15_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            token_timeout_ms: default_token_timeout_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            error_notice: None,
            bot_endpoint: None,
        }
    }
}

/// How the app authenticates against the login authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppType {
    /// Token from the shared botframework.com tenant.
    #[default]
    MultiTenant,
    /// Token from the app's own tenant (`MicrosoftAppTenantId` required).
    SingleTenant,
    /// Managed identity; not supported by this gateway.
    UserAssignedMSI,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::MultiTenant => "MultiTenant",
            AppType::SingleTenant => "SingleTenant",
            AppType::UserAssignedMSI => "UserAssignedMSI",
        }
    }

    /// Parse case-insensitively; unknown values are None.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multitenant" => Some(AppType::MultiTenant),
            "singletenant" => Some(AppType::SingleTenant),
            "userassignedmsi" => Some(AppType::UserAssignedMSI),
            _ => None,
        }
    }
}

/// Bot identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Overridden by MicrosoftAppId env.
    pub app_id: Option<String>,
    /// Overridden by MicrosoftAppPassword env.
    pub app_password: Option<String>,
    /// Overridden by MicrosoftAppType env.
    #[serde(default)]
    pub app_type: AppType,
    /// Only for SingleTenant. Overridden by MicrosoftAppTenantId env.
    pub tenant_id: Option<String>,
}

/// Whether the outbound authority follows each activity's service URL or is pinned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteSelection {
    /// Compare the activity's service URL host with the regional hosts on every turn.
    #[default]
    PerRequest,
    /// Always use the global authority/scope.
    Global,
    /// Always use the regional authority/scope.
    Regional,
}

/// Connector endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Regional channel service base URL (e.g. https://europe.api.botframework.com). Overridden by ChannelService env.
    pub channel_service: Option<String>,
    /// OpenID metadata used to verify inbound tokens. Overridden by BotOpenIdMetadata env.
    pub open_id_metadata: Option<String>,
    /// Global login authority. Overridden by ToChannelFromBotLoginUrl env.
    pub login_url: Option<String>,
    /// Global OAuth scope. Overridden by ToChannelFromBotOAuthScope env.
    pub oauth_scope: Option<String>,
    /// Login authority for regional service URLs (defaults to the global one).
    pub regional_login_url: Option<String>,
    /// OAuth scope for regional service URLs (defaults to the global one).
    pub regional_oauth_scope: Option<String>,
    /// Service URL hosts treated as regional. The channel service host is always included.
    #[serde(default)]
    pub regional_hosts: Vec<String>,
    #[serde(default)]
    pub route_selection: RouteSelection,
    /// Accepted `iss` values for inbound tokens (default https://api.botframework.com).
    #[serde(default)]
    pub valid_issuers: Vec<String>,
}

/// Direct Line settings for the test client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectLineConfig {
    /// Overridden by DIRECT_LINE_BASE env.
    pub base_url: Option<String>,
    /// Overridden by DIRECT_LINE_SECRET env.
    pub secret: Option<String>,
    /// Request timeout in milliseconds (default 30000).
    pub timeout_ms: Option<u64>,
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".parley").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("parley.json"))
        })
}

/// Load config from the default path (or PARLEY_CONFIG_PATH), then apply environment overrides.
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok((config, path))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Apply Bot Framework environment names on top of the file config. `lookup` returns the raw
/// value of a variable; empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| non_empty(lookup(key));

    if let Some(v) = get("MicrosoftAppId") {
        config.bot.app_id = Some(v);
    }
    if let Some(v) = get("MicrosoftAppPassword") {
        config.bot.app_password = Some(v);
    }
    if let Some(v) = get("MicrosoftAppType") {
        config.bot.app_type = AppType::parse(&v)
            .with_context(|| format!("unknown MicrosoftAppType: {}", v))?;
    }
    if let Some(v) = get("MicrosoftAppTenantId") {
        config.bot.tenant_id = Some(v);
    }
    if let Some(v) = get("ChannelService") {
        config.channel.channel_service = Some(v);
    }
    if let Some(v) = get("BotOpenIdMetadata") {
        config.channel.open_id_metadata = Some(v);
    }
    if let Some(v) = get("ToChannelFromBotLoginUrl") {
        config.channel.login_url = Some(v);
    }
    if let Some(v) = get("ToChannelFromBotOAuthScope") {
        config.channel.oauth_scope = Some(v);
    }
    if let Some(v) = get("PORT") {
        config.gateway.port = v
            .parse()
            .with_context(|| format!("invalid PORT: {}", v))?;
    }
    if let Some(v) = get("BotEndpoint") {
        config.gateway.bot_endpoint = Some(v);
    }
    if let Some(v) = get("DIRECT_LINE_BASE") {
        config.direct_line.base_url = Some(v);
    }
    if let Some(v) = get("DIRECT_LINE_SECRET") {
        config.direct_line.secret = Some(v);
    }
    Ok(())
}

/// Authority and scope used for a client-credentials token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAuthority {
    pub login_url: String,
    pub scope: String,
}

/// Immutable, validated settings shared by every gateway component.
#[derive(Debug, Clone)]
pub struct BotSettings {
    app_id: String,
    app_password: String,
    app_type: AppType,
    tenant_id: Option<String>,
    channel_service: Option<String>,
    open_id_metadata: String,
    global: TokenAuthority,
    regional: TokenAuthority,
    regional_hosts: Vec<String>,
    route_selection: RouteSelection,
    valid_issuers: Vec<String>,
    token_timeout_ms: u64,
    delivery_timeout_ms: u64,
    error_notice: Option<String>,
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

impl BotSettings {
    /// Validate `config` and build the settings. Missing credentials are reported here, at
    /// startup, instead of on the first authenticated call.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let app_id = non_empty(config.bot.app_id.clone()).ok_or_else(|| {
            GatewayError::Configuration("MicrosoftAppId is not set".to_string())
        })?;
        let app_password = non_empty(config.bot.app_password.clone()).ok_or_else(|| {
            GatewayError::Configuration("MicrosoftAppPassword is not set".to_string())
        })?;
        let tenant_id = non_empty(config.bot.tenant_id.clone());
        let app_type = config.bot.app_type;

        let default_login_url = match app_type {
            AppType::MultiTenant => GLOBAL_LOGIN_URL.to_string(),
            AppType::SingleTenant => {
                let tenant = tenant_id.as_deref().ok_or_else(|| {
                    GatewayError::Configuration(
                        "SingleTenant app requires MicrosoftAppTenantId".to_string(),
                    )
                })?;
                format!("{}/{}", LOGIN_HOST, tenant)
            }
            AppType::UserAssignedMSI => {
                return Err(GatewayError::Configuration(
                    "UserAssignedMSI app type is not supported".to_string(),
                ))
            }
        };

        let channel = &config.channel;
        let global = TokenAuthority {
            login_url: non_empty(channel.login_url.clone())
                .unwrap_or(default_login_url)
                .trim_end_matches('/')
                .to_string(),
            scope: non_empty(channel.oauth_scope.clone())
                .unwrap_or_else(|| GLOBAL_OAUTH_SCOPE.to_string()),
        };
        let regional = TokenAuthority {
            login_url: non_empty(channel.regional_login_url.clone())
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| global.login_url.clone()),
            scope: non_empty(channel.regional_oauth_scope.clone())
                .unwrap_or_else(|| global.scope.clone()),
        };

        let channel_service = non_empty(channel.channel_service.clone());
        let mut regional_hosts: Vec<String> = channel
            .regional_hosts
            .iter()
            .map(|h| h.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if let Some(host) = channel_service.as_deref().and_then(host_of) {
            if !regional_hosts.contains(&host) {
                regional_hosts.push(host);
            }
        }

        let valid_issuers = if channel.valid_issuers.is_empty() {
            vec![BOT_FRAMEWORK_ISSUER.to_string()]
        } else {
            channel.valid_issuers.clone()
        };

        Ok(Self {
            app_id,
            app_password,
            app_type,
            tenant_id,
            channel_service,
            open_id_metadata: non_empty(channel.open_id_metadata.clone())
                .unwrap_or_else(|| GLOBAL_OPENID_METADATA.to_string()),
            global,
            regional,
            regional_hosts,
            route_selection: channel.route_selection,
            valid_issuers,
            token_timeout_ms: config.gateway.token_timeout_ms.max(1),
            delivery_timeout_ms: config.gateway.delivery_timeout_ms.max(1),
            error_notice: non_empty(config.gateway.error_notice.clone()),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn app_password(&self) -> &str {
        &self.app_password
    }

    pub fn app_type(&self) -> AppType {
        self.app_type
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Regional channel service base URL, when configured.
    pub fn channel_service(&self) -> Option<&str> {
        self.channel_service.as_deref()
    }

    pub fn open_id_metadata(&self) -> &str {
        &self.open_id_metadata
    }

    /// Global login authority (ToChannelFromBotLoginUrl).
    pub fn login_url(&self) -> &str {
        &self.global.login_url
    }

    /// Global OAuth scope (ToChannelFromBotOAuthScope).
    pub fn oauth_scope(&self) -> &str {
        &self.global.scope
    }

    pub fn global_authority(&self) -> &TokenAuthority {
        &self.global
    }

    pub fn regional_authority(&self) -> &TokenAuthority {
        &self.regional
    }

    pub fn regional_hosts(&self) -> &[String] {
        &self.regional_hosts
    }

    pub fn route_selection(&self) -> RouteSelection {
        self.route_selection
    }

    pub fn valid_issuers(&self) -> &[String] {
        &self.valid_issuers
    }

    pub fn token_timeout_ms(&self) -> u64 {
        self.token_timeout_ms
    }

    pub fn delivery_timeout_ms(&self) -> u64 {
        self.delivery_timeout_ms
    }

    pub fn error_notice(&self) -> Option<&str> {
        self.error_notice.as_deref()
    }

    /// Secret length for diagnostics; the secret itself is never logged.
    pub fn secret_len(&self) -> usize {
        self.app_password.len()
    }
}

/// Resolve the Direct Line base URL (trailing slashes removed).
pub fn resolve_direct_line_base(config: &Config) -> String {
    non_empty(config.direct_line.base_url.clone())
        .unwrap_or_else(|| DEFAULT_DIRECT_LINE_BASE.to_string())
        .trim_end_matches('/')
        .to_string()
}
