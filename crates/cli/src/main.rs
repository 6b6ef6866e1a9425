use anyhow::Context;
use clap::{Parser, Subcommand};
use lib::activity::{Activity, ChannelAccount};
use lib::auth::CredentialCache;
use lib::config::{self, BotSettings, Config};
use lib::directline::{DirectLineClient, DirectLineError};
use lib::echo::EchoHandler;
use lib::error::GatewayError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley channel gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway: POST /api/messages for the channel connector, plus health endpoints.
    Gateway {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from PORT, config, or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print an app access token for the global connector route.
    Token {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Send an authenticated message activity straight to a bot endpoint.
    Probe {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Bot messaging endpoint (default from BotEndpoint or gateway.botEndpoint)
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Message text
        #[arg(long, default_value = "hello")]
        text: String,
    },

    /// Round trip through Direct Line: open a conversation, send a message, print bot replies.
    Directline {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Message text
        #[arg(long, default_value = "hello")]
        text: String,

        /// User id the Direct Line token is bound to
        #[arg(long, default_value = "user1")]
        user: String,

        /// Polls before giving up on a bot reply
        #[arg(long, default_value_t = 10)]
        attempts: u32,

        /// Milliseconds between polls
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Gateway { config, port }) => run_gateway(config, port).await,
        Some(Commands::Token { config }) => run_token(config).await,
        Some(Commands::Probe {
            config,
            endpoint,
            text,
        }) => run_probe(config, endpoint, text).await,
        Some(Commands::Directline {
            config,
            text,
            user,
            attempts,
            interval_ms,
        }) => run_directline(config, text, user, attempts, interval_ms).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }
}

/// Print an error with the remote status and body when there is one.
fn report(e: &anyhow::Error) {
    if let Some(DirectLineError::Status { status, body }) = e.downcast_ref::<DirectLineError>() {
        eprintln!("HTTP {} {}", status, body);
    } else if let Some(GatewayError::ChannelDelivery { status, body }) =
        e.downcast_ref::<GatewayError>()
    {
        eprintln!("HTTP {} {}", status, body);
    }
    eprintln!("error: {:#}", e);
}

fn load(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let (config, path) = config::load_config(config_path)?;
    log::debug!("config loaded from {}", path.display());
    Ok(config)
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = load(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    lib::gateway::run_gateway(config, Arc::new(EchoHandler)).await
}

/// Token for the global route, straight from the token endpoint.
async fn app_token(config: &Config) -> anyhow::Result<String> {
    let settings = BotSettings::from_config(config)?;
    let authority = settings.global_authority();
    let cache = CredentialCache::new(
        settings.app_id(),
        settings.app_password(),
        settings.token_timeout_ms(),
    )?;
    let token = cache
        .get_token(&authority.login_url, &authority.scope)
        .await
        .with_context(|| format!("requesting token from {}", authority.login_url))?;
    Ok(token)
}

async fn run_token(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let token = app_token(&config).await?;
    eprintln!("access token acquired");
    println!("{}", token);
    Ok(())
}

async fn run_probe(
    config_path: Option<PathBuf>,
    endpoint: Option<String>,
    text: String,
) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let endpoint = endpoint
        .or_else(|| config.gateway.bot_endpoint.clone())
        .context("no bot endpoint: pass --endpoint or set BotEndpoint")?;
    let token = app_token(&config).await?;

    let mut activity = Activity::message(text);
    activity.from = Some(ChannelAccount {
        id: "user1".to_string(),
        name: Some("Parley probe".to_string()),
        role: Some("user".to_string()),
    });
    activity.locale = Some("en-US".to_string());

    println!("sending test message to {} ...", endpoint);
    let res = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.gateway.delivery_timeout_ms.max(1)))
        .build()?
        .post(&endpoint)
        .bearer_auth(&token)
        .json(&activity)
        .send()
        .await
        .with_context(|| format!("posting to {}", endpoint))?;
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    println!("HTTP {}", status.as_u16());
    if !body.is_empty() {
        println!("{}", body);
    }
    if !status.is_success() {
        anyhow::bail!("bot endpoint answered {}", status);
    }
    Ok(())
}

async fn run_directline(
    config_path: Option<PathBuf>,
    text: String,
    user: String,
    attempts: u32,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let secret = config
        .direct_line
        .secret
        .clone()
        .filter(|s| !s.is_empty())
        .context("DIRECT_LINE_SECRET is not set")?;
    let base = config::resolve_direct_line_base(&config);
    let timeout_ms = config
        .direct_line
        .timeout_ms
        .unwrap_or(lib::directline::DEFAULT_TIMEOUT_MS);
    println!("direct line base: {}", base);

    let client = DirectLineClient::new(&base, timeout_ms)?;
    let token = client.generate_token(&secret, &user).await?;
    let token = token.token.unwrap_or_default();
    println!("direct line token ok");

    let mut conversation = client.start_conversation(&token).await?;
    println!("conversation: {}", conversation.conversation_id);

    let mut message = Activity::message(text);
    message.from = Some(ChannelAccount::new(user));
    message.locale = Some("en-US".to_string());
    let id = client.send_activity(&conversation, &message).await?;
    println!(
        "sent activity id: {}",
        if id.is_empty() { "(none)" } else { id.as_str() }
    );

    let replies = client
        .wait_for_bot_reply(
            &mut conversation,
            &id,
            attempts,
            Duration::from_millis(interval_ms),
        )
        .await?;
    if replies.is_empty() {
        anyhow::bail!("no bot reply after {} poll(s)", attempts.max(1));
    }
    for reply in replies {
        println!("bot: {}", reply.text.unwrap_or_default());
    }
    Ok(())
}
