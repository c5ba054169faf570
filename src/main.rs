//! xui-admin: Telegram-бот для управления клиентами панели x-ui.

mod aggregate;
mod bot;
mod clock;
mod config;
mod conversation;
mod panel;
mod provision;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::Dispatcher;
use teloxide::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/xui-admin.toml"));
    tracing::info!("Starting xui-admin with config {}", config_path.display());

    let config = Arc::new(config::Config::load(&config_path)?);
    let token = config.bot_token()?;
    tracing::info!(
        admin_count = config.admin_ids.len(),
        store_path = %config.store_path.display(),
        panel_url = %config.panel.base_url,
        inbounds_path = %config.panel.inbounds_path,
        sub_url_prefix = ?config.panel.sub_url_prefix,
        idle_ttl_secs = config.conversation.idle_ttl_secs,
        max_trusted_accounts = config.trusted.max_accounts,
        "Configuration loaded"
    );

    let clock: Arc<dyn clock::Clock> = Arc::new(clock::SystemClock);
    let panel_client = Arc::new(panel::PanelClient::new(&config.panel)?);
    if let Err(error) = panel_client.ensure_session().await {
        tracing::warn!(error = %error, "Panel login failed, will retry on first request");
    }
    let panel: Arc<dyn panel::PanelApi> = panel_client;
    let provisioner = Arc::new(provision::Provisioner::new(panel, clock.clone()));

    let conversations = Arc::new(conversation::ConversationStore::new(
        config.conversation.idle_ttl(),
        clock,
    ));
    conversations
        .clone()
        .spawn_sweeper(config.conversation.sweep_interval());

    let store = Arc::new(
        store::TrustStore::open(&config.store_path, config.trusted.max_accounts).await?,
    );

    let bot = Bot::new(token);
    let state = bot::handlers::BotState {
        config,
        provisioner,
        conversations,
        store,
    };
    tracing::info!("Dispatcher initialized, bot is ready");

    Dispatcher::builder(bot, bot::handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
