use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use trading_assistant::{
    agent::{Agent, AgentConfig},
    ai::{AiClient, HttpCompletionClient, MockAiClient},
    api::{start_server, ApiState},
    catalog::CoinCatalog,
    context::ContextBuilder,
    manager::{AccountInfo, MockTrader, MockTraderManager, TraderManager},
    monitor::{AlertHandler, Monitor},
    prompts,
    store::{ConfigStore, InMemoryConfigStore, TraderRecord},
    tools::trading::register_trading_tools,
};

const HYPERLIQUID_INFO_URL: &str = "https://api.hyperliquid.xyz/info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_key = std::env::var("AI_API_KEY").unwrap_or_default();
    let base_url =
        std::env::var("AI_BASE_URL").unwrap_or_else(|_| "https://api.deepseek.com/v1".to_string());
    let model = std::env::var("AI_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string());

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Trading Assistant - API Server");
    info!("Port: {}", api_port);

    let ai: Arc<dyn AiClient> = if api_key.is_empty() {
        warn!("AI_API_KEY not set, using the mock completion client");
        Arc::new(MockAiClient::new())
    } else {
        info!(%model, "Using HTTP completion client");
        Arc::new(HttpCompletionClient::new(base_url, api_key, model)?)
    };

    // Mock backend until real exchange connectors are wired in
    let manager = Arc::new(MockTraderManager::new());
    let trader = Arc::new(MockTrader::new("t1", "Alpha", "binance"));
    trader
        .set_account(AccountInfo {
            total_equity: 10_000.0,
            available_balance: 10_000.0,
        })
        .await;
    manager.add_trader(trader).await;

    let store = Arc::new(InMemoryConfigStore::new());
    store
        .insert_trader(TraderRecord {
            id: "t1".to_string(),
            name: "Alpha".to_string(),
            is_running: true,
            exchange_id: "ex-binance".to_string(),
            strategy_id: "st-momentum".to_string(),
            ai_model_id: "m-deepseek".to_string(),
            created_at: Utc::now(),
        })
        .await;

    let catalog = Arc::new(CoinCatalog::new(HYPERLIQUID_INFO_URL)?);

    let context = Arc::new(ContextBuilder::new(manager.clone() as Arc<dyn TraderManager>));

    let agent = Arc::new(
        Agent::new(ai, prompts::context_aware_system_prompt(), AgentConfig::default())
            .with_context(context.clone()),
    );
    agent
        .with_registry(|registry| {
            register_trading_tools(
                registry,
                manager as Arc<dyn TraderManager>,
                store as Arc<dyn ConfigStore>,
                catalog,
            )
        })
        .await;

    // Monitor logs every delivered alert
    let handler: AlertHandler = Arc::new(|alert| {
        info!(level = %alert.level, kind = %alert.kind, "{}", alert.message);
    });
    let monitor = Arc::new(Monitor::new(context));
    monitor.on_alert(handler).await;
    monitor.start().await;

    info!("Assistant initialized, starting API server");

    let state = ApiState { agent, monitor };
    start_server(state, api_port).await?;

    Ok(())
}
