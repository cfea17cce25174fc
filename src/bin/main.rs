use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use trading_assistant::{
    agent::{Agent, AgentConfig},
    ai::MockAiClient,
    catalog::{CoinCatalog, CoinInfo},
    context::ContextBuilder,
    manager::{AccountInfo, MockTrader, MockTraderManager, Position, TraderManager},
    models::PositionSide,
    prompts,
    store::{ConfigStore, InMemoryConfigStore, StrategyRecord, TraderRecord},
    tools::trading::register_trading_tools,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Trading Assistant starting (console demo)");

    // Seed a mock trading backend
    let manager = Arc::new(MockTraderManager::new());
    let trader = Arc::new(MockTrader::new("t1", "Alpha", "binance"));
    trader
        .set_account(AccountInfo {
            total_equity: 10_000.0,
            available_balance: 6_500.0,
        })
        .await;
    trader
        .set_positions(vec![Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            size: 0.1,
            entry_price: 60_000.0,
            mark_price: 61_500.0,
            unrealized_pnl: 150.0,
            leverage: 5,
            liquidation_price: Some(52_000.0),
        }])
        .await;
    trader.set_price("BTCUSDT", 61_500.0).await;
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
    store
        .insert_strategy(StrategyRecord {
            id: "st-momentum".to_string(),
            name: "Momentum".to_string(),
            description: "Trend-following perp strategy".to_string(),
            is_active: true,
        })
        .await;

    let catalog = Arc::new(CoinCatalog::offline(vec![CoinInfo {
        symbol: "BTC".to_string(),
        max_leverage: 40,
        volume_24h: 5_000_000_000.0,
        mark_price: 61_500.0,
    }]));

    // Script a model that inspects positions, then answers
    let ai = MockAiClient::scripted(vec![
        r#"{"tool_calls": [{"name": "get_positions", "arguments": {}}]}"#.to_string(),
        "You hold one BTCUSDT long, 0.1 BTC at 5x, currently up $150.".to_string(),
    ]);

    let context = Arc::new(ContextBuilder::new(manager.clone() as Arc<dyn TraderManager>));
    let agent = Agent::new(
        Arc::new(ai),
        prompts::context_aware_system_prompt(),
        AgentConfig::default(),
    )
    .with_context(context);

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

    // Run one chat turn
    let cancel = CancellationToken::new();
    match agent.chat(&cancel, "demo", "How are my positions doing?").await {
        Ok(response) => {
            println!("\n=== ASSISTANT ===");
            println!("{}", response.text);
            Ok(())
        }
        Err(e) => {
            eprintln!("Chat turn failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
