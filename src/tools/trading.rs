//! Trading and configuration tools
//!
//! The operational surface the model works through: account and position
//! reads, trader lifecycle control, order actions, and configuration
//! listings. Exchange and model listings never include credentials.

use crate::catalog::CoinCatalog;
use crate::error::AssistantError;
use crate::manager::TraderManager;
use crate::models::PositionSide;
use crate::store::ConfigStore;
use crate::tools::{decode_args, FnTool, ToolRegistry};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

fn default_leverage() -> u32 {
    10
}

#[derive(Deserialize)]
struct TraderArgs {
    trader_id: String,
}

#[derive(Deserialize)]
struct PriceArgs {
    #[serde(default)]
    trader_id: Option<String>,
    symbol: String,
}

#[derive(Deserialize)]
struct OrderArgs {
    trader_id: String,
    symbol: String,
    quantity: f64,
    #[serde(default = "default_leverage")]
    leverage: u32,
}

#[derive(Deserialize)]
struct CloseArgs {
    trader_id: String,
    symbol: String,
    side: PositionSide,
    #[serde(default)]
    quantity: Option<f64>,
}

#[derive(Deserialize)]
struct CoinArgs {
    #[serde(default)]
    limit: Option<usize>,
}

async fn resolve_trader(
    manager: &Arc<dyn TraderManager>,
    trader_id: &str,
) -> Result<Arc<dyn crate::manager::Trader>> {
    manager
        .get(trader_id)
        .await
        .ok_or_else(|| AssistantError::NotFound(format!("trader not found: {}", trader_id)))
}

/// Registers the full trading tool set against the given collaborators.
pub fn register_trading_tools(
    registry: &mut ToolRegistry,
    manager: Arc<dyn TraderManager>,
    store: Arc<dyn ConfigStore>,
    catalog: Arc<CoinCatalog>,
) {
    register_account_tools(registry, manager.clone());
    register_lifecycle_tools(registry, manager.clone(), store.clone());
    register_order_tools(registry, manager);
    register_config_tools(registry, store);
    register_coin_tools(registry, catalog);
}

// =============================================================================
// Account & position reads
// =============================================================================

fn register_account_tools(registry: &mut ToolRegistry, manager: Arc<dyn TraderManager>) {
    let m = manager.clone();
    registry.register(Arc::new(FnTool::new(
        "get_balance",
        "Get account balance and equity for every active trader",
        json!({"type": "object", "properties": {}}),
        move |_cancel, _args| {
            let manager = m.clone();
            async move {
                let mut accounts = Vec::new();
                let mut total_equity = 0.0;
                let mut available_balance = 0.0;
                for trader in manager.active_traders().await {
                    let account = trader.account_info().await?;
                    total_equity += account.total_equity;
                    available_balance += account.available_balance;
                    accounts.push(json!({
                        "trader_id": trader.id(),
                        "trader_name": trader.name(),
                        "exchange": trader.exchange(),
                        "total_equity": account.total_equity,
                        "available_balance": account.available_balance,
                    }));
                }
                Ok(json!({
                    "total_equity": total_equity,
                    "available_balance": available_balance,
                    "accounts": accounts,
                }))
            }
        },
    )));

    let m = manager;
    registry.register(Arc::new(FnTool::new(
        "get_positions",
        "List open positions across all active traders",
        json!({"type": "object", "properties": {}}),
        move |_cancel, _args| {
            let manager = m.clone();
            async move {
                let mut positions = Vec::new();
                for trader in manager.active_traders().await {
                    for pos in trader.positions().await? {
                        positions.push(json!({
                            "trader_id": trader.id(),
                            "trader_name": trader.name(),
                            "symbol": pos.symbol,
                            "side": pos.side,
                            "size": pos.size,
                            "entry_price": pos.entry_price,
                            "mark_price": pos.mark_price,
                            "unrealized_pnl": pos.unrealized_pnl,
                            "leverage": pos.leverage,
                            "liquidation_price": pos.liquidation_price,
                        }));
                    }
                }
                Ok(json!({ "count": positions.len(), "positions": positions }))
            }
        },
    )));
}

// =============================================================================
// Trader lifecycle
// =============================================================================

fn register_lifecycle_tools(
    registry: &mut ToolRegistry,
    manager: Arc<dyn TraderManager>,
    store: Arc<dyn ConfigStore>,
) {
    let s = store.clone();
    registry.register(Arc::new(FnTool::new(
        "list_traders",
        "List all configured traders with their running state",
        json!({"type": "object", "properties": {}}),
        move |_cancel, _args| {
            let store = s.clone();
            async move {
                let traders: Vec<Value> = store
                    .list_traders()
                    .await?
                    .into_iter()
                    .map(|t| {
                        json!({
                            "id": t.id,
                            "name": t.name,
                            "is_running": t.is_running,
                            "exchange_id": t.exchange_id,
                            "strategy_id": t.strategy_id,
                            "ai_model_id": t.ai_model_id,
                        })
                    })
                    .collect();
                Ok(json!({ "count": traders.len(), "traders": traders }))
            }
        },
    )));

    let m = manager.clone();
    let s = store.clone();
    registry.register(Arc::new(FnTool::new(
        "get_trader_status",
        "Get the configuration and live status of a single trader",
        json!({
            "type": "object",
            "properties": {"trader_id": {"type": "string"}},
            "required": ["trader_id"]
        }),
        move |_cancel, args| {
            let manager = m.clone();
            let store = s.clone();
            async move {
                let args: TraderArgs = decode_args("get_trader_status", args)?;
                let record = store
                    .get_trader(&args.trader_id)
                    .await?
                    .ok_or_else(|| {
                        AssistantError::NotFound(format!("trader not found: {}", args.trader_id))
                    })?;

                let mut status = json!({
                    "id": record.id,
                    "name": record.name,
                    "is_running": record.is_running,
                    "exchange_id": record.exchange_id,
                    "strategy_id": record.strategy_id,
                });

                if let Some(trader) = manager.get(&args.trader_id).await {
                    if let Ok(account) = trader.account_info().await {
                        status["total_equity"] = json!(account.total_equity);
                        status["available_balance"] = json!(account.available_balance);
                    }
                    if let Ok(positions) = trader.positions().await {
                        status["position_count"] = json!(positions.len());
                    }
                }
                Ok(status)
            }
        },
    )));

    let m = manager.clone();
    let s = store.clone();
    registry.register(Arc::new(FnTool::new(
        "start_trader",
        "Start a stopped trader",
        json!({
            "type": "object",
            "properties": {"trader_id": {"type": "string"}},
            "required": ["trader_id"]
        }),
        move |_cancel, args| {
            let manager = m.clone();
            let store = s.clone();
            async move {
                let args: TraderArgs = decode_args("start_trader", args)?;
                manager.start(&args.trader_id).await?;
                // Live state changed; a failed record update is logged, not fatal
                if let Err(e) = store.set_trader_running(&args.trader_id, true).await {
                    warn!(trader_id = %args.trader_id, error = %e, "Failed to persist trader status");
                }
                Ok(json!({ "trader_id": args.trader_id, "is_running": true }))
            }
        },
    )));

    let m = manager;
    let s = store;
    registry.register(Arc::new(FnTool::new(
        "stop_trader",
        "Stop a running trader",
        json!({
            "type": "object",
            "properties": {"trader_id": {"type": "string"}},
            "required": ["trader_id"]
        }),
        move |_cancel, args| {
            let manager = m.clone();
            let store = s.clone();
            async move {
                let args: TraderArgs = decode_args("stop_trader", args)?;
                manager.stop(&args.trader_id).await?;
                if let Err(e) = store.set_trader_running(&args.trader_id, false).await {
                    warn!(trader_id = %args.trader_id, error = %e, "Failed to persist trader status");
                }
                Ok(json!({ "trader_id": args.trader_id, "is_running": false }))
            }
        },
    )));
}

// =============================================================================
// Order actions
// =============================================================================

fn register_order_tools(registry: &mut ToolRegistry, manager: Arc<dyn TraderManager>) {
    let m = manager.clone();
    registry.register(Arc::new(FnTool::new(
        "get_market_price",
        "Get the current market price for a symbol, via a specific trader or any active one",
        json!({
            "type": "object",
            "properties": {
                "trader_id": {"type": "string"},
                "symbol": {"type": "string"}
            },
            "required": ["symbol"]
        }),
        move |_cancel, args| {
            let manager = m.clone();
            async move {
                let args: PriceArgs = decode_args("get_market_price", args)?;
                let trader = match &args.trader_id {
                    Some(id) => resolve_trader(&manager, id).await?,
                    None => manager
                        .active_traders()
                        .await
                        .into_iter()
                        .next()
                        .ok_or_else(|| {
                            AssistantError::Backend("no active trader available".to_string())
                        })?,
                };
                let price = trader.market_price(&args.symbol).await?;
                Ok(json!({ "symbol": args.symbol, "price": price }))
            }
        },
    )));

    let m = manager.clone();
    registry.register(Arc::new(FnTool::new(
        "open_long",
        "Open a long position with the given USD size and leverage",
        order_schema(),
        move |_cancel, args| {
            let manager = m.clone();
            async move {
                let args: OrderArgs = decode_args("open_long", args)?;
                validate_order(&args)?;
                let trader = resolve_trader(&manager, &args.trader_id).await?;
                trader
                    .open_long(&args.symbol, args.quantity, args.leverage)
                    .await
            }
        },
    )));

    let m = manager.clone();
    registry.register(Arc::new(FnTool::new(
        "open_short",
        "Open a short position with the given USD size and leverage",
        order_schema(),
        move |_cancel, args| {
            let manager = m.clone();
            async move {
                let args: OrderArgs = decode_args("open_short", args)?;
                validate_order(&args)?;
                let trader = resolve_trader(&manager, &args.trader_id).await?;
                trader
                    .open_short(&args.symbol, args.quantity, args.leverage)
                    .await
            }
        },
    )));

    let m = manager;
    registry.register(Arc::new(FnTool::new(
        "close_position",
        "Close an open position, fully or partially",
        json!({
            "type": "object",
            "properties": {
                "trader_id": {"type": "string"},
                "symbol": {"type": "string"},
                "side": {"type": "string", "enum": ["long", "short"]},
                "quantity": {"type": "number"}
            },
            "required": ["trader_id", "symbol", "side"]
        }),
        move |_cancel, args| {
            let manager = m.clone();
            async move {
                let args: CloseArgs = decode_args("close_position", args)?;
                if let Some(q) = args.quantity {
                    if q <= 0.0 {
                        return Err(AssistantError::InvalidArguments(
                            "close_position: quantity must be positive".to_string(),
                        ));
                    }
                }
                let trader = resolve_trader(&manager, &args.trader_id).await?;
                trader
                    .close_position(&args.symbol, args.side, args.quantity)
                    .await
            }
        },
    )));
}

fn order_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "trader_id": {"type": "string"},
            "symbol": {"type": "string"},
            "quantity": {"type": "number", "description": "order size in USD"},
            "leverage": {"type": "integer", "default": 10}
        },
        "required": ["trader_id", "symbol", "quantity"]
    })
}

fn validate_order(args: &OrderArgs) -> Result<()> {
    if args.quantity <= 0.0 {
        return Err(AssistantError::InvalidArguments(
            "quantity must be positive".to_string(),
        ));
    }
    if args.leverage == 0 || args.leverage > 50 {
        return Err(AssistantError::InvalidArguments(
            "leverage must be between 1 and 50".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Configuration listings
// =============================================================================

fn register_config_tools(registry: &mut ToolRegistry, store: Arc<dyn ConfigStore>) {
    let s = store.clone();
    registry.register(Arc::new(FnTool::new(
        "list_strategies",
        "List configured trading strategies",
        json!({"type": "object", "properties": {}}),
        move |_cancel, _args| {
            let store = s.clone();
            async move {
                let strategies: Vec<Value> = store
                    .list_strategies()
                    .await?
                    .into_iter()
                    .map(|st| {
                        json!({
                            "id": st.id,
                            "name": st.name,
                            "description": st.description,
                            "is_active": st.is_active,
                        })
                    })
                    .collect();
                Ok(json!({ "count": strategies.len(), "strategies": strategies }))
            }
        },
    )));

    let s = store.clone();
    registry.register(Arc::new(FnTool::new(
        "list_exchanges",
        "List configured exchange accounts (credentials are never included)",
        json!({"type": "object", "properties": {}}),
        move |_cancel, _args| {
            let store = s.clone();
            async move {
                let exchanges: Vec<Value> = store
                    .list_exchanges()
                    .await?
                    .into_iter()
                    .map(|ex| {
                        json!({
                            "id": ex.id,
                            "name": ex.name,
                            "exchange_type": ex.exchange_type,
                            "enabled": ex.enabled,
                            "api_key_configured": !ex.api_key.is_empty(),
                        })
                    })
                    .collect();
                Ok(json!({ "count": exchanges.len(), "exchanges": exchanges }))
            }
        },
    )));

    let s = store;
    registry.register(Arc::new(FnTool::new(
        "list_ai_models",
        "List configured AI models (credentials are never included)",
        json!({"type": "object", "properties": {}}),
        move |_cancel, _args| {
            let store = s.clone();
            async move {
                let models: Vec<Value> = store
                    .list_models()
                    .await?
                    .into_iter()
                    .map(|m| {
                        json!({
                            "id": m.id,
                            "name": m.name,
                            "provider": m.provider,
                            "enabled": m.enabled,
                            "api_key_configured": !m.api_key.is_empty(),
                        })
                    })
                    .collect();
                Ok(json!({ "count": models.len(), "models": models }))
            }
        },
    )));
}

// =============================================================================
// Coin catalog
// =============================================================================

fn register_coin_tools(registry: &mut ToolRegistry, catalog: Arc<CoinCatalog>) {
    registry.register(Arc::new(FnTool::new(
        "list_coins",
        "List tradeable coins ordered by 24h volume",
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "description": "max coins to return"}
            }
        }),
        move |_cancel, args| {
            let catalog = catalog.clone();
            async move {
                let args: CoinArgs = decode_args("list_coins", args)?;
                let coins = match args.limit {
                    Some(limit) => catalog.main_coins(limit).await?,
                    None => catalog.all_coins().await?,
                };
                Ok(json!({ "count": coins.len(), "coins": coins }))
            }
        },
    )));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{AccountInfo, MockTrader, MockTraderManager};
    use crate::store::{ExchangeRecord, InMemoryConfigStore, ModelRecord, TraderRecord};
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    async fn registry_with_mocks() -> (ToolRegistry, Arc<MockTraderManager>, Arc<InMemoryConfigStore>)
    {
        let manager = Arc::new(MockTraderManager::new());
        let store = Arc::new(InMemoryConfigStore::new());
        let catalog = Arc::new(CoinCatalog::offline(vec![]));

        let mut registry = ToolRegistry::new();
        register_trading_tools(
            &mut registry,
            manager.clone() as Arc<dyn TraderManager>,
            store.clone() as Arc<dyn ConfigStore>,
            catalog,
        );
        (registry, manager, store)
    }

    async fn call(registry: &ToolRegistry, name: &str, args: Value) -> Result<Value> {
        let cancel = CancellationToken::new();
        registry
            .get(name)
            .unwrap_or_else(|| panic!("tool not registered: {}", name))
            .execute(&cancel, args)
            .await
    }

    #[tokio::test]
    async fn test_full_tool_set_registered() {
        let (registry, _, _) = registry_with_mocks().await;
        let expected = [
            "get_balance",
            "get_positions",
            "list_traders",
            "get_trader_status",
            "start_trader",
            "stop_trader",
            "get_market_price",
            "open_long",
            "open_short",
            "close_position",
            "list_strategies",
            "list_exchanges",
            "list_ai_models",
            "list_coins",
        ];
        for name in expected {
            assert!(registry.get(name).is_some(), "missing tool {}", name);
        }
        assert_eq!(registry.len(), expected.len());
    }

    #[tokio::test]
    async fn test_get_balance_aggregates_traders() {
        let (registry, manager, _) = registry_with_mocks().await;
        let t1 = Arc::new(MockTrader::new("t1", "Alpha", "binance"));
        t1.set_account(AccountInfo {
            total_equity: 700.0,
            available_balance: 300.0,
        })
        .await;
        manager.add_trader(t1).await;

        let out = call(&registry, "get_balance", json!({})).await.unwrap();
        assert_eq!(out["total_equity"], 700.0);
        assert_eq!(out["accounts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_order_argument_validation() {
        let (registry, manager, _) = registry_with_mocks().await;
        manager
            .add_trader(Arc::new(MockTrader::new("t1", "Alpha", "binance")))
            .await;

        let err = call(
            &registry,
            "open_long",
            json!({"trader_id": "t1", "symbol": "BTCUSDT", "quantity": -5.0}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("positive"));

        let err = call(
            &registry,
            "open_long",
            json!({"trader_id": "t1", "symbol": "BTCUSDT", "quantity": 100.0, "leverage": 200}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("leverage"));

        // Missing required field surfaces as invalid arguments
        let err = call(&registry, "open_long", json!({"trader_id": "t1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_open_long_defaults_leverage() {
        let (registry, manager, _) = registry_with_mocks().await;
        manager
            .add_trader(Arc::new(MockTrader::new("t1", "Alpha", "binance")))
            .await;

        let out = call(
            &registry,
            "open_long",
            json!({"trader_id": "t1", "symbol": "BTCUSDT", "quantity": 100.0}),
        )
        .await
        .unwrap();
        assert_eq!(out["leverage"], 10);
        assert_eq!(out["status"], "filled");
    }

    #[tokio::test]
    async fn test_start_trader_updates_manager_and_store() {
        let (registry, manager, store) = registry_with_mocks().await;
        manager
            .add_trader(Arc::new(MockTrader::new("t1", "Alpha", "binance")))
            .await;
        manager.stop("t1").await.unwrap();
        store
            .insert_trader(TraderRecord {
                id: "t1".to_string(),
                name: "Alpha".to_string(),
                is_running: false,
                exchange_id: "ex1".to_string(),
                strategy_id: "st1".to_string(),
                ai_model_id: "m1".to_string(),
                created_at: Utc::now(),
            })
            .await;

        call(&registry, "start_trader", json!({"trader_id": "t1"}))
            .await
            .unwrap();
        assert_eq!(manager.active_traders().await.len(), 1);
        assert!(store.get_trader("t1").await.unwrap().unwrap().is_running);
    }

    #[tokio::test]
    async fn test_start_trader_survives_store_failure() {
        // No record in the store: live start succeeds, record update is logged
        let (registry, manager, _) = registry_with_mocks().await;
        manager
            .add_trader(Arc::new(MockTrader::new("t1", "Alpha", "binance")))
            .await;
        manager.stop("t1").await.unwrap();

        let out = call(&registry, "start_trader", json!({"trader_id": "t1"}))
            .await
            .unwrap();
        assert_eq!(out["is_running"], true);
    }

    #[tokio::test]
    async fn test_exchange_listing_never_leaks_credentials() {
        let (registry, _, store) = registry_with_mocks().await;
        store
            .insert_exchange(ExchangeRecord {
                id: "ex1".to_string(),
                name: "Binance Main".to_string(),
                exchange_type: "binance".to_string(),
                enabled: true,
                api_key: "super-secret-key".to_string(),
            })
            .await;
        store
            .insert_model(ModelRecord {
                id: "m1".to_string(),
                name: "deepseek-chat".to_string(),
                provider: "deepseek".to_string(),
                enabled: true,
                api_key: "sk-secret".to_string(),
            })
            .await;

        let exchanges = call(&registry, "list_exchanges", json!({})).await.unwrap();
        assert!(!exchanges.to_string().contains("super-secret-key"));
        assert_eq!(exchanges["exchanges"][0]["api_key_configured"], true);

        let models = call(&registry, "list_ai_models", json!({})).await.unwrap();
        assert!(!models.to_string().contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_market_price_falls_back_to_any_active_trader() {
        let (registry, manager, _) = registry_with_mocks().await;
        let t1 = Arc::new(MockTrader::new("t1", "Alpha", "binance"));
        t1.set_price("BTCUSDT", 65000.0).await;
        manager.add_trader(t1).await;

        let out = call(&registry, "get_market_price", json!({"symbol": "BTCUSDT"}))
            .await
            .unwrap();
        assert_eq!(out["price"], 65000.0);
    }
}
