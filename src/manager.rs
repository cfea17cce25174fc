//! Trading backend collaborator contracts
//!
//! The assistant core never talks to an exchange directly; it sees the live
//! backend through these narrow traits. The context synthesizer and monitor
//! read account/position state, the trading tools issue order actions.

use crate::error::AssistantError;
use crate::models::PositionSide;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Account balance figures for one trader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_equity: f64,
    pub available_balance: f64,
}

/// An open position as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidation_price: Option<f64>,
}

/// One live trading worker
#[async_trait::async_trait]
pub trait Trader: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn exchange(&self) -> &str;

    async fn account_info(&self) -> Result<AccountInfo>;
    async fn positions(&self) -> Result<Vec<Position>>;
    async fn market_price(&self, symbol: &str) -> Result<f64>;

    // Order actions execute real trades
    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<Value>;
    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<Value>;
    async fn close_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Option<f64>,
    ) -> Result<Value>;
}

/// Registry of live trading workers
#[async_trait::async_trait]
pub trait TraderManager: Send + Sync {
    /// All currently active (running) traders.
    async fn active_traders(&self) -> Vec<Arc<dyn Trader>>;

    async fn get(&self, trader_id: &str) -> Option<Arc<dyn Trader>>;

    async fn start(&self, trader_id: &str) -> Result<()>;
    async fn stop(&self, trader_id: &str) -> Result<()>;
}

//
// ================= Mock implementations =================
//

/// Mock trader for development & testing.
/// State is settable so tests can script account and position snapshots.
pub struct MockTrader {
    id: String,
    name: String,
    exchange: String,
    account: RwLock<AccountInfo>,
    positions: RwLock<Vec<Position>>,
    prices: RwLock<HashMap<String, f64>>,
    fail_account: RwLock<bool>,
    fail_positions: RwLock<bool>,
}

impl MockTrader {
    pub fn new(id: impl Into<String>, name: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            exchange: exchange.into(),
            account: RwLock::new(AccountInfo::default()),
            positions: RwLock::new(Vec::new()),
            prices: RwLock::new(HashMap::new()),
            fail_account: RwLock::new(false),
            fail_positions: RwLock::new(false),
        }
    }

    pub async fn set_account(&self, account: AccountInfo) {
        *self.account.write().await = account;
    }

    pub async fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.write().await = positions;
    }

    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub async fn fail_account_fetch(&self, fail: bool) {
        *self.fail_account.write().await = fail;
    }

    pub async fn fail_position_fetch(&self, fail: bool) {
        *self.fail_positions.write().await = fail;
    }
}

#[async_trait::async_trait]
impl Trader for MockTrader {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        if *self.fail_account.read().await {
            return Err(AssistantError::Backend("account fetch failed".to_string()));
        }
        Ok(self.account.read().await.clone())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        if *self.fail_positions.read().await {
            return Err(AssistantError::Backend("position fetch failed".to_string()));
        }
        Ok(self.positions.read().await.clone())
    }

    async fn market_price(&self, symbol: &str) -> Result<f64> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| AssistantError::NotFound(format!("no price for {}", symbol)))
    }

    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<Value> {
        Ok(json!({
            "symbol": symbol,
            "side": "long",
            "quantity": quantity,
            "leverage": leverage,
            "status": "filled",
        }))
    }

    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<Value> {
        Ok(json!({
            "symbol": symbol,
            "side": "short",
            "quantity": quantity,
            "leverage": leverage,
            "status": "filled",
        }))
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Option<f64>,
    ) -> Result<Value> {
        Ok(json!({
            "symbol": symbol,
            "side": side.to_string(),
            "quantity": quantity,
            "status": "closed",
        }))
    }
}

/// Mock trader manager holding a settable set of traders.
pub struct MockTraderManager {
    traders: RwLock<HashMap<String, Arc<MockTrader>>>,
    running: RwLock<HashMap<String, bool>>,
}

impl MockTraderManager {
    pub fn new() -> Self {
        Self {
            traders: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_trader(&self, trader: Arc<MockTrader>) {
        let id = trader.id().to_string();
        self.traders.write().await.insert(id.clone(), trader);
        self.running.write().await.insert(id, true);
    }

    pub async fn remove_trader(&self, trader_id: &str) {
        self.traders.write().await.remove(trader_id);
        self.running.write().await.remove(trader_id);
    }
}

impl Default for MockTraderManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TraderManager for MockTraderManager {
    async fn active_traders(&self) -> Vec<Arc<dyn Trader>> {
        let running = self.running.read().await;
        let mut traders: Vec<Arc<dyn Trader>> = self
            .traders
            .read()
            .await
            .values()
            .filter(|t| running.get(t.id()).copied().unwrap_or(false))
            .map(|t| t.clone() as Arc<dyn Trader>)
            .collect();
        // Stable ordering keeps snapshots deterministic
        traders.sort_by(|a, b| a.id().cmp(b.id()));
        traders
    }

    async fn get(&self, trader_id: &str) -> Option<Arc<dyn Trader>> {
        self.traders
            .read()
            .await
            .get(trader_id)
            .map(|t| t.clone() as Arc<dyn Trader>)
    }

    async fn start(&self, trader_id: &str) -> Result<()> {
        let mut running = self.running.write().await;
        match running.get_mut(trader_id) {
            Some(state) => {
                *state = true;
                Ok(())
            }
            None => Err(AssistantError::NotFound(format!(
                "trader not found: {}",
                trader_id
            ))),
        }
    }

    async fn stop(&self, trader_id: &str) -> Result<()> {
        let mut running = self.running.write().await;
        match running.get_mut(trader_id) {
            Some(state) => {
                *state = false;
                Ok(())
            }
            None => Err(AssistantError::NotFound(format!(
                "trader not found: {}",
                trader_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_active_traders_excludes_stopped() {
        let manager = MockTraderManager::new();
        manager
            .add_trader(Arc::new(MockTrader::new("t1", "Alpha", "binance")))
            .await;
        manager
            .add_trader(Arc::new(MockTrader::new("t2", "Beta", "hyperliquid")))
            .await;

        assert_eq!(manager.active_traders().await.len(), 2);

        manager.stop("t2").await.unwrap();
        let active = manager.active_traders().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), "t1");
    }

    #[tokio::test]
    async fn test_start_unknown_trader_is_lookup_error() {
        let manager = MockTraderManager::new();
        let err = manager.start("missing").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
