//! Configuration store collaborator
//!
//! Trader/strategy/exchange/model configuration records live in an external
//! store; only specific tools read them, never the core loop. The in-memory
//! implementation backs tests and the demo binaries.

use crate::error::AssistantError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderRecord {
    pub id: String,
    pub name: String,
    pub is_running: bool,
    pub exchange_id: String,
    pub strategy_id: String,
    pub ai_model_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: String,
    pub name: String,
    pub exchange_type: String,
    pub enabled: bool,
    // Credential, must never be surfaced through tools
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub enabled: bool,
    // Credential, must never be surfaced through tools
    pub api_key: String,
}

/// Narrow contract over the configuration persistence backend.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_traders(&self) -> Result<Vec<TraderRecord>>;
    async fn get_trader(&self, id: &str) -> Result<Option<TraderRecord>>;
    async fn set_trader_running(&self, id: &str, running: bool) -> Result<()>;

    async fn list_strategies(&self) -> Result<Vec<StrategyRecord>>;
    async fn list_exchanges(&self) -> Result<Vec<ExchangeRecord>>;
    async fn list_models(&self) -> Result<Vec<ModelRecord>>;
}

/// In-memory configuration store for development
pub struct InMemoryConfigStore {
    traders: RwLock<HashMap<String, TraderRecord>>,
    strategies: RwLock<Vec<StrategyRecord>>,
    exchanges: RwLock<Vec<ExchangeRecord>>,
    models: RwLock<Vec<ModelRecord>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self {
            traders: RwLock::new(HashMap::new()),
            strategies: RwLock::new(Vec::new()),
            exchanges: RwLock::new(Vec::new()),
            models: RwLock::new(Vec::new()),
        }
    }

    pub async fn insert_trader(&self, record: TraderRecord) {
        self.traders.write().await.insert(record.id.clone(), record);
    }

    pub async fn insert_strategy(&self, record: StrategyRecord) {
        self.strategies.write().await.push(record);
    }

    pub async fn insert_exchange(&self, record: ExchangeRecord) {
        self.exchanges.write().await.push(record);
    }

    pub async fn insert_model(&self, record: ModelRecord) {
        self.models.write().await.push(record);
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn list_traders(&self) -> Result<Vec<TraderRecord>> {
        let mut records: Vec<_> = self.traders.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn get_trader(&self, id: &str) -> Result<Option<TraderRecord>> {
        Ok(self.traders.read().await.get(id).cloned())
    }

    async fn set_trader_running(&self, id: &str, running: bool) -> Result<()> {
        let mut traders = self.traders.write().await;
        match traders.get_mut(id) {
            Some(record) => {
                record.is_running = running;
                Ok(())
            }
            None => Err(AssistantError::StoreError(format!(
                "trader record not found: {}",
                id
            ))),
        }
    }

    async fn list_strategies(&self) -> Result<Vec<StrategyRecord>> {
        Ok(self.strategies.read().await.clone())
    }

    async fn list_exchanges(&self) -> Result<Vec<ExchangeRecord>> {
        Ok(self.exchanges.read().await.clone())
    }

    async fn list_models(&self) -> Result<Vec<ModelRecord>> {
        Ok(self.models.read().await.clone())
    }
}
