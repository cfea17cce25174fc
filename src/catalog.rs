//! Tradeable coin catalog
//!
//! Fetches the perp universe from the exchange info endpoint and caches it
//! with a TTL. Freshness is checked on every read, so the first caller after
//! expiry pays the refresh cost and everyone else reads the cache.

use crate::error::AssistantError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// One tradeable coin, as surfaced to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinInfo {
    pub symbol: String,
    pub max_leverage: u32,
    /// 24h notional volume in USD, used for ranking
    pub volume_24h: f64,
    pub mark_price: f64,
}

struct CacheState {
    coins: Vec<CoinInfo>,
    fetched_at: Option<Instant>,
}

/// TTL-cached coin catalog backed by the exchange info endpoint.
pub struct CoinCatalog {
    http: Option<reqwest::Client>,
    base_url: String,
    ttl: Duration,
    inner: RwLock<CacheState>,
}

impl CoinCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http: Some(http),
            base_url: base_url.into(),
            ttl: DEFAULT_TTL,
            inner: RwLock::new(CacheState {
                coins: Vec::new(),
                fetched_at: None,
            }),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Catalog seeded with a fixed coin list and no backing endpoint. The
    /// seed never expires. Used by the demo binaries and tests.
    pub fn offline(coins: Vec<CoinInfo>) -> Self {
        Self {
            http: None,
            base_url: String::new(),
            ttl: DEFAULT_TTL,
            inner: RwLock::new(CacheState {
                coins,
                fetched_at: None,
            }),
        }
    }

    /// All coins, volume-sorted descending.
    pub async fn all_coins(&self) -> Result<Vec<CoinInfo>> {
        self.ensure_fresh().await?;
        Ok(self.inner.read().await.coins.clone())
    }

    /// The top coins by 24h volume.
    pub async fn main_coins(&self, limit: usize) -> Result<Vec<CoinInfo>> {
        let coins = self.all_coins().await?;
        Ok(coins.into_iter().take(limit).collect())
    }

    pub async fn force_refresh(&self) -> Result<()> {
        self.refresh().await
    }

    async fn ensure_fresh(&self) -> Result<()> {
        let http_backed = self.http.is_some();
        {
            let state = self.inner.read().await;
            let fresh = match state.fetched_at {
                Some(at) => at.elapsed() < self.ttl,
                // Offline seeds never expire; an HTTP-backed empty cache must fetch
                None => !http_backed,
            };
            if fresh {
                return Ok(());
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<()> {
        let http = self.http.as_ref().ok_or_else(|| {
            AssistantError::Catalog("offline catalog cannot refresh".to_string())
        })?;

        debug!(url = %self.base_url, "Refreshing coin catalog");
        let response = http
            .post(&self.base_url)
            .json(&json!({"type": "metaAndAssetCtxs"}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AssistantError::Catalog(format!(
                "info endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let coins = parse_meta_and_ctxs(&body)?;

        let mut state = self.inner.write().await;
        info!(count = coins.len(), "Coin catalog refreshed");
        state.coins = coins;
        state.fetched_at = Some(Instant::now());
        Ok(())
    }
}

/// Parses a `[meta, assetCtxs]` pair into a volume-sorted coin list. Entries
/// with no matching context are skipped.
fn parse_meta_and_ctxs(body: &Value) -> Result<Vec<CoinInfo>> {
    let pair = body
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| AssistantError::Catalog("expected [meta, assetCtxs] pair".to_string()))?;

    let universe = pair[0]
        .get("universe")
        .and_then(Value::as_array)
        .ok_or_else(|| AssistantError::Catalog("missing universe in meta".to_string()))?;
    let ctxs = pair[1]
        .as_array()
        .ok_or_else(|| AssistantError::Catalog("missing asset contexts".to_string()))?;

    let mut coins = Vec::with_capacity(universe.len());
    for (i, asset) in universe.iter().enumerate() {
        let Some(symbol) = asset.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(ctx) = ctxs.get(i) else {
            continue;
        };
        let max_leverage = asset
            .get("maxLeverage")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;
        coins.push(CoinInfo {
            symbol: symbol.to_string(),
            max_leverage,
            volume_24h: str_number(ctx.get("dayNtlVlm")),
            mark_price: str_number(ctx.get("markPx")),
        });
    }

    coins.sort_by(|a, b| {
        b.volume_24h
            .partial_cmp(&a.volume_24h)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(coins)
}

// The info endpoint encodes numbers as strings
fn str_number(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}
