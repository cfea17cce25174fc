//! Trading context synthesizer
//!
//! Builds one consistent snapshot of live portfolio state across all active
//! traders and derives threshold alerts in the same pass. A failed fetch for
//! one trader skips that figure without failing the snapshot.

use crate::manager::{Position, TraderManager};
use crate::models::{Alert, AlertLevel, PositionSide, PositionSummary, TraderSummary, TradingContext};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Builds trading context snapshots for prompts and the monitor.
pub struct ContextBuilder {
    manager: Arc<dyn TraderManager>,
}

impl ContextBuilder {
    pub fn new(manager: Arc<dyn TraderManager>) -> Self {
        Self { manager }
    }

    /// Rebuilds the full snapshot from the live backend. Partial results are
    /// expected: a trader whose account or position fetch fails contributes
    /// nothing for that figure.
    pub async fn build_context(&self) -> TradingContext {
        let mut ctx = TradingContext {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };

        for trader in self.manager.active_traders().await {
            let mut summary = TraderSummary {
                id: trader.id().to_string(),
                name: trader.name().to_string(),
                exchange: trader.exchange().to_string(),
                is_running: true,
                equity: 0.0,
                position_count: 0,
            };

            match trader.account_info().await {
                Ok(account) => {
                    summary.equity = account.total_equity;
                    ctx.total_equity += account.total_equity;
                    ctx.available_balance += account.available_balance;
                }
                Err(e) => {
                    warn!(trader_id = %trader.id(), error = %e, "Skipping account info for trader");
                }
            }

            match trader.positions().await {
                Ok(positions) => {
                    summary.position_count = positions.len();
                    for pos in &positions {
                        let pos_summary = summarize_position(pos, trader.id(), trader.name());
                        ctx.unrealized_pnl += pos_summary.unrealized_pnl;
                        ctx.alerts.extend(position_alerts(&pos_summary));
                        ctx.positions.push(pos_summary);
                    }
                }
                Err(e) => {
                    warn!(trader_id = %trader.id(), error = %e, "Skipping positions for trader");
                }
            }

            ctx.active_traders.push(summary);
        }

        ctx
    }
}

/// Derives the display summary for one position, including leveraged P&L
/// percent. The computation is skipped when entry price or size is
/// non-positive.
fn summarize_position(pos: &Position, trader_id: &str, trader_name: &str) -> PositionSummary {
    let mut summary = PositionSummary {
        symbol: pos.symbol.clone(),
        side: pos.side,
        size: pos.size,
        entry_price: pos.entry_price,
        mark_price: pos.mark_price,
        unrealized_pnl: pos.unrealized_pnl,
        pnl_percent: 0.0,
        leverage: pos.leverage,
        liquidation_price: pos.liquidation_price,
        trader_id: trader_id.to_string(),
        trader_name: trader_name.to_string(),
    };

    if pos.entry_price > 0.0 && pos.size > 0.0 {
        let raw = match pos.side {
            PositionSide::Long => (pos.mark_price - pos.entry_price) / pos.entry_price,
            PositionSide::Short => (pos.entry_price - pos.mark_price) / pos.entry_price,
        };
        summary.pnl_percent = raw * 100.0 * pos.leverage as f64;
    }

    summary
}

/// Threshold alerts for one position, evaluated during the snapshot pass.
fn position_alerts(pos: &PositionSummary) -> Vec<Alert> {
    let mut alerts = Vec::new();

    // Liquidation distance, only meaningful when both prices are positive
    if let Some(liquidation) = pos.liquidation_price {
        if liquidation > 0.0 && pos.mark_price > 0.0 {
            let distance_percent = match pos.side {
                PositionSide::Long => (pos.mark_price - liquidation) / pos.mark_price * 100.0,
                PositionSide::Short => (liquidation - pos.mark_price) / pos.mark_price * 100.0,
            };

            if distance_percent < 5.0 {
                alerts.push(Alert::new(
                    AlertLevel::Danger,
                    "liquidation_risk",
                    format!(
                        "{} {} position is only {:.1}% from liquidation!",
                        pos.symbol, pos.side, distance_percent
                    ),
                ));
            } else if distance_percent < 10.0 {
                alerts.push(Alert::new(
                    AlertLevel::Warning,
                    "liquidation_risk",
                    format!(
                        "{} {} position is {:.1}% from liquidation, watch the risk",
                        pos.symbol, pos.side, distance_percent
                    ),
                ));
            }
        }
    }

    // Large loss
    if pos.pnl_percent < -20.0 {
        alerts.push(Alert::new(
            AlertLevel::Danger,
            "large_loss",
            format!(
                "{} {} position is down {:.1}%, consider a stop loss",
                pos.symbol, pos.side, pos.pnl_percent
            ),
        ));
    } else if pos.pnl_percent < -10.0 {
        alerts.push(Alert::new(
            AlertLevel::Warning,
            "large_loss",
            format!(
                "{} {} position is down {:.1}%",
                pos.symbol, pos.side, pos.pnl_percent
            ),
        ));
    }

    // Large profit, consider taking some off
    if pos.pnl_percent > 50.0 {
        alerts.push(Alert::new(
            AlertLevel::Info,
            "large_profit",
            format!(
                "{} {} position is up {:.1}%, consider taking partial profit",
                pos.symbol, pos.side, pos.pnl_percent
            ),
        ));
    }

    alerts
}

impl TradingContext {
    /// Renders the snapshot as a markdown digest for prompt injection.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();

        out.push_str("\n\n---\n## Current Trading State (live)\n\n");
        out.push_str(&format!(
            "**Total equity:** ${:.2} | **Available balance:** ${:.2} | **Unrealized P&L:** ${:.2}\n\n",
            self.total_equity, self.available_balance, self.unrealized_pnl
        ));

        if !self.alerts.is_empty() {
            out.push_str("### Alerts\n");
            for alert in &self.alerts {
                out.push_str(&format!("- [{}] {}\n", alert.level, alert.message));
            }
            out.push('\n');
        }

        if !self.positions.is_empty() {
            out.push_str("### Positions\n");
            out.push_str("| Symbol | Side | Size | Entry | Mark | P&L | P&L % | Leverage | Trader |\n");
            out.push_str("|--------|------|------|-------|------|-----|-------|----------|--------|\n");
            for pos in &self.positions {
                out.push_str(&format!(
                    "| {} | {} | {:.4} | {:.2} | {:.2} | ${:.2} | {:.1}% | {}x | {} |\n",
                    pos.symbol,
                    pos.side,
                    pos.size,
                    pos.entry_price,
                    pos.mark_price,
                    pos.unrealized_pnl,
                    pos.pnl_percent,
                    pos.leverage,
                    pos.trader_name
                ));
            }
            out.push('\n');
        } else {
            out.push_str("### Positions\nNo open positions\n\n");
        }

        if !self.active_traders.is_empty() {
            out.push_str("### Active Traders\n");
            for t in &self.active_traders {
                let status = if t.is_running { "running" } else { "stopped" };
                out.push_str(&format!(
                    "- **{}** ({}) {} | equity ${:.2} | positions {}\n",
                    t.name, t.exchange, status, t.equity, t.position_count
                ));
            }
            out.push('\n');
        }

        if let Some(updated_at) = self.updated_at {
            out.push_str(&format!(
                "*Updated: {}*\n---\n",
                updated_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{AccountInfo, MockTrader, MockTraderManager};

    fn position(
        symbol: &str,
        side: PositionSide,
        entry: f64,
        mark: f64,
        leverage: u32,
        liquidation: Option<f64>,
    ) -> Position {
        Position {
            symbol: symbol.to_string(),
            side,
            size: 1.0,
            entry_price: entry,
            mark_price: mark,
            unrealized_pnl: 0.0,
            leverage,
            liquidation_price: liquidation,
        }
    }

    fn alerts_of_kind<'a>(alerts: &'a [Alert], kind: &str) -> Vec<&'a Alert> {
        alerts.iter().filter(|a| a.kind == kind).collect()
    }

    #[test]
    fn test_pnl_percent_long_and_short() {
        let long = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 110.0, 5, None),
            "t1",
            "Alpha",
        );
        assert!((long.pnl_percent - 50.0).abs() < 1e-9);

        let short = summarize_position(
            &position("BTCUSDT", PositionSide::Short, 100.0, 110.0, 5, None),
            "t1",
            "Alpha",
        );
        assert!((short.pnl_percent + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_pnl_percent_skipped_for_bad_entry() {
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 0.0, 110.0, 5, None),
            "t1",
            "Alpha",
        );
        assert_eq!(pos.pnl_percent, 0.0);
    }

    #[test]
    fn test_liquidation_distance_alerts() {
        // Long at mark 100, liquidation 96 → distance 4% → danger
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 100.0, 1, Some(96.0)),
            "t1",
            "Alpha",
        );
        let alerts = position_alerts(&pos);
        let liq = alerts_of_kind(&alerts, "liquidation_risk");
        assert_eq!(liq.len(), 1);
        assert_eq!(liq[0].level, AlertLevel::Danger);

        // Distance 7% → warning
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 100.0, 1, Some(93.0)),
            "t1",
            "Alpha",
        );
        let alerts = position_alerts(&pos);
        let liq = alerts_of_kind(&alerts, "liquidation_risk");
        assert_eq!(liq.len(), 1);
        assert_eq!(liq[0].level, AlertLevel::Warning);

        // Distance 15% → no alert
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 100.0, 1, Some(85.0)),
            "t1",
            "Alpha",
        );
        let alerts = position_alerts(&pos);
        assert!(alerts_of_kind(&alerts, "liquidation_risk").is_empty());
    }

    #[test]
    fn test_short_liquidation_distance() {
        // Short at mark 100, liquidation 104 → distance 4% → danger
        let pos = summarize_position(
            &position("ETHUSDT", PositionSide::Short, 100.0, 100.0, 1, Some(104.0)),
            "t1",
            "Alpha",
        );
        let alerts = position_alerts(&pos);
        let liq = alerts_of_kind(&alerts, "liquidation_risk");
        assert_eq!(liq.len(), 1);
        assert_eq!(liq[0].level, AlertLevel::Danger);
    }

    #[test]
    fn test_pnl_alerts() {
        // -25% → danger large_loss
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 75.0, 1, None),
            "t1",
            "Alpha",
        );
        let alerts = position_alerts(&pos);
        let loss = alerts_of_kind(&alerts, "large_loss");
        assert_eq!(loss.len(), 1);
        assert_eq!(loss[0].level, AlertLevel::Danger);

        // -15% → warning
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 85.0, 1, None),
            "t1",
            "Alpha",
        );
        let alerts = position_alerts(&pos);
        let loss = alerts_of_kind(&alerts, "large_loss");
        assert_eq!(loss.len(), 1);
        assert_eq!(loss[0].level, AlertLevel::Warning);

        // -5% → no loss alert
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 95.0, 1, None),
            "t1",
            "Alpha",
        );
        assert!(alerts_of_kind(&position_alerts(&pos), "large_loss").is_empty());

        // +60% → info large_profit
        let pos = summarize_position(
            &position("BTCUSDT", PositionSide::Long, 100.0, 160.0, 1, None),
            "t1",
            "Alpha",
        );
        let alerts = position_alerts(&pos);
        let profit = alerts_of_kind(&alerts, "large_profit");
        assert_eq!(profit.len(), 1);
        assert_eq!(profit[0].level, AlertLevel::Info);
    }

    #[tokio::test]
    async fn test_total_equity_sums_trader_equities() {
        let manager = Arc::new(MockTraderManager::new());

        let t1 = Arc::new(MockTrader::new("t1", "Alpha", "binance"));
        t1.set_account(AccountInfo {
            total_equity: 1000.0,
            available_balance: 400.0,
        })
        .await;
        manager.add_trader(t1).await;

        let t2 = Arc::new(MockTrader::new("t2", "Beta", "hyperliquid"));
        t2.set_account(AccountInfo {
            total_equity: 500.0,
            available_balance: 500.0,
        })
        .await;
        manager.add_trader(t2).await;

        let builder = ContextBuilder::new(manager);
        let ctx = builder.build_context().await;

        assert_eq!(ctx.total_equity, 1500.0);
        assert_eq!(ctx.available_balance, 900.0);
        let from_traders: f64 = ctx.active_traders.iter().map(|t| t.equity).sum();
        assert_eq!(ctx.total_equity, from_traders);
    }

    #[tokio::test]
    async fn test_partial_snapshot_on_fetch_failure() {
        let manager = Arc::new(MockTraderManager::new());

        let healthy = Arc::new(MockTrader::new("t1", "Alpha", "binance"));
        healthy
            .set_account(AccountInfo {
                total_equity: 1000.0,
                available_balance: 1000.0,
            })
            .await;
        healthy
            .set_positions(vec![position(
                "BTCUSDT",
                PositionSide::Long,
                100.0,
                105.0,
                2,
                None,
            )])
            .await;
        manager.add_trader(healthy).await;

        let broken = Arc::new(MockTrader::new("t2", "Beta", "hyperliquid"));
        broken.fail_account_fetch(true).await;
        broken.fail_position_fetch(true).await;
        manager.add_trader(broken).await;

        let builder = ContextBuilder::new(manager);
        let ctx = builder.build_context().await;

        // The broken trader is still listed, just with zeroed figures
        assert_eq!(ctx.active_traders.len(), 2);
        assert_eq!(ctx.total_equity, 1000.0);
        assert_eq!(ctx.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_digest_mentions_positions() {
        let manager = Arc::new(MockTraderManager::new());
        let t1 = Arc::new(MockTrader::new("t1", "Alpha", "binance"));
        t1.set_positions(vec![position(
            "BTCUSDT",
            PositionSide::Long,
            50000.0,
            51000.0,
            3,
            None,
        )])
        .await;
        manager.add_trader(t1).await;

        let ctx = ContextBuilder::new(manager).build_context().await;
        let digest = ctx.format_for_prompt();
        assert!(digest.contains("BTCUSDT"));
        assert!(digest.contains("Active Traders"));
    }
}
