//! Background position monitor
//!
//! Periodically rebuilds the trading context, dedups threshold alerts over a
//! rolling window, and diffs positions between ticks to notice opens and
//! closes. Alert delivery fans out to every registered callback and runs on
//! a small worker pool behind a bounded queue; when the queue is full the
//! alert is dropped and logged rather than stalling the check loop.

use crate::context::ContextBuilder;
use crate::models::{Alert, AlertLevel, PositionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);
const ALERT_QUEUE_CAPACITY: usize = 64;
const DELIVERY_WORKERS: usize = 2;

/// Callback invoked for every delivered alert.
pub type AlertHandler = Arc<dyn Fn(Alert) + Send + Sync>;

struct ControlState {
    running: bool,
    cancel: Option<CancellationToken>,
    tx: Option<mpsc::Sender<Alert>>,
}

#[derive(Default)]
struct WatchState {
    last_positions: HashMap<String, PositionSummary>,
    last_alerts: HashMap<String, Instant>,
}

pub struct Monitor {
    context: Arc<ContextBuilder>,
    handlers: RwLock<Vec<AlertHandler>>,
    interval: RwLock<Duration>,
    control: Mutex<ControlState>,
    watch: Mutex<WatchState>,
}

impl Monitor {
    pub fn new(context: Arc<ContextBuilder>) -> Self {
        Self {
            context,
            handlers: RwLock::new(Vec::new()),
            interval: RwLock::new(DEFAULT_INTERVAL),
            control: Mutex::new(ControlState {
                running: false,
                cancel: None,
                tx: None,
            }),
            watch: Mutex::new(WatchState::default()),
        }
    }

    /// Registers an alert callback. Every delivered alert reaches every
    /// registered callback; callback failures are the subscriber's problem.
    pub async fn on_alert(&self, handler: AlertHandler) {
        self.handlers.write().await.push(handler);
    }

    /// Changes the check interval. Takes effect on the next start.
    pub async fn set_interval(&self, interval: Duration) {
        *self.interval.write().await = interval;
    }

    pub async fn is_running(&self) -> bool {
        self.control.lock().await.running
    }

    /// Fresh snapshot on demand, outside the tick schedule.
    pub async fn current_context(&self) -> crate::models::TradingContext {
        self.context.build_context().await
    }

    /// Starts the check loop and delivery workers. Idempotent: a second
    /// start while running does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut control = self.control.lock().await;
        if control.running {
            debug!("Monitor already running");
            return;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Alert>(ALERT_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..DELIVERY_WORKERS {
            let rx = rx.clone();
            let monitor = self.clone();
            tokio::spawn(async move {
                loop {
                    // Channel close after the senders drop drains the queue
                    let alert = rx.lock().await.recv().await;
                    match alert {
                        Some(alert) => monitor.deliver(alert).await,
                        None => break,
                    }
                }
                debug!(worker, "Alert delivery worker stopped");
            });
        }

        let monitor = self.clone();
        let loop_cancel = cancel.clone();
        let loop_tx = tx.clone();
        let interval = *self.interval.read().await;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.run_check(&loop_tx).await,
                }
            }
            debug!("Monitor check loop stopped");
        });

        control.running = true;
        control.cancel = Some(cancel);
        control.tx = Some(tx);
        info!(interval_secs = interval.as_secs(), "Monitor started");
    }

    /// Stops the check loop. Alerts already queued are still delivered.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if !control.running {
            return;
        }
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        control.tx = None;
        control.running = false;
        info!("Monitor stopped");
    }

    /// One monitoring pass: snapshot, dedup threshold alerts, diff positions.
    /// All delivery goes through the queue; the tick task never runs a
    /// subscriber callback itself.
    async fn run_check(&self, tx: &mpsc::Sender<Alert>) {
        let ctx = self.context.build_context().await;

        let mut watch = self.watch.lock().await;
        let now = Instant::now();

        // Threshold alerts go through the dedup window. The suppression
        // timestamp is recorded only on a successful enqueue, so an alert
        // dropped by a full queue can retry on the next tick.
        for alert in &ctx.alerts {
            let key = alert.dedup_key();
            if let Some(last) = watch.last_alerts.get(&key) {
                if now.duration_since(*last) < DEDUP_WINDOW {
                    continue;
                }
            }
            if self.dispatch(tx, alert.clone()) {
                watch.last_alerts.insert(key, now);
            }
        }
        watch
            .last_alerts
            .retain(|_, last| now.duration_since(*last) < DEDUP_WINDOW);

        // Position diffs describe discrete events and skip the dedup filter
        let current: HashMap<String, PositionSummary> = ctx
            .positions
            .iter()
            .map(|p| (position_key(p), p.clone()))
            .collect();

        for (key, pos) in &current {
            if !watch.last_positions.contains_key(key) {
                self.dispatch(
                    tx,
                    Alert::new(
                        AlertLevel::Info,
                        "new_position",
                        format!(
                            "{} opened {} {} at {:.2} ({}x)",
                            pos.trader_name, pos.side, pos.symbol, pos.entry_price, pos.leverage
                        ),
                    ),
                );
            }
        }
        for (key, pos) in &watch.last_positions {
            if !current.contains_key(key) {
                self.dispatch(
                    tx,
                    Alert::new(
                        AlertLevel::Info,
                        "position_closed",
                        format!(
                            "{} closed {} {} (last P&L ${:.2})",
                            pos.trader_name, pos.side, pos.symbol, pos.unrealized_pnl
                        ),
                    ),
                );
            }
        }
        watch.last_positions = current;
    }

    /// Fans one alert out to every subscriber. A panicking callback is
    /// contained here so it cannot take a delivery worker down with it.
    async fn deliver(&self, alert: Alert) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            let alert = alert.clone();
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(alert)));
            if outcome.is_err() {
                warn!("Alert subscriber panicked");
            }
        }
    }

    fn dispatch(&self, tx: &mpsc::Sender<Alert>, alert: Alert) -> bool {
        match tx.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                warn!(kind = %alert.kind, "Alert queue full, dropping alert");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn position_key(pos: &PositionSummary) -> String {
    format!("{}_{}_{}", pos.trader_id, pos.symbol, pos.side)
}
