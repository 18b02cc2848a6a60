//! Per-venue order execution adapter.
//!
//! Submits and cancels orders through the session layer, reconciles
//! order status from the venue's push channel and/or polled queries,
//! and keeps the balance cache current. Both reconciliation paths
//! funnel into `apply_report`, so downstream code never knows which
//! mechanism a venue uses. Terminal states are reported to the caller
//! over a channel and confirmed with risk control exactly once.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use xchg_core::{
    Fill, OrderSide, OrderStatus, OrderTransactionContext, OrderUpdate, Price, Qty, Symbol,
    TimeInForce,
};
use xchg_rest::{RestError, SessionClient};
use xchg_stream::{EventSink, PollingConfig, PollingTask, Scheduler, SchedulerScope, StreamConnection};
use xchg_risk::{OperationId, RiskControl};

use crate::balance::BalanceCache;
use crate::clock::ClockSync;
use crate::error::{GatewayError, GatewayResult};
use crate::venue::{AccountEvent, CatalogCell, NewOrder, Venue};

/// Order gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderGatewayConfig {
    /// Open-order reconciliation poll period.
    pub poll_frequency_ms: u64,
    /// Balance snapshot poll period.
    pub balance_poll_frequency_ms: u64,
    /// Base delay for account-stream reconnect backoff.
    pub reconnect_base_delay_ms: u64,
    /// Ceiling for account-stream reconnect backoff.
    pub reconnect_max_delay_ms: u64,
}

impl Default for OrderGatewayConfig {
    fn default() -> Self {
        Self {
            poll_frequency_ms: 2_000,
            balance_poll_frequency_ms: 10_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

/// Normalized status report delivered to the caller.
#[derive(Debug, Clone)]
pub struct OrderReport {
    pub ctx: OrderTransactionContext,
    pub status: OrderStatus,
    pub filled_qty: Qty,
    pub avg_price: Option<Price>,
    pub timestamp: chrono::DateTime<Utc>,
}

struct TrackedOrder {
    ctx: OrderTransactionContext,
    side: OrderSide,
    qty: Qty,
    price: Price,
    status: OrderStatus,
    filled_qty: Qty,
    avg_price: Option<Price>,
    /// At most one cancel is in flight per context.
    cancel_in_flight: bool,
    risk_op: Option<OperationId>,
    confirmed: bool,
}

/// Per-venue order gateway.
pub struct OrderGateway {
    venue: Arc<dyn Venue>,
    session: Arc<SessionClient>,
    config: OrderGatewayConfig,
    catalog: CatalogCell,
    balances: Arc<BalanceCache>,
    clock: Arc<ClockSync>,
    polling: Arc<PollingTask>,
    risk: Option<Arc<RiskControl>>,
    orders: DashMap<String, Mutex<TrackedOrder>>,
    reports_tx: mpsc::UnboundedSender<OrderReport>,
    scheduler: Scheduler,
    scope: SchedulerScope,
}

impl OrderGateway {
    /// Build the gateway. The returned receiver delivers every status
    /// change, terminal ones included.
    pub fn new(
        venue: Arc<dyn Venue>,
        session: Arc<SessionClient>,
        catalog: CatalogCell,
        risk: Option<Arc<RiskControl>>,
        scheduler: Scheduler,
        config: OrderGatewayConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OrderReport>) {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let scope = scheduler.scope(format!("orders-{}", venue.name()));

        let gateway = Arc::new(Self {
            venue,
            session,
            config,
            catalog,
            balances: Arc::new(BalanceCache::new()),
            clock: Arc::new(ClockSync::new()),
            polling: Arc::new(PollingTask::new(PollingConfig::default())),
            risk,
            orders: DashMap::new(),
            reports_tx,
            scheduler,
            scope,
        });
        (gateway, reports_rx)
    }

    pub fn balances(&self) -> &Arc<BalanceCache> {
        &self.balances
    }

    pub fn clock(&self) -> &Arc<ClockSync> {
        &self.clock
    }

    /// Start reconciliation: polling jobs always, the account push
    /// channel when the venue has one.
    pub async fn start(self: Arc<Self>) -> GatewayResult<()> {
        let gw = self.clone();
        self.polling.add_task(
            "order-status",
            0,
            move || {
                let gw = gw.clone();
                async move { gw.poll_open_orders().await }
            },
            Duration::from_millis(self.config.poll_frequency_ms),
            false,
        );

        let gw = self.clone();
        self.polling.add_task(
            "balances",
            1,
            move || {
                let gw = gw.clone();
                async move { gw.poll_balances().await }
            },
            Duration::from_millis(self.config.balance_poll_frequency_ms),
            true,
        );
        self.polling.clone().spawn(&self.scope);

        if self.venue.build_server_time_request().is_some() {
            if let Err(e) = self.sync_clock().await {
                warn!(error = %e, "clock sync failed, proceeding with zero offset");
            }
        }

        if self.venue.account_stream_config().is_some() {
            self.clone().connect_account_stream().await?;
        }
        Ok(())
    }

    /// Cancel all scheduled work. Outstanding orders stay at the venue.
    pub fn shutdown(&self) {
        let canceled = self.scope.cancel();
        debug!(venue = %self.venue.name(), canceled, "order gateway shutdown");
    }

    /// Measure the venue server clock against ours. The offset is
    /// applied uniformly to every push-event timestamp.
    pub async fn sync_clock(&self) -> GatewayResult<()> {
        let request = self
            .venue
            .build_server_time_request()
            .ok_or_else(|| GatewayError::Communication("no server time endpoint".to_string()))?;
        let response = self.session.send(&request).await?;
        let server_time = self.venue.parse_server_time(&response)?;
        self.clock.update(server_time, response.received_at);
        info!(offset_ms = self.clock.offset_ms(), "clock synced");
        Ok(())
    }

    /// Pure venue-bounds pre-check, layered beneath risk control.
    /// Deterministic for the same input; never rounds on the caller's
    /// behalf.
    pub fn check_order(
        &self,
        symbol: &Symbol,
        qty: Qty,
        price: Price,
        side: OrderSide,
    ) -> GatewayResult<()> {
        let product = self.catalog.product_for(symbol)?;
        product
            .validate_order(qty, price, side)
            .map_err(GatewayError::WrongOrderParameter)
    }

    /// Submit an order. Returns the transaction context identifying
    /// it until a terminal state is reported and the caller releases
    /// it.
    pub async fn submit(
        &self,
        order: NewOrder,
        risk_op: Option<OperationId>,
    ) -> GatewayResult<OrderTransactionContext> {
        let product = self.catalog.product_for(&order.symbol)?;
        product
            .validate_order(order.qty, order.price, order.side)
            .map_err(GatewayError::WrongOrderParameter)?;

        let native = self.venue.supports_time_in_force(order.tif);
        let emulate_ioc = !native && order.tif == TimeInForce::ImmediateOrCancel;
        if !native && !emulate_ioc {
            return Err(GatewayError::UnsupportedOrderType(order.tif.to_string()));
        }
        if emulate_ioc && !self.venue.supports_time_in_force(TimeInForce::GoodTilCanceled) {
            return Err(GatewayError::UnsupportedOrderType(order.tif.to_string()));
        }

        // An emulated IOC goes to the venue as a plain resting order;
        // the remainder is canceled right after acceptance.
        let mut wire_order = order.clone();
        if emulate_ioc {
            wire_order.tif = TimeInForce::GoodTilCanceled;
        }

        let request = self.venue.build_submit_request(&wire_order, &product)?;
        let response = self.session.send(&request).await?;
        let venue_order_id = self.venue.parse_submit_response(&response)?;

        let ctx = OrderTransactionContext {
            venue_order_id: venue_order_id.clone(),
            client_id: order.client_id.clone(),
            symbol: order.symbol.clone(),
            correlation: Some(product.venue_symbol.clone()),
        };

        self.orders.insert(
            venue_order_id,
            Mutex::new(TrackedOrder {
                ctx: ctx.clone(),
                side: order.side,
                qty: order.qty,
                price: order.price,
                status: OrderStatus::Opened,
                filled_qty: Qty::ZERO,
                avg_price: None,
                cancel_in_flight: false,
                risk_op,
                confirmed: false,
            }),
        );

        info!(
            venue = %self.venue.name(),
            order = %ctx,
            side = %order.side,
            qty = %order.qty,
            price = %order.price,
            tif = %order.tif,
            emulated_ioc = emulate_ioc,
            "order submitted"
        );
        self.emit(OrderReport {
            ctx: ctx.clone(),
            status: OrderStatus::Opened,
            filled_qty: Qty::ZERO,
            avg_price: None,
            timestamp: response.received_at,
        });

        // Reconcile sooner than the next natural tick.
        self.polling.accelerate_next_polling();

        if emulate_ioc {
            self.cancel(&ctx).await?;
        }

        Ok(ctx)
    }

    /// Cancel an order. Idempotent: canceling an already-terminal
    /// order, or one the venue no longer knows, is a normal no-op.
    pub async fn cancel(&self, ctx: &OrderTransactionContext) -> GatewayResult<()> {
        if let Some(entry) = self.orders.get(&ctx.venue_order_id) {
            let mut tracked = entry.lock();
            if tracked.status.is_terminal() {
                debug!(order = %ctx, "cancel of terminal order is a no-op");
                return Ok(());
            }
            if tracked.cancel_in_flight {
                debug!(order = %ctx, "cancel already in flight");
                return Ok(());
            }
            tracked.cancel_in_flight = true;
        }

        let request = self.venue.build_cancel_request(ctx)?;
        match self.session.send(&request).await {
            Ok(_) => {
                debug!(order = %ctx, "cancel accepted");
                self.polling.accelerate_next_polling();
                Ok(())
            }
            Err(RestError::OrderUnknown) => {
                // Already filled or canceled at the venue; the poll
                // will surface the terminal state.
                debug!(order = %ctx, "cancel: order unknown, treating as no-op");
                self.polling.accelerate_next_polling();
                Ok(())
            }
            Err(e) => {
                if let Some(entry) = self.orders.get(&ctx.venue_order_id) {
                    entry.lock().cancel_in_flight = false;
                }
                Err(e.into())
            }
        }
    }

    /// Release a terminal order's context. Dropping a live order is
    /// refused so reconciliation cannot orphan it.
    pub fn release(&self, ctx: &OrderTransactionContext) -> GatewayResult<()> {
        let terminal = self
            .orders
            .get(&ctx.venue_order_id)
            .map(|entry| entry.lock().status.is_terminal());
        match terminal {
            None => Ok(()),
            Some(true) => {
                self.orders.remove(&ctx.venue_order_id);
                Ok(())
            }
            Some(false) => Err(GatewayError::Communication(format!(
                "refusing to release live order {ctx}"
            ))),
        }
    }

    /// Orders currently tracked (live and unreleased terminal).
    pub fn open_orders(&self) -> usize {
        self.orders.len()
    }

    /// Apply one normalized status report. Push and poll paths both
    /// land here; replays and regressions are ignored so the path is
    /// idempotent.
    pub(crate) fn apply_report(&self, update: OrderUpdate) {
        let Some(entry) = self.orders.get(&update.venue_order_id) else {
            debug!(order_id = %update.venue_order_id, "report for untracked order");
            return;
        };

        let (report, confirmation) = {
            let mut tracked = entry.lock();
            if tracked.status.is_terminal() {
                return;
            }
            // A stale Opened after fills started is out-of-order noise.
            if tracked.status == OrderStatus::PartiallyFilled
                && update.status == OrderStatus::Opened
            {
                return;
            }
            if update.status == tracked.status && update.filled_qty == tracked.filled_qty {
                return;
            }

            tracked.status = update.status;
            if update.filled_qty > tracked.filled_qty {
                tracked.filled_qty = update.filled_qty;
            }
            if update.avg_price.is_some() {
                tracked.avg_price = update.avg_price;
            }

            let report = OrderReport {
                ctx: tracked.ctx.clone(),
                status: tracked.status,
                filled_qty: tracked.filled_qty,
                avg_price: tracked.avg_price,
                timestamp: update.timestamp,
            };

            let confirmation = if tracked.status.is_terminal() && !tracked.confirmed {
                tracked.confirmed = true;
                tracked.risk_op.map(|op| {
                    (
                        op,
                        tracked.side,
                        tracked.status,
                        tracked.filled_qty,
                        tracked.avg_price.unwrap_or(tracked.price),
                        report.timestamp,
                    )
                })
            } else {
                None
            };
            (report, confirmation)
        };

        if report.status.is_terminal() {
            info!(order = %report.ctx, status = %report.status, filled = %report.filled_qty, "order terminal");
        }

        if let Some((op, side, status, filled_qty, price, timestamp)) = confirmation {
            if let Some(risk) = &self.risk {
                let fill = (filled_qty.is_positive()).then(|| Fill {
                    price,
                    qty: filled_qty,
                    fee: rust_decimal::Decimal::ZERO,
                    timestamp,
                });
                match side {
                    OrderSide::Buy => risk.confirm_buy_order(op, status, fill.as_ref(), None),
                    OrderSide::Sell => risk.confirm_sell_order(op, status, fill.as_ref(), None),
                }
            }
        }

        self.emit(report);
    }

    /// Push-channel entry point (used as the account stream's sink).
    pub(crate) fn handle_account_payload(&self, payload: &str) {
        match self.venue.decode_account_event(payload) {
            Ok(AccountEvent::Order(mut update)) => {
                update.timestamp = self.clock.to_local(update.timestamp);
                self.apply_report(update);
            }
            Ok(AccountEvent::Balance {
                currency,
                available,
                locked,
            }) => {
                self.balances.set(currency, available, locked);
            }
            Ok(AccountEvent::Ignore) => {}
            Err(e) => debug!(error = %e, "undecodable account payload"),
        }
    }

    async fn poll_open_orders(
        &self,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let active: Vec<(OrderTransactionContext, Qty)> = self
            .orders
            .iter()
            .filter_map(|entry| {
                let tracked = entry.lock();
                tracked
                    .status
                    .is_active()
                    .then(|| (tracked.ctx.clone(), tracked.filled_qty))
            })
            .collect();

        if active.is_empty() {
            return Ok(false);
        }

        for (ctx, filled_so_far) in active {
            let request = self.venue.build_order_status_request(&ctx)?;
            match self.session.send(&request).await {
                Ok(response) => {
                    let update = self.venue.parse_order_status(&response)?;
                    self.apply_report(update);
                }
                Err(RestError::OrderUnknown) => {
                    // The venue dropped it; close out with what filled.
                    self.apply_report(OrderUpdate {
                        venue_order_id: ctx.venue_order_id.clone(),
                        status: OrderStatus::Canceled,
                        filled_qty: filled_so_far,
                        avg_price: None,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => return Err(Box::new(GatewayError::from(e))),
            }
        }
        Ok(true)
    }

    async fn poll_balances(
        &self,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let request = self.venue.build_balances_request()?;
        let response = self.session.send(&request).await?;
        let balances = self.venue.parse_balances(&response)?;
        let any = !balances.is_empty();
        for (currency, available, locked) in balances {
            self.balances.set(currency, available, locked);
        }
        Ok(any)
    }

    async fn connect_account_stream(self: Arc<Self>) -> GatewayResult<()> {
        let Some(config) = self.venue.account_stream_config() else {
            return Ok(());
        };

        let mut connection = StreamConnection::new(config);
        connection.connect().await?;

        let sink: Arc<dyn EventSink> = Arc::new(AccountSink {
            gateway: self.clone(),
        });
        tokio::spawn(async move {
            let _ = connection.start(Vec::new(), sink).await;
        });
        info!(venue = %self.venue.name(), "account stream connected");
        Ok(())
    }

    fn schedule_account_reconnect(self: Arc<Self>) {
        if self.scope.is_canceled() {
            return;
        }
        let token = self.scope.child_token();
        let scope = self.scope.clone();
        self.scheduler.clone().schedule(Duration::ZERO, &scope, async move {
            self.account_reconnect_loop(token).await;
        });
    }

    /// Same explicit unbounded-retry loop as the market-data side.
    /// Polling keeps reconciliation alive while this runs.
    async fn account_reconnect_loop(self: Arc<Self>, token: CancellationToken) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let exponent = attempt.saturating_sub(1).min(10);
            let delay_ms = self
                .config
                .reconnect_base_delay_ms
                .saturating_mul(1u64 << exponent)
                .min(self.config.reconnect_max_delay_ms);

            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
            if token.is_cancelled() {
                return;
            }

            match self.clone().connect_account_stream().await {
                Ok(()) => return,
                Err(e) => {
                    warn!(venue = %self.venue.name(), attempt, error = %e, "account stream reconnect failed");
                }
            }
        }
    }

    fn emit(&self, report: OrderReport) {
        if self.reports_tx.send(report).is_err() {
            debug!("order report receiver dropped");
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_tracked_for_test(
        &self,
        ctx: OrderTransactionContext,
        side: OrderSide,
        qty: Qty,
        price: Price,
        risk_op: Option<OperationId>,
    ) {
        self.orders.insert(
            ctx.venue_order_id.clone(),
            Mutex::new(TrackedOrder {
                ctx,
                side,
                qty,
                price,
                status: OrderStatus::Opened,
                filled_qty: Qty::ZERO,
                avg_price: None,
                cancel_in_flight: false,
                risk_op,
                confirmed: false,
            }),
        );
    }
}

struct AccountSink {
    gateway: Arc<OrderGateway>,
}

#[async_trait::async_trait]
impl EventSink for AccountSink {
    async fn on_message(&self, _received_at: chrono::DateTime<Utc>, payload: String) {
        self.gateway.handle_account_payload(&payload);
    }

    async fn on_disconnect(&self) {
        warn!("account stream lost");
        self.gateway.clone().schedule_account_reconnect();
    }
}
