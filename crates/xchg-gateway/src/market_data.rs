//! Per-venue market-data adapter.
//!
//! Resolves the product catalog at connect time, creates a `Security`
//! per requested symbol, subscribes them to the venue feed and keeps
//! their top of book current from either direct quote pushes or
//! incremental book deltas. On disconnect the adapter schedules
//! reconnect attempts through its scheduler scope — an explicit
//! backoff loop that retries forever, so a venue outage degrades to
//! `online=false` on every security and nothing else.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use xchg_core::{Price, Product, Qty, Quote, Symbol};
use xchg_rest::SessionClient;
use xchg_stream::{
    ConnectionState, EventSink, Scheduler, SchedulerScope, StreamConnection, StreamStopHandle,
};

use crate::book::OrderBook;
use crate::error::{GatewayError, GatewayResult};
use crate::security::{Security, SecurityStore};
use crate::venue::{BookEvent, CatalogCell, Venue};

/// Market-data adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    /// Base delay for reconnect backoff.
    pub reconnect_base_delay_ms: u64,
    /// Ceiling for reconnect backoff.
    pub reconnect_max_delay_ms: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
        }
    }
}

/// Per-venue market-data gateway.
pub struct MarketDataGateway {
    venue: Arc<dyn Venue>,
    session: Arc<SessionClient>,
    config: MarketDataConfig,
    catalog: CatalogCell,
    securities: Arc<SecurityStore>,
    books: dashmap::DashMap<Symbol, Mutex<OrderBook>>,
    requested: RwLock<HashSet<Symbol>>,
    state: RwLock<ConnectionState>,
    /// Owned, swappable handle to the live connection. Taken under
    /// the lock, operated on outside it.
    stream_slot: Mutex<Option<StreamStopHandle>>,
    scheduler: Scheduler,
    scope: SchedulerScope,
}

impl MarketDataGateway {
    pub fn new(
        venue: Arc<dyn Venue>,
        session: Arc<SessionClient>,
        scheduler: Scheduler,
        config: MarketDataConfig,
    ) -> Arc<Self> {
        let scope = scheduler.scope(format!("md-{}", venue.name()));
        Arc::new(Self {
            venue,
            session,
            config,
            catalog: CatalogCell::new(),
            securities: Arc::new(SecurityStore::new()),
            books: dashmap::DashMap::new(),
            requested: RwLock::new(HashSet::new()),
            state: RwLock::new(ConnectionState::Disconnected),
            stream_slot: Mutex::new(None),
            scheduler,
            scope,
        })
    }

    pub fn securities(&self) -> &Arc<SecurityStore> {
        &self.securities
    }

    /// The adapter-scoped catalog slot, shared with the order gateway.
    pub fn catalog(&self) -> CatalogCell {
        self.catalog.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Resolve the catalog and open the venue feed.
    ///
    /// A catalog failure fails this connect attempt; individual calls
    /// afterwards never reload it.
    pub async fn connect(self: Arc<Self>) -> GatewayResult<()> {
        *self.state.write() = ConnectionState::Connecting;

        let catalog = match self.venue.load_catalog(&self.session).await {
            Ok(catalog) => catalog,
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        info!(venue = %self.venue.name(), products = catalog.len(), "catalog loaded");
        self.catalog.set(Arc::new(catalog));

        if let Err(e) = self.clone().open_stream().await {
            *self.state.write() = ConnectionState::Disconnected;
            return Err(e);
        }
        Ok(())
    }

    /// Create (or fetch) the live `Security` for a symbol and make
    /// sure it is on the venue feed.
    ///
    /// Fails with `SymbolNotSupported` when the catalog has no product
    /// for the symbol.
    pub fn subscribe(self: Arc<Self>, symbol: &Symbol) -> GatewayResult<Arc<Security>> {
        let _product: Product = self.catalog.product_for(symbol)?;

        let security = self.securities.get_or_create(symbol);
        let newly_requested = self.requested.write().insert(symbol.clone());

        if newly_requested && self.connection_state() == ConnectionState::Connected {
            // The live stream does not know the new symbol; cycle the
            // connection so the next subscribe covers the full set.
            debug!(%symbol, "cycling stream for new subscription");
            let handle = self.stream_slot.lock().take();
            if let Some(handle) = handle {
                handle.stop();
            }
            self.schedule_reconnect();
        }

        Ok(security)
    }

    /// Tear the adapter down: cancel all scheduled work, stop the
    /// stream and drop the catalog.
    pub fn shutdown(&self) {
        let canceled = self.scope.cancel();
        debug!(venue = %self.venue.name(), canceled, "market data gateway shutdown");

        let handle = self.stream_slot.lock().take();
        if let Some(handle) = handle {
            handle.stop();
        }
        self.securities.mark_all_offline();
        self.catalog.clear();
        *self.state.write() = ConnectionState::Disconnected;
    }

    async fn open_stream(self: Arc<Self>) -> GatewayResult<()> {
        let products = self.requested_products();
        let frames = self.venue.subscribe_frames(&products);

        let mut connection = StreamConnection::new(self.venue.stream_config());
        connection.connect().await?;

        *self.stream_slot.lock() = Some(connection.stop_handle());
        *self.state.write() = ConnectionState::Connected;

        let sink: Arc<dyn EventSink> = Arc::new(MarketDataSink {
            gateway: self.clone(),
        });
        tokio::spawn(async move {
            // Loop exit is reported through the sink's on_disconnect.
            let _ = connection.start(frames, sink).await;
        });

        Ok(())
    }

    fn requested_products(&self) -> Vec<Product> {
        let catalog = match self.catalog.get() {
            Some(c) => c,
            None => return Vec::new(),
        };
        self.requested
            .read()
            .iter()
            .filter_map(|symbol| catalog.get(symbol).cloned())
            .collect()
    }

    fn schedule_reconnect(self: Arc<Self>) {
        if self.scope.is_canceled() {
            return;
        }
        *self.state.write() = ConnectionState::ReconnectScheduled;

        let token = self.scope.child_token();
        let scope = self.scope.clone();
        self.scheduler.clone().schedule(Duration::ZERO, &scope, async move {
            self.reconnect_loop(token).await;
        });
    }

    /// Explicit retry loop: backoff, attempt, repeat. Retries forever
    /// by design; only scope cancellation stops it. Failures stay
    /// inside the loop so an outage shows up as offline securities,
    /// never as an error propagating upward.
    async fn reconnect_loop(self: Arc<Self>, token: CancellationToken) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let delay = self.backoff_delay(attempt);
            info!(
                venue = %self.venue.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );

            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if token.is_cancelled() {
                return;
            }

            match self.clone().connect().await {
                Ok(()) => {
                    info!(venue = %self.venue.name(), attempt, "reconnected");
                    return;
                }
                Err(e) => {
                    warn!(venue = %self.venue.name(), attempt, error = %e, "reconnect failed");
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);
        let jitter = rand::thread_rng().gen_range(0..=base.max(1) / 4);
        Duration::from_millis(delay + jitter)
    }

    pub(crate) fn handle_payload(&self, payload: &str) {
        match self.venue.decode_book_event(payload) {
            Ok(event) => self.apply_book_event(event),
            Err(e) => debug!(error = %e, "undecodable market payload"),
        }
    }

    pub(crate) fn apply_book_event(&self, event: BookEvent) {
        match event {
            BookEvent::TopOfBook { symbol, quote } => {
                if !self.is_requested(&symbol) {
                    return;
                }
                let security = self.securities.get_or_create(&symbol);
                publish_quote(&security, &quote);
            }
            BookEvent::Snapshot {
                symbol,
                bids,
                asks,
            } => {
                if !self.is_requested(&symbol) {
                    return;
                }
                let entry = self
                    .books
                    .entry(symbol.clone())
                    .or_insert_with(|| Mutex::new(OrderBook::new()));
                let top = {
                    let mut book = entry.lock();
                    book.apply_snapshot(bids, asks);
                    book.top()
                };
                drop(entry);
                let security = self.securities.get_or_create(&symbol);
                security_publish_top(&security, top);
            }
            BookEvent::Delta {
                symbol,
                side,
                op,
                price,
                qty,
            } => {
                if !self.is_requested(&symbol) {
                    return;
                }
                let entry = self
                    .books
                    .entry(symbol.clone())
                    .or_insert_with(|| Mutex::new(OrderBook::new()));
                let top = {
                    let mut book = entry.lock();
                    book.apply_delta(side, op, price, qty);
                    book.top()
                };
                drop(entry);
                let security = self.securities.get_or_create(&symbol);
                security_publish_top(&security, top);
            }
            BookEvent::Ignore => {}
        }
    }

    pub(crate) fn handle_disconnect(self: Arc<Self>) {
        warn!(venue = %self.venue.name(), "market data stream lost");
        self.securities.mark_all_offline();
        for entry in self.books.iter() {
            entry.value().lock().clear();
        }
        *self.stream_slot.lock() = None;
        self.schedule_reconnect();
    }

    fn is_requested(&self, symbol: &Symbol) -> bool {
        self.requested.read().contains(symbol)
    }
}

fn publish_quote(security: &Security, quote: &Quote) {
    let bid = (quote.bid_price.is_positive() && quote.bid_qty.is_positive())
        .then_some((quote.bid_price, quote.bid_qty));
    let ask = (quote.ask_price.is_positive() && quote.ask_qty.is_positive())
        .then_some((quote.ask_price, quote.ask_qty));
    security.publish(bid, ask);
}

fn security_publish_top(
    security: &Security,
    top: (Option<(Price, Qty)>, Option<(Price, Qty)>),
) {
    let (bid, ask) = top;
    security.publish(bid, ask);
}

struct MarketDataSink {
    gateway: Arc<MarketDataGateway>,
}

#[async_trait::async_trait]
impl EventSink for MarketDataSink {
    async fn on_message(&self, _received_at: chrono::DateTime<chrono::Utc>, payload: String) {
        self.gateway.handle_payload(&payload);
    }

    async fn on_disconnect(&self) {
        self.gateway.clone().handle_disconnect();
    }
}
