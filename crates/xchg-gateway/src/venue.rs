//! The per-venue capability set.
//!
//! One `Venue` implementation bundles everything exchange-specific:
//! which signer and error classifier to use, how to load the product
//! catalog, how to build subscribe frames, and how to encode/decode
//! orders and market data. Core gateway logic depends only on this
//! trait, never on a concrete venue type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use xchg_core::{
    ClientOrderId, Currency, OrderSide, OrderTransactionContext, OrderUpdate, Price, Product, Qty,
    Quote, Symbol, TimeInForce,
};
use xchg_rest::{
    AuthProvider, Credentials, ErrorClassifier, RestRequest, RestResponse, SessionClient,
};
use xchg_stream::StreamConfig;

use crate::book::{BookSideKind, DeltaOp};
use crate::error::{GatewayError, GatewayResult};

/// The venue's tradable-product catalog, resolved once per connect.
#[derive(Debug, Default)]
pub struct Catalog {
    products: HashMap<Symbol, Product>,
}

impl Catalog {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Product> {
        self.products.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.products.keys()
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Adapter-scoped catalog slot.
///
/// Populated at connect time, replaced wholesale on reconnect, dropped
/// at adapter teardown. Material rule changes between loads are logged
/// since resting orders may sit on stale assumptions.
#[derive(Debug, Default, Clone)]
pub struct CatalogCell {
    inner: Arc<RwLock<Option<Arc<Catalog>>>>,
}

impl CatalogCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set(&self, catalog: Arc<Catalog>) {
        let mut slot = self.inner.write();
        if let Some(old) = slot.as_ref() {
            for product in catalog.products() {
                if let Some(previous) = old.get(&product.symbol) {
                    if previous.has_material_change(product) {
                        warn!(symbol = %product.symbol, "trading rules changed on reload");
                    }
                }
            }
        }
        *slot = Some(catalog);
    }

    pub fn get(&self) -> Option<Arc<Catalog>> {
        self.inner.read().clone()
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Product for a symbol, or the typed business rejection.
    pub fn product_for(&self, symbol: &Symbol) -> GatewayResult<Product> {
        let catalog = self.get().ok_or(GatewayError::NotConnected)?;
        catalog
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::SymbolNotSupported(symbol.to_string()))
    }
}

/// Decoded market-data event.
#[derive(Debug, Clone)]
pub enum BookEvent {
    /// Direct top-of-book push.
    TopOfBook { symbol: Symbol, quote: Quote },
    /// Full book snapshot; replaces both sides.
    Snapshot {
        symbol: Symbol,
        bids: Vec<(Price, Qty)>,
        asks: Vec<(Price, Qty)>,
    },
    /// Incremental change to one side.
    Delta {
        symbol: Symbol,
        side: BookSideKind,
        op: DeltaOp,
        price: Price,
        qty: Qty,
    },
    /// Not a book message (ack, heartbeat); dropped by the gateway.
    Ignore,
}

/// Decoded account-channel event.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    /// Order status change. The timestamp is venue server time; the
    /// gateway translates it with the measured clock offset.
    Order(OrderUpdate),
    /// Balance change for one currency.
    Balance {
        currency: Currency,
        available: Decimal,
        locked: Decimal,
    },
    /// Not an account message; dropped.
    Ignore,
}

/// Order parameters for submission.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub client_id: ClientOrderId,
    pub symbol: Symbol,
    /// Funding currency the order settles against.
    pub currency: Currency,
    pub qty: Qty,
    pub price: Price,
    pub side: OrderSide,
    pub tif: TimeInForce,
}

impl NewOrder {
    pub fn new(
        symbol: Symbol,
        currency: Currency,
        qty: Qty,
        price: Price,
        side: OrderSide,
        tif: TimeInForce,
    ) -> Self {
        Self {
            client_id: ClientOrderId::new(),
            symbol,
            currency,
            qty,
            price,
            side,
            tif,
        }
    }
}

/// Everything exchange-specific, as one capability set.
#[async_trait]
pub trait Venue: Send + Sync {
    fn name(&self) -> &str;

    /// Error classifier consumed by the session layer.
    fn classifier(&self) -> Arc<dyn ErrorClassifier>;

    /// Auth provider for signed requests; `None` for public-only use.
    fn auth_provider(&self, credentials: Credentials) -> Option<Arc<dyn AuthProvider>>;

    /// Resolve the product catalog. Called once per connect attempt;
    /// failure fails the attempt.
    async fn load_catalog(&self, session: &SessionClient) -> GatewayResult<Catalog>;

    /// Market-data stream endpoint.
    fn stream_config(&self) -> StreamConfig;

    /// Account/order stream endpoint. `None` means reconciliation
    /// runs purely over polling.
    fn account_stream_config(&self) -> Option<StreamConfig> {
        None
    }

    /// Subscribe frames for the given products.
    fn subscribe_frames(&self, products: &[Product]) -> Vec<String>;

    /// Decode one market-data payload.
    fn decode_book_event(&self, payload: &str) -> GatewayResult<BookEvent>;

    /// Decode one account payload.
    fn decode_account_event(&self, payload: &str) -> GatewayResult<AccountEvent>;

    /// Whether the venue natively supports this time-in-force.
    fn supports_time_in_force(&self, tif: TimeInForce) -> bool;

    fn build_submit_request(&self, order: &NewOrder, product: &Product)
        -> GatewayResult<RestRequest>;

    /// Extract the venue order id from a submit response.
    fn parse_submit_response(&self, response: &RestResponse) -> GatewayResult<String>;

    fn build_cancel_request(&self, ctx: &OrderTransactionContext) -> GatewayResult<RestRequest>;

    fn build_order_status_request(
        &self,
        ctx: &OrderTransactionContext,
    ) -> GatewayResult<RestRequest>;

    /// Parse a polled order-status response into the normalized form.
    fn parse_order_status(&self, response: &RestResponse) -> GatewayResult<OrderUpdate>;

    fn build_balances_request(&self) -> GatewayResult<RestRequest>;

    fn parse_balances(
        &self,
        response: &RestResponse,
    ) -> GatewayResult<Vec<(Currency, Decimal, Decimal)>>;

    /// Server-time request for clock sync; `None` skips syncing.
    fn build_server_time_request(&self) -> Option<RestRequest> {
        None
    }

    fn parse_server_time(&self, _response: &RestResponse) -> GatewayResult<DateTime<Utc>> {
        Err(GatewayError::Decode(
            "venue does not expose server time".to_string(),
        ))
    }
}
