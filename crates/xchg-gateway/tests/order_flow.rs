//! Order gateway integration tests.
//!
//! Runs a minimal local HTTP venue and drives the full flow: bounds
//! pre-check, risk authorization, submit, poll-based reconciliation
//! into terminal callbacks, idempotent cancel, and IOC emulation.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use xchg_core::{
    Currency, OrderSide, OrderStatus, OrderTransactionContext, OrderUpdate, Price, Product, Qty,
    Symbol, TimeInForce,
};
use xchg_gateway::{
    AccountEvent, BookEvent, Catalog, CatalogCell, GatewayError, GatewayResult, NewOrder,
    OrderGateway, OrderGatewayConfig, Venue,
};
use xchg_rest::{
    AuthProvider, Credentials, ErrorClassifier, FloodControl, Outcome, RestRequest, RestResponse,
    SessionClient, SessionConfig,
};
use xchg_risk::{RiskControl, ScopeLimits};
use xchg_stream::{Scheduler, StreamConfig};

// ============================================================================
// Mock venue HTTP server
// ============================================================================

#[derive(Default)]
struct VenueState {
    /// Orders by id: (status string, filled qty).
    orders: Vec<(String, String, Decimal)>,
    /// Scripted status sequence served by /order/status, per call.
    status_script: Vec<(String, Decimal)>,
    status_calls: usize,
    submit_calls: usize,
    cancel_calls: usize,
    /// When set, submissions are refused with this vendor code.
    reject_submit_with: Option<String>,
}

struct MockVenueServer {
    addr: SocketAddr,
    state: Arc<Mutex<VenueState>>,
}

impl MockVenueServer {
    async fn start(state: VenueState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(state));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Some((method, path, _body)) = read_request(&mut stream).await {
                        let (status, body) = respond(&shared, &method, &path);
                        let response = format!(
                            "HTTP/1.1 {status} x\r\ncontent-type: application/json\r\n\
                             content-length: {}\r\nconnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                });
            }
        });

        Self { addr, state }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn submit_calls(&self) -> usize {
        self.state.lock().submit_calls
    }

    fn cancel_calls(&self) -> usize {
        self.state.lock().cancel_calls
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<(String, String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let content_length: usize = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some((method, path, String::from_utf8_lossy(&body).to_string()))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn respond(state: &Arc<Mutex<VenueState>>, method: &str, path: &str) -> (u16, String) {
    let mut state = state.lock();

    if method == "POST" && path.starts_with("/order") {
        state.submit_calls += 1;
        if let Some(code) = &state.reject_submit_with {
            return (400, format!(r#"{{"code":"{code}"}}"#));
        }
        let id = format!("{}", 77 + state.orders.len());
        state.orders.push((id.clone(), "NEW".to_string(), dec!(0)));
        return (200, format!(r#"{{"orderId":"{id}"}}"#));
    }

    if method == "DELETE" && path.starts_with("/order") {
        state.cancel_calls += 1;
        match state.orders.iter_mut().find(|(_, status, _)| status == "NEW") {
            Some(order) => {
                order.1 = "CANCELED".to_string();
                return (200, r#"{"result":"ok"}"#.to_string());
            }
            None => return (404, r#"{"code":"ORDER_NOT_FOUND"}"#.to_string()),
        }
    }

    if method == "GET" && path.starts_with("/order/status") {
        let call = state.status_calls;
        state.status_calls += 1;
        let scripted = state
            .status_script
            .get(call.min(state.status_script.len().saturating_sub(1)))
            .cloned();
        if let Some((status, filled)) = scripted {
            let id = state
                .orders
                .first()
                .map(|(id, _, _)| id.clone())
                .unwrap_or_else(|| "77".to_string());
            return (
                200,
                format!(r#"{{"orderId":"{id}","status":"{status}","filled":"{filled}"}}"#),
            );
        }
        return (404, r#"{"code":"ORDER_NOT_FOUND"}"#.to_string());
    }

    if method == "GET" && path.starts_with("/balances") {
        return (
            200,
            r#"{"balances":[{"asset":"USDT","free":"1000","locked":"50"}]}"#.to_string(),
        );
    }

    (404, r#"{"code":"NO_SUCH_ROUTE"}"#.to_string())
}

// ============================================================================
// Test venue plugin
// ============================================================================

struct TestClassifier;

impl ErrorClassifier for TestClassifier {
    fn classify(&self, status: u16, body: &str, _attempt: u32) -> Outcome {
        match status {
            200..=299 => Outcome::Ok,
            _ if body.contains("ORDER_NOT_FOUND") => Outcome::OrderUnknown,
            _ if body.contains("INSUFFICIENT_FUNDS") => Outcome::InsufficientFunds,
            408 | 429 => Outcome::RateLimited,
            500..=599 => Outcome::Transient,
            _ => Outcome::Fatal(body.to_string()),
        }
    }
}

struct TestVenue;

#[async_trait]
impl Venue for TestVenue {
    fn name(&self) -> &str {
        "testvenue"
    }

    fn classifier(&self) -> Arc<dyn ErrorClassifier> {
        Arc::new(TestClassifier)
    }

    fn auth_provider(&self, _credentials: Credentials) -> Option<Arc<dyn AuthProvider>> {
        None
    }

    async fn load_catalog(&self, _session: &SessionClient) -> GatewayResult<Catalog> {
        Ok(Catalog::new(vec![product()]))
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig::default()
    }

    fn subscribe_frames(&self, _products: &[Product]) -> Vec<String> {
        Vec::new()
    }

    fn decode_book_event(&self, _payload: &str) -> GatewayResult<BookEvent> {
        Ok(BookEvent::Ignore)
    }

    fn decode_account_event(&self, _payload: &str) -> GatewayResult<AccountEvent> {
        Ok(AccountEvent::Ignore)
    }

    fn supports_time_in_force(&self, tif: TimeInForce) -> bool {
        // No native IOC: the gateway must emulate it.
        tif == TimeInForce::GoodTilCanceled
    }

    fn build_submit_request(
        &self,
        order: &NewOrder,
        product: &Product,
    ) -> GatewayResult<RestRequest> {
        Ok(RestRequest::post("/order")
            .with_body(serde_json::json!({
                "symbol": product.venue_symbol,
                "side": order.side.to_string(),
                "qty": order.qty.to_string(),
                "price": order.price.to_string(),
                "cloid": order.client_id.as_str(),
            }))
            .with_priority(xchg_rest::Priority::Order))
    }

    fn parse_submit_response(&self, response: &RestResponse) -> GatewayResult<String> {
        let value: serde_json::Value = response
            .json()
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        value
            .get("orderId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| GatewayError::Decode("missing orderId".to_string()))
    }

    fn build_cancel_request(&self, ctx: &OrderTransactionContext) -> GatewayResult<RestRequest> {
        Ok(RestRequest::delete("/order")
            .with_query("orderId", ctx.venue_order_id.clone())
            .with_priority(xchg_rest::Priority::Order))
    }

    fn build_order_status_request(
        &self,
        ctx: &OrderTransactionContext,
    ) -> GatewayResult<RestRequest> {
        Ok(RestRequest::get("/order/status").with_query("orderId", ctx.venue_order_id.clone()))
    }

    fn parse_order_status(&self, response: &RestResponse) -> GatewayResult<OrderUpdate> {
        let value: serde_json::Value = response
            .json()
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let status = match value.get("status").and_then(|v| v.as_str()) {
            Some("NEW") => OrderStatus::Opened,
            Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
            Some("FILLED") => OrderStatus::Filled,
            Some("CANCELED") => OrderStatus::Canceled,
            Some("REJECTED") => OrderStatus::Rejected,
            other => {
                return Err(GatewayError::Decode(format!("bad status: {other:?}")));
            }
        };
        let filled: Decimal = value
            .get("filled")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(Decimal::ZERO);
        Ok(OrderUpdate {
            venue_order_id: value
                .get("orderId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status,
            filled_qty: Qty::new(filled),
            avg_price: None,
            timestamp: chrono::Utc::now(),
        })
    }

    fn build_balances_request(&self) -> GatewayResult<RestRequest> {
        Ok(RestRequest::get("/balances"))
    }

    fn parse_balances(
        &self,
        response: &RestResponse,
    ) -> GatewayResult<Vec<(Currency, Decimal, Decimal)>> {
        let value: serde_json::Value = response
            .json()
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let mut out = Vec::new();
        if let Some(entries) = value.get("balances").and_then(|b| b.as_array()) {
            for entry in entries {
                let asset = entry.get("asset").and_then(|a| a.as_str()).unwrap_or("");
                let parse = |key: &str| {
                    entry
                        .get(key)
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(Decimal::ZERO)
                };
                out.push((Currency::new(asset), parse("free"), parse("locked")));
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn symbol() -> Symbol {
    Symbol::new(Currency::new("BTC"), Currency::new("USDT"))
}

fn product() -> Product {
    Product {
        symbol: symbol(),
        venue_symbol: "BTCUSDT".to_string(),
        min_qty: Qty::new(dec!(0.001)),
        max_qty: Qty::new(dec!(1000)),
        qty_step: Qty::new(dec!(0.001)),
        tick_size: Price::new(dec!(0.01)),
        min_notional: dec!(10),
        is_active: true,
    }
}

fn new_order(tif: TimeInForce) -> NewOrder {
    NewOrder::new(
        symbol(),
        Currency::new("USDT"),
        Qty::new(dec!(0.01)),
        Price::new(dec!(50000)),
        OrderSide::Buy,
        tif,
    )
}

async fn gateway_for(
    server: &MockVenueServer,
    risk: Option<Arc<RiskControl>>,
) -> (
    Arc<OrderGateway>,
    tokio::sync::mpsc::UnboundedReceiver<xchg_gateway::OrderReport>,
) {
    let session = Arc::new(
        SessionClient::new(
            SessionConfig {
                base_url: server.base_url(),
                timeout_ms: 2_000,
                max_attempts: 3,
                backoff_base_ms: 20,
                backoff_max_ms: 100,
            },
            Arc::new(FloodControl::disabled()),
            Arc::new(TestClassifier),
            None,
        )
        .unwrap(),
    );

    let catalog = CatalogCell::new();
    catalog.set(Arc::new(Catalog::new(vec![product()])));

    OrderGateway::new(
        Arc::new(TestVenue),
        session,
        catalog,
        risk,
        Scheduler::new(),
        OrderGatewayConfig {
            poll_frequency_ms: 50,
            balance_poll_frequency_ms: 100,
            ..Default::default()
        },
    )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_submit_reconcile_and_confirm() {
    let server = MockVenueServer::start(VenueState {
        status_script: vec![
            ("PARTIALLY_FILLED".to_string(), dec!(0.004)),
            ("FILLED".to_string(), dec!(0.01)),
        ],
        ..Default::default()
    })
    .await;

    let risk = Arc::new(RiskControl::new(ScopeLimits::default()));
    let (gateway, mut reports) = gateway_for(&server, Some(risk.clone())).await;
    gateway.clone().start().await.unwrap();

    let order = new_order(TimeInForce::GoodTilCanceled);
    let op = risk
        .check_new_order(
            &order.symbol,
            true,
            &order.currency,
            order.qty,
            order.price,
            order.side,
        )
        .unwrap();

    let ctx = gateway.submit(order, Some(op)).await.unwrap();
    assert_eq!(ctx.venue_order_id, "77");

    let mut statuses = Vec::new();
    while statuses.last() != Some(&OrderStatus::Filled) {
        let report = timeout(Duration::from_secs(5), reports.recv())
            .await
            .expect("report within timeout")
            .expect("reports channel open");
        statuses.push(report.status);
    }

    assert_eq!(
        statuses,
        vec![
            OrderStatus::Opened,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled
        ]
    );

    // Terminal state confirmed the risk operation exactly once.
    assert_eq!(risk.pending_operations(), 0);

    // Balance poll populated the cache from the venue snapshot.
    timeout(Duration::from_secs(5), async {
        loop {
            if gateway.balances().get(&Currency::new("USDT")).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("balances within timeout");

    let usdt = gateway.balances().get(&Currency::new("USDT")).unwrap();
    assert_eq!(usdt.available, dec!(1000));
    assert_eq!(usdt.locked, dec!(50));

    gateway.release(&ctx).unwrap();
    gateway.shutdown();
}

#[tokio::test]
async fn test_double_cancel_is_idempotent() {
    let server = MockVenueServer::start(VenueState::default()).await;
    let (gateway, _reports) = gateway_for(&server, None).await;

    let ctx = gateway
        .submit(new_order(TimeInForce::GoodTilCanceled), None)
        .await
        .unwrap();

    // First cancel lands on a live order.
    gateway.cancel(&ctx).await.unwrap();

    // Second cancel while the first is still unreconciled: the
    // in-flight guard answers it locally as a no-op.
    let second = gateway.cancel(&ctx).await;
    assert!(second.is_ok(), "second cancel must be a no-op: {second:?}");

    assert_eq!(server.cancel_calls(), 1, "in-flight guard stops the resend");
    gateway.shutdown();
}

#[tokio::test]
async fn test_cancel_after_terminal_hits_order_unknown() {
    let server = MockVenueServer::start(VenueState {
        // Venue reports the order gone as soon as status is polled.
        status_script: vec![("CANCELED".to_string(), dec!(0))],
        ..Default::default()
    })
    .await;
    let (gateway, mut reports) = gateway_for(&server, None).await;
    gateway.clone().start().await.unwrap();

    let ctx = gateway
        .submit(new_order(TimeInForce::GoodTilCanceled), None)
        .await
        .unwrap();

    // Wait until reconciliation marks it canceled.
    loop {
        let report = timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        if report.status == OrderStatus::Canceled {
            break;
        }
    }

    // Cancel of a terminal order never reaches the wire and is Ok.
    assert!(gateway.cancel(&ctx).await.is_ok());
    assert_eq!(server.cancel_calls(), 0);
    gateway.shutdown();
}

#[tokio::test]
async fn test_ioc_emulated_by_submit_then_cancel() {
    let server = MockVenueServer::start(VenueState::default()).await;
    let (gateway, _reports) = gateway_for(&server, None).await;

    let ctx = gateway
        .submit(new_order(TimeInForce::ImmediateOrCancel), None)
        .await
        .unwrap();

    assert_eq!(server.submit_calls(), 1);
    assert_eq!(
        server.cancel_calls(),
        1,
        "IOC without native support cancels the remainder immediately"
    );
    assert!(!ctx.venue_order_id.is_empty());
    gateway.shutdown();
}

#[tokio::test]
async fn test_insufficient_funds_surfaces_without_retry() {
    let server = MockVenueServer::start(VenueState {
        reject_submit_with: Some("INSUFFICIENT_FUNDS".to_string()),
        ..Default::default()
    })
    .await;
    let (gateway, _reports) = gateway_for(&server, None).await;

    let result = gateway
        .submit(new_order(TimeInForce::GoodTilCanceled), None)
        .await;

    assert!(matches!(result, Err(GatewayError::InsufficientFunds)));
    assert_eq!(server.submit_calls(), 1, "business rejections never retry");
    gateway.shutdown();
}

#[tokio::test]
async fn test_precheck_rejects_undersized_order_before_wire() {
    let server = MockVenueServer::start(VenueState::default()).await;
    let (gateway, _reports) = gateway_for(&server, None).await;

    let mut order = new_order(TimeInForce::GoodTilCanceled);
    order.qty = Qty::new(dec!(0.0005));

    let result = gateway.submit(order, None).await;
    match result {
        Err(GatewayError::WrongOrderParameter(xchg_core::BoundViolation::QtyBelowMin { min })) => {
            assert_eq!(min, Qty::new(dec!(0.001)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(server.submit_calls(), 0, "rejected before reaching the venue");
    gateway.shutdown();
}
