//! Risk control gatekeeper.
//!
//! Authorizes every order before submission and accounts for exactly
//! one confirmation per authorized order. A confirmation with an
//! unknown or already-used operation id indicates corrupted
//! accounting, which is a programming error: the process terminates
//! rather than trading on bad numbers.

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use xchg_core::{Currency, Fill, OrderSide, OrderStatus, Price, Qty, Symbol};

use crate::error::{RiskError, RiskResult};
use crate::scope::{Scope, ScopeLimits};

/// Token returned by a pre-trade check and presented on confirmation.
///
/// Guarantees every submitted order was checked and that a
/// confirmation cannot be mis-attributed to the wrong check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One authorized-but-unconfirmed order.
struct PendingOp {
    symbol: Symbol,
    side: OrderSide,
    currency: Currency,
    notional: Decimal,
}

/// Hierarchical risk gatekeeper: one global scope, optional per-symbol
/// scopes. Both must admit an order for it to pass.
pub struct RiskControl {
    global: Arc<Scope>,
    symbol_scopes: RwLock<HashMap<Symbol, Arc<Scope>>>,
    /// Serializes check-and-reserve across scopes so two concurrent
    /// checks cannot both pass on the last slot.
    gate: Mutex<()>,
    pending: Mutex<HashMap<OperationId, PendingOp>>,
}

impl RiskControl {
    pub fn new(global_limits: ScopeLimits) -> Self {
        Self {
            global: Arc::new(Scope::new("global", global_limits)),
            symbol_scopes: RwLock::new(HashMap::new()),
            gate: Mutex::new(()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a per-symbol scope. Replaces an existing one.
    pub fn add_symbol_scope(&self, symbol: Symbol, limits: ScopeLimits) {
        let scope = Arc::new(Scope::new(symbol.as_pair(), limits));
        self.symbol_scopes.write().insert(symbol, scope);
    }

    pub fn global_scope(&self) -> &Arc<Scope> {
        &self.global
    }

    pub fn symbol_scope(&self, symbol: &Symbol) -> Option<Arc<Scope>> {
        self.symbol_scopes.read().get(symbol).cloned()
    }

    /// Authorize one order.
    ///
    /// `security_online` is the current online flag of the symbol's
    /// security; orders against a dark book are parameter errors, not
    /// limit breaches. On success both the symbol scope (when
    /// configured) and the global scope have counted the order and
    /// reserved its notional, and the returned id must be confirmed
    /// exactly once.
    pub fn check_new_order(
        &self,
        symbol: &Symbol,
        security_online: bool,
        currency: &Currency,
        qty: Qty,
        price: Price,
        side: OrderSide,
    ) -> RiskResult<OperationId> {
        if !qty.is_positive() {
            return Err(RiskError::WrongOrderParameter(format!(
                "qty must be positive, got {qty}"
            )));
        }
        if !price.is_positive() {
            return Err(RiskError::WrongOrderParameter(format!(
                "price must be positive, got {price}"
            )));
        }
        if !security_online {
            return Err(RiskError::WrongOrderParameter(format!(
                "security {symbol} is offline"
            )));
        }

        let notional = qty.notional(price);
        let symbol_scope = self.symbol_scope(symbol);

        let _gate = self.gate.lock();

        if let Some(scope) = &symbol_scope {
            scope.check(notional)?;
        }
        self.global.check(notional)?;

        if let Some(scope) = &symbol_scope {
            scope.reserve(notional);
        }
        self.global.reserve(notional);

        let op = OperationId::new();
        self.pending.lock().insert(
            op,
            PendingOp {
                symbol: symbol.clone(),
                side,
                currency: currency.clone(),
                notional,
            },
        );

        debug!(%op, %symbol, %side, %qty, %price, "order authorized");
        Ok(op)
    }

    /// Confirm a checked buy order. Must be called exactly once per
    /// operation id; panics on an unknown or repeated id.
    pub fn confirm_buy_order(
        &self,
        op: OperationId,
        status: OrderStatus,
        trade: Option<&Fill>,
        realized_pnl: Option<Decimal>,
    ) {
        self.confirm(op, OrderSide::Buy, status, trade, realized_pnl);
    }

    /// Confirm a checked sell order. Must be called exactly once per
    /// operation id; panics on an unknown or repeated id.
    pub fn confirm_sell_order(
        &self,
        op: OperationId,
        status: OrderStatus,
        trade: Option<&Fill>,
        realized_pnl: Option<Decimal>,
    ) {
        self.confirm(op, OrderSide::Sell, status, trade, realized_pnl);
    }

    fn confirm(
        &self,
        op: OperationId,
        side: OrderSide,
        status: OrderStatus,
        trade: Option<&Fill>,
        realized_pnl: Option<Decimal>,
    ) {
        let pending = match self.pending.lock().remove(&op) {
            Some(p) => p,
            None => panic!(
                "risk confirmation for unknown or already-confirmed operation {op}; \
                 accounting is corrupted"
            ),
        };
        if pending.side != side {
            panic!(
                "risk confirmation side mismatch for operation {op}: \
                 checked {} but confirmed {side}",
                pending.side
            );
        }

        if let Some(scope) = self.symbol_scope(&pending.symbol) {
            scope.settle(pending.notional, realized_pnl);
        }
        self.global.settle(pending.notional, realized_pnl);

        if status == OrderStatus::Rejected {
            warn!(%op, symbol = %pending.symbol, "confirmed rejected order");
        }
        debug!(
            %op,
            symbol = %pending.symbol,
            currency = %pending.currency,
            %status,
            filled = %trade.map(|t| t.qty.inner()).unwrap_or_default(),
            "order confirmed"
        );
    }

    /// Operations checked but not yet confirmed.
    pub fn pending_operations(&self) -> usize {
        self.pending.lock().len()
    }

    /// Periodic PnL check across all scopes. Returns the global PnL;
    /// the first scope below its floor raises the error.
    pub fn check_total_pnl(&self) -> RiskResult<Decimal> {
        for scope in self.symbol_scopes.read().values() {
            scope.check_pnl()?;
        }
        let pnl = self.global.check_pnl()?;
        info!(%pnl, "periodic pnl check passed");
        Ok(pnl)
    }

    /// Periodic win-ratio check across all scopes. Returns the global
    /// ratio once enough trades exist.
    pub fn check_total_win_ratio(&self) -> RiskResult<Option<Decimal>> {
        for scope in self.symbol_scopes.read().values() {
            scope.check_win_ratio()?;
        }
        self.global.check_win_ratio()
    }
}
