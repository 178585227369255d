//! Account state and in-memory portfolio accounting.
//!
//! The portfolio subscribes to the order event stream and applies each fill
//! to cash and holdings. Realized P&L is booked when a fill reduces or flips
//! a position.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use simbroker_core::config::AccountConfig;
use simbroker_core::{Cash, Holding, OrderEvent, Price, Quantity, Symbol, QTY_EPSILON};
use tracing::debug;

use crate::events::OrderEventHandler;

/// Read access to the account, as the buying-power model sees it.
pub trait AccountState: Send + Sync {
    /// Cash in the account currency.
    fn cash(&self) -> f64;

    fn cash_balances(&self) -> Vec<Cash>;

    fn holdings(&self) -> Vec<Holding>;

    fn holding(&self, symbol: &str) -> Option<Holding>;

    /// Cash plus the marked value of every holding.
    fn total_portfolio_value(&self) -> f64;
}

/// An open position.
#[derive(Debug, Clone, Default)]
struct Position {
    /// Signed size.
    quantity: Quantity,
    /// Average entry price.
    average_price: Price,
    /// Latest mark.
    market_price: Price,
}

impl Position {
    fn to_holding(&self, symbol: &str) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            quantity: self.quantity,
            average_price: self.average_price,
            market_price: self.market_price,
        }
    }
}

/// Realized portion of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    /// Time of the reducing fill.
    pub exit_time: DateTime<Utc>,
    /// Signed size of the position portion that was closed.
    pub quantity: Quantity,
    pub entry_price: Price,
    pub exit_price: Price,
    /// Realized P&L before fees.
    pub pnl: f64,
}

#[derive(Debug)]
struct PortfolioState {
    cash: f64,
    positions: BTreeMap<Symbol, Position>,
    trades: Vec<ClosedTrade>,
    total_pnl: f64,
    total_fees: f64,
    wins: u32,
    losses: u32,
}

/// Portfolio tracker driven by order fill events.
#[derive(Debug)]
pub struct Portfolio {
    currency: String,
    state: Mutex<PortfolioState>,
}

impl Portfolio {
    /// Create a portfolio holding only cash.
    pub fn new(currency: impl Into<String>, cash: f64) -> Self {
        Self {
            currency: currency.into(),
            state: Mutex::new(PortfolioState {
                cash,
                positions: BTreeMap::new(),
                trades: Vec::new(),
                total_pnl: 0.0,
                total_fees: 0.0,
                wins: 0,
                losses: 0,
            }),
        }
    }

    pub fn from_config(config: &AccountConfig) -> Self {
        Self::new(config.currency.clone(), config.initial_cash)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Total realized P&L before fees.
    pub fn realized_pnl(&self) -> f64 {
        self.state.lock().total_pnl
    }

    pub fn total_fees(&self) -> f64 {
        self.state.lock().total_fees
    }

    /// Closed trades, oldest first.
    pub fn trades(&self) -> Vec<ClosedTrade> {
        self.state.lock().trades.clone()
    }

    /// (wins, losses) over closed trades.
    pub fn win_loss(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.wins, state.losses)
    }

    /// Mark an open position to a new price. Unknown symbols are ignored.
    pub fn mark_to_market(&self, symbol: &str, price: Price) {
        if let Some(position) = self.state.lock().positions.get_mut(symbol) {
            position.market_price = price;
        }
    }

    /// Apply one fill to cash and holdings.
    pub fn apply_fill(&self, event: &OrderEvent) {
        if !event.is_fill() {
            return;
        }
        let mut state = self.state.lock();
        let qty = event.fill_quantity;
        let price = event.fill_price;

        state.cash -= qty * price + event.fee;
        state.total_fees += event.fee;

        let position = state.positions.entry(event.symbol.clone()).or_default();
        position.market_price = price;

        let mut closed = None;
        if position.quantity.abs() < QTY_EPSILON || position.quantity.signum() == qty.signum() {
            let size = position.quantity.abs() + qty.abs();
            position.average_price =
                (position.average_price * position.quantity.abs() + price * qty.abs()) / size;
            position.quantity += qty;
        } else {
            let closing = qty.abs().min(position.quantity.abs()).copysign(position.quantity);
            let pnl = (price - position.average_price) * closing;
            closed = Some(ClosedTrade {
                symbol: event.symbol.clone(),
                exit_time: event.time,
                quantity: closing,
                entry_price: position.average_price,
                exit_price: price,
                pnl,
            });
            let before = position.quantity;
            position.quantity += qty;
            if position.quantity.abs() >= QTY_EPSILON && position.quantity.signum() != before.signum() {
                // Flipped through zero: the remainder opens at the fill price.
                position.average_price = price;
            }
        }

        if position.quantity.abs() < QTY_EPSILON {
            state.positions.remove(&event.symbol);
        }

        if let Some(trade) = closed {
            state.total_pnl += trade.pnl;
            if trade.pnl > 0.0 {
                state.wins += 1;
            } else {
                state.losses += 1;
            }
            debug!(symbol = %trade.symbol, pnl = trade.pnl, "position reduced");
            state.trades.push(trade);
        }
    }
}

impl AccountState for Portfolio {
    fn cash(&self) -> f64 {
        self.state.lock().cash
    }

    fn cash_balances(&self) -> Vec<Cash> {
        vec![Cash {
            currency: self.currency.clone(),
            amount: self.cash(),
        }]
    }

    fn holdings(&self) -> Vec<Holding> {
        self.state
            .lock()
            .positions
            .iter()
            .map(|(symbol, p)| p.to_holding(symbol))
            .collect()
    }

    fn holding(&self, symbol: &str) -> Option<Holding> {
        self.state
            .lock()
            .positions
            .get(symbol)
            .map(|p| p.to_holding(symbol))
    }

    fn total_portfolio_value(&self) -> f64 {
        let state = self.state.lock();
        let positions: f64 = state
            .positions
            .values()
            .map(|p| p.quantity * p.market_price)
            .sum();
        state.cash + positions
    }
}

impl OrderEventHandler for Portfolio {
    fn on_order_event(&self, event: &OrderEvent) {
        self.apply_fill(event);
    }
}
