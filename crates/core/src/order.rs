//! Orders, their lifecycle states and the events that report them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Price, Quantity, Symbol, QTY_EPSILON};

/// Internal order identifier, unique for the lifetime of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order kind with its kind-specific price fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    /// Fill now at the prevailing price.
    Market,
    /// Fill at `limit_price` or better.
    Limit { limit_price: Price },
    /// Market order armed once price reaches `stop_price`.
    StopMarket { stop_price: Price },
    /// Limit order armed once price reaches `stop_price`.
    StopLimit {
        stop_price: Price,
        limit_price: Price,
        /// Set when the stop has been reached; the order then behaves as a limit.
        #[serde(default)]
        stop_triggered: bool,
    },
    /// Fill at the next session's opening cross.
    MarketOnOpen,
    /// Fill at the session's closing cross.
    MarketOnClose,
}

impl OrderKind {
    /// Short name used in logs and messages.
    pub fn name(&self) -> &'static str {
        match self {
            OrderKind::Market => "Market",
            OrderKind::Limit { .. } => "Limit",
            OrderKind::StopMarket { .. } => "StopMarket",
            OrderKind::StopLimit { .. } => "StopLimit",
            OrderKind::MarketOnOpen => "MarketOnOpen",
            OrderKind::MarketOnClose => "MarketOnClose",
        }
    }

    /// Only true at-market orders may fill on the step that created them.
    pub fn is_market(&self) -> bool {
        matches!(self, OrderKind::Market)
    }

    pub fn limit_price(&self) -> Option<Price> {
        match self {
            OrderKind::Limit { limit_price } | OrderKind::StopLimit { limit_price, .. } => {
                Some(*limit_price)
            }
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<Price> {
        match self {
            OrderKind::StopMarket { stop_price } | OrderKind::StopLimit { stop_price, .. } => {
                Some(*stop_price)
            }
            _ => None,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Order status.
///
/// ```text
/// New → Submitted ─┬→ PartiallyFilled ─┬→ Filled
///                  │        ↺          ├→ Canceled
///                  ├→ Filled           └→ Invalid
///                  ├→ Canceled
///                  └→ Invalid
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Invalid,
}

impl OrderStatus {
    /// Filled, Canceled and Invalid admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Invalid
        )
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Is `next` a legal successor of `self`?
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (New, Submitted) => true,
            (New | Submitted | PartiallyFilled, PartiallyFilled | Filled | Canceled | Invalid) => {
                true
            }
            (Submitted, Submitted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How long an order stays working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Working until filled or canceled.
    #[default]
    GoodTilCanceled,
    /// Expires once the UTC date moves past the creation date.
    Day,
    /// Expires once simulation time passes the given instant.
    GoodTilDate(DateTime<Utc>),
}

impl TimeInForce {
    /// Has an order created at `created` expired by `now`?
    pub fn is_expired(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            TimeInForce::GoodTilCanceled => false,
            TimeInForce::Day => now.date_naive() > created.date_naive(),
            TimeInForce::GoodTilDate(expiry) => now > *expiry,
        }
    }
}

/// Direction implied by the sign of the quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Buy,
    Sell,
    Hold,
}

/// A single trading instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    /// Signed quantity; the sign encodes buy/sell.
    pub quantity: Quantity,
    pub kind: OrderKind,
    /// Simulation time the order was created.
    pub time: DateTime<Utc>,
    pub status: OrderStatus,
    /// Signed quantity filled so far.
    pub filled_quantity: Quantity,
    pub time_in_force: TimeInForce,
    /// Free-form tag from the submitter.
    pub tag: String,
    /// Identifiers assigned by the brokerage.
    pub broker_ids: Vec<String>,
}

impl Order {
    /// New order of any kind.
    pub fn new(
        id: OrderId,
        symbol: impl Into<Symbol>,
        quantity: Quantity,
        kind: OrderKind,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            quantity,
            kind,
            time,
            status: OrderStatus::New,
            filled_quantity: 0.0,
            time_in_force: TimeInForce::default(),
            tag: String::new(),
            broker_ids: Vec::new(),
        }
    }

    pub fn market(id: u64, symbol: &str, quantity: Quantity, time: DateTime<Utc>) -> Self {
        Self::new(OrderId(id), symbol, quantity, OrderKind::Market, time)
    }

    pub fn limit(
        id: u64,
        symbol: &str,
        quantity: Quantity,
        limit_price: Price,
        time: DateTime<Utc>,
    ) -> Self {
        Self::new(OrderId(id), symbol, quantity, OrderKind::Limit { limit_price }, time)
    }

    pub fn stop_market(
        id: u64,
        symbol: &str,
        quantity: Quantity,
        stop_price: Price,
        time: DateTime<Utc>,
    ) -> Self {
        Self::new(OrderId(id), symbol, quantity, OrderKind::StopMarket { stop_price }, time)
    }

    pub fn stop_limit(
        id: u64,
        symbol: &str,
        quantity: Quantity,
        stop_price: Price,
        limit_price: Price,
        time: DateTime<Utc>,
    ) -> Self {
        let kind = OrderKind::StopLimit {
            stop_price,
            limit_price,
            stop_triggered: false,
        };
        Self::new(OrderId(id), symbol, quantity, kind, time)
    }

    pub fn market_on_open(id: u64, symbol: &str, quantity: Quantity, time: DateTime<Utc>) -> Self {
        Self::new(OrderId(id), symbol, quantity, OrderKind::MarketOnOpen, time)
    }

    pub fn market_on_close(id: u64, symbol: &str, quantity: Quantity, time: DateTime<Utc>) -> Self {
        Self::new(OrderId(id), symbol, quantity, OrderKind::MarketOnClose, time)
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn direction(&self) -> OrderDirection {
        if self.quantity > 0.0 {
            OrderDirection::Buy
        } else if self.quantity < 0.0 {
            OrderDirection::Sell
        } else {
            OrderDirection::Hold
        }
    }

    pub fn is_buy(&self) -> bool {
        self.direction() == OrderDirection::Buy
    }

    /// Signed quantity still to be filled.
    pub fn remaining_quantity(&self) -> Quantity {
        let remaining = self.quantity - self.filled_quantity;
        if remaining.abs() < QTY_EPSILON {
            0.0
        } else {
            remaining
        }
    }

    /// Reject orders the fill models cannot price.
    pub fn validate(&self) -> Result<()> {
        if !self.quantity.is_finite() || self.quantity.abs() < QTY_EPSILON {
            return Err(Error::order(format!(
                "order {} has invalid quantity {}",
                self.id, self.quantity
            )));
        }
        if self.symbol.is_empty() {
            return Err(Error::order(format!("order {} has no symbol", self.id)));
        }
        let prices = [self.kind.limit_price(), self.kind.stop_price()];
        if let Some(bad) = prices.into_iter().flatten().find(|p| !(p.is_finite() && *p > 0.0)) {
            return Err(Error::order(format!(
                "order {} has invalid {} price {}",
                self.id, self.kind, bad
            )));
        }
        Ok(())
    }

    /// Reject an update that is malformed or that the fill progress of
    /// `self` cannot absorb: a side change, or a size that leaves nothing
    /// to fill.
    pub fn validate_update(&self, update: &Order) -> Result<()> {
        update.validate()?;
        if update.quantity.signum() != self.quantity.signum() {
            return Err(Error::order(format!(
                "order {} update changes side from {} to {}",
                self.id, self.quantity, update.quantity
            )));
        }
        if update.quantity.abs() - self.filled_quantity.abs() < QTY_EPSILON {
            return Err(Error::order(format!(
                "order {} update quantity {} does not exceed filled quantity {}",
                self.id, update.quantity, self.filled_quantity
            )));
        }
        Ok(())
    }

    /// Append a broker identifier unless already present. Returns true when appended.
    pub fn add_broker_id(&mut self, broker_id: impl Into<String>) -> bool {
        let broker_id = broker_id.into();
        if self.broker_ids.contains(&broker_id) {
            return false;
        }
        self.broker_ids.push(broker_id);
        true
    }

    /// Replace the user-editable fields with those of `update`.
    ///
    /// Identity, creation time, fill progress and lifecycle status stay with
    /// `self`. A stop-limit whose stop already triggered keeps that state if
    /// the update is still a stop-limit.
    pub fn apply_update(&mut self, update: &Order) {
        let triggered = matches!(
            self.kind,
            OrderKind::StopLimit {
                stop_triggered: true,
                ..
            }
        );
        self.quantity = update.quantity;
        self.kind = update.kind;
        if let OrderKind::StopLimit { stop_triggered, .. } = &mut self.kind {
            *stop_triggered |= triggered;
        }
        self.time_in_force = update.time_in_force;
        self.tag = update.tag.clone();
        for broker_id in &update.broker_ids {
            self.add_broker_id(broker_id.clone());
        }
    }
}

/// Immutable notification of a status change or fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub symbol: Symbol,
    /// Simulation time of the event.
    pub time: DateTime<Utc>,
    pub status: OrderStatus,
    pub fill_price: Price,
    /// Signed fill quantity.
    pub fill_quantity: Quantity,
    pub fee: f64,
    pub message: Option<String>,
    /// Set on the acknowledgement of an accepted update.
    #[serde(default)]
    pub is_update: bool,
}

impl OrderEvent {
    /// Event for `order` with no fill and no fee.
    pub fn new(order: &Order, time: DateTime<Utc>, status: OrderStatus) -> Self {
        Self {
            order_id: order.id,
            symbol: order.symbol.clone(),
            time,
            status,
            fill_price: 0.0,
            fill_quantity: 0.0,
            fee: 0.0,
            message: None,
            is_update: false,
        }
    }

    /// "Nothing happened" event: the order's own status, nothing filled.
    pub fn unchanged(order: &Order, time: DateTime<Utc>) -> Self {
        Self::new(order, time, order.status)
    }

    pub fn with_fill(mut self, price: Price, quantity: Quantity) -> Self {
        self.fill_price = price;
        self.fill_quantity = quantity;
        self
    }

    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_fill(&self) -> bool {
        self.fill_quantity.abs() >= QTY_EPSILON
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} order {} {}: {} @ {} fee {}",
            self.time, self.order_id, self.symbol, self.status, self.fill_price, self.fee
        )?;
        if self.is_fill() {
            write!(f, " qty {}", self.fill_quantity)?;
        }
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}
