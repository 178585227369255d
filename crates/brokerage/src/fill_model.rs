//! Fill models for the simulated brokerage.
//!
//! A fill model turns a pending order and the current security snapshot into
//! a candidate [`OrderEvent`]. When the order's condition is not met the
//! candidate carries the order's own status and a zero fill quantity, which
//! the scanner reads as "keep open".
//!
//! Price rules (bar based when the snapshot has a bar, quote/last otherwise):
//! - Market: ask for buys, bid for sells, plus slippage
//! - Limit: buy fills once low <= limit at min(open, limit); sell mirrors
//! - Stop-market: buy triggers once high >= stop, fills at max(open, stop) plus slippage
//! - Stop-limit: stop must trigger first, then the limit rule applies. On the
//!   triggering bar the price follows the stop-market rule and must respect the limit
//! - Market-on-open / market-on-close: opening / closing cross price

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use simbroker_core::config::FillConfig;
use simbroker_core::{
    Order, OrderEvent, OrderKind, OrderStatus, Price, Quantity, SecuritySnapshot, SessionState,
    Symbol, QTY_EPSILON,
};

/// Per-kind pricing rules.
///
/// Implementations may be user supplied. Errors and panics raised here are
/// caught by the scanner and invalidate only the order being evaluated.
pub trait FillModel: Send + Sync {
    fn market_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent>;

    fn limit_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        limit_price: Price,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent>;

    fn stop_market_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        stop_price: Price,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent>;

    /// May arm the stop by setting `stop_triggered` on the order.
    fn stop_limit_fill(
        &self,
        security: &SecuritySnapshot,
        order: &mut Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent>;

    fn market_on_open_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent>;

    fn market_on_close_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent>;
}

/// Route an order to the pricing rule for its kind.
pub fn dispatch(
    model: &dyn FillModel,
    security: &SecuritySnapshot,
    order: &mut Order,
    now: DateTime<Utc>,
) -> Result<OrderEvent> {
    match order.kind {
        OrderKind::Market => model.market_fill(security, order, now),
        OrderKind::Limit { limit_price } => model.limit_fill(security, order, limit_price, now),
        OrderKind::StopMarket { stop_price } => {
            model.stop_market_fill(security, order, stop_price, now)
        }
        OrderKind::StopLimit { .. } => model.stop_limit_fill(security, order, now),
        OrderKind::MarketOnOpen => model.market_on_open_fill(security, order, now),
        OrderKind::MarketOnClose => model.market_on_close_fill(security, order, now),
    }
}

/// Volume already filled against a symbol's latest bar.
#[derive(Debug, Clone, Copy)]
struct BarUsage {
    bar_time: DateTime<Utc>,
    used: Quantity,
}

/// Fill model that fills the whole remaining quantity as soon as the order's
/// condition is met, optionally capped by bar volume participation.
///
/// The participation cap is shared by every order on a symbol and spent once
/// per bar, however many passes see that bar.
#[derive(Debug, Default)]
pub struct ImmediateFillModel {
    config: FillConfig,
    usage: Mutex<HashMap<Symbol, BarUsage>>,
}

impl ImmediateFillModel {
    /// Create a new fill model.
    pub fn new(config: FillConfig) -> Self {
        Self {
            config,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Quantity this pass may fill, signed like the order. Spends the
    /// bar's participation allowance.
    fn fill_quantity(&self, security: &SecuritySnapshot, order: &Order) -> Quantity {
        let remaining = order.remaining_quantity();
        let (Some(participation), Some(bar)) =
            (self.config.max_volume_participation, security.bar.as_ref())
        else {
            return remaining;
        };

        let mut usage = self.usage.lock();
        let entry = usage.entry(security.symbol.clone()).or_insert(BarUsage {
            bar_time: bar.time,
            used: 0.0,
        });
        if entry.bar_time != bar.time {
            *entry = BarUsage {
                bar_time: bar.time,
                used: 0.0,
            };
        }
        let cap = (bar.volume * participation - entry.used).max(0.0);
        let qty = remaining.abs().min(cap);
        if qty < QTY_EPSILON {
            return 0.0;
        }
        entry.used += qty;
        qty.copysign(remaining)
    }

    /// Build the fill event at `price`, or an unchanged event if nothing can fill.
    fn fill_at(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        now: DateTime<Utc>,
        price: Price,
    ) -> OrderEvent {
        let qty = self.fill_quantity(security, order);
        if qty.abs() < QTY_EPSILON {
            return OrderEvent::unchanged(order, now);
        }
        let status = if (order.remaining_quantity() - qty).abs() < QTY_EPSILON {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        OrderEvent::new(order, now, status).with_fill(price, qty)
    }

    /// Move a market-derived price against the order.
    fn slipped(&self, price: Price, is_buy: bool) -> Price {
        let slippage = self.config.slippage();
        if is_buy {
            price + slippage
        } else {
            price - slippage
        }
    }
}

/// (open, low, high) the order's side could have traded at this pass.
fn trading_range(security: &SecuritySnapshot, is_buy: bool) -> (Price, Price, Price) {
    match &security.bar {
        Some(bar) => (bar.open, bar.low, bar.high),
        None => {
            let px = if is_buy {
                security.ask_price()
            } else {
                security.bid_price()
            };
            (px, px, px)
        }
    }
}

/// Limit price reached? Returns the fill price, never worse than the limit.
fn limit_crossed(security: &SecuritySnapshot, is_buy: bool, limit: Price) -> Option<Price> {
    let (open, low, high) = trading_range(security, is_buy);
    if is_buy && low <= limit {
        Some(open.min(limit))
    } else if !is_buy && high >= limit {
        Some(open.max(limit))
    } else {
        None
    }
}

/// Price once the stop is reached; gaps through the stop fill at the open.
fn stop_fill_price(security: &SecuritySnapshot, is_buy: bool, stop: Price) -> Price {
    let (open, _, _) = trading_range(security, is_buy);
    if is_buy {
        open.max(stop)
    } else {
        open.min(stop)
    }
}

fn stop_reached(security: &SecuritySnapshot, is_buy: bool, stop: Price) -> bool {
    let (_, low, high) = trading_range(security, is_buy);
    if is_buy {
        high >= stop
    } else {
        low <= stop
    }
}

impl FillModel for ImmediateFillModel {
    fn market_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent> {
        if !security.has_price() {
            return Ok(OrderEvent::unchanged(order, now));
        }
        let is_buy = order.is_buy();
        let quote = if is_buy {
            security.ask_price()
        } else {
            security.bid_price()
        };
        Ok(self.fill_at(security, order, now, self.slipped(quote, is_buy)))
    }

    fn limit_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        limit_price: Price,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent> {
        match limit_crossed(security, order.is_buy(), limit_price) {
            Some(price) => Ok(self.fill_at(security, order, now, price)),
            None => Ok(OrderEvent::unchanged(order, now)),
        }
    }

    fn stop_market_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        stop_price: Price,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent> {
        let is_buy = order.is_buy();
        if !stop_reached(security, is_buy, stop_price) {
            return Ok(OrderEvent::unchanged(order, now));
        }
        let price = stop_fill_price(security, is_buy, stop_price);
        Ok(self.fill_at(security, order, now, self.slipped(price, is_buy)))
    }

    fn stop_limit_fill(
        &self,
        security: &SecuritySnapshot,
        order: &mut Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent> {
        let is_buy = order.is_buy();
        let (stop_price, limit_price, triggered) = match order.kind {
            OrderKind::StopLimit {
                stop_price,
                limit_price,
                stop_triggered,
            } => (stop_price, limit_price, stop_triggered),
            other => anyhow::bail!("stop-limit rule applied to a {other} order"),
        };

        if !triggered {
            if !stop_reached(security, is_buy, stop_price) {
                return Ok(OrderEvent::unchanged(order, now));
            }
            if let OrderKind::StopLimit { stop_triggered, .. } = &mut order.kind {
                *stop_triggered = true;
            }
            // Nothing before the stop counts on the triggering bar.
            let price = stop_fill_price(security, is_buy, stop_price);
            let within_limit = if is_buy {
                price <= limit_price
            } else {
                price >= limit_price
            };
            return if within_limit {
                Ok(self.fill_at(security, order, now, price))
            } else {
                Ok(OrderEvent::unchanged(order, now))
            };
        }

        match limit_crossed(security, is_buy, limit_price) {
            Some(price) => Ok(self.fill_at(security, order, now, price)),
            None => Ok(OrderEvent::unchanged(order, now)),
        }
    }

    fn market_on_open_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent> {
        if security.session != SessionState::Opening || !security.has_price() {
            return Ok(OrderEvent::unchanged(order, now));
        }
        let price = self.slipped(security.open(), order.is_buy());
        Ok(self.fill_at(security, order, now, price))
    }

    fn market_on_close_fill(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent> {
        if security.session != SessionState::Closing || !security.has_price() {
            return Ok(OrderEvent::unchanged(order, now));
        }
        let price = self.slipped(security.close(), order.is_buy());
        Ok(self.fill_at(security, order, now, price))
    }
}
