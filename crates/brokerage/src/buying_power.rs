//! Buying power checks.
//!
//! Validates that an order does not exceed the capital available to open
//! new exposure. The part of an order that reduces an existing position
//! needs no capital. The estimated fee of the fill counts against the
//! capital needed to open exposure.

use anyhow::Result;
use simbroker_core::{Order, Price, SecuritySnapshot};

use crate::portfolio::AccountState;

/// Outcome of a buying power check.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyingPowerCheck {
    pub is_sufficient: bool,
    /// Absolute notional of the order's unfilled quantity.
    pub order_value: f64,
    /// Why the check failed, when it did.
    pub reason: Option<String>,
}

impl BuyingPowerCheck {
    pub fn sufficient(order_value: f64) -> Self {
        Self {
            is_sufficient: true,
            order_value,
            reason: None,
        }
    }

    pub fn insufficient(order_value: f64, reason: impl Into<String>) -> Self {
        Self {
            is_sufficient: false,
            order_value,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether the account can afford an order.
///
/// Implementations may be user supplied; errors and panics are caught by the
/// scanner and invalidate only the order being checked.
pub trait BuyingPowerModel: Send + Sync {
    /// `fee` is the estimated fee for filling the order's remaining quantity.
    fn check(
        &self,
        account: &dyn AccountState,
        security: &SecuritySnapshot,
        order: &Order,
        fee: f64,
    ) -> Result<BuyingPowerCheck>;
}

/// Price the order is expected to trade at.
pub fn reference_price(security: &SecuritySnapshot, order: &Order) -> Price {
    if let Some(limit) = order.kind.limit_price() {
        return limit;
    }
    if let Some(stop) = order.kind.stop_price() {
        return stop;
    }
    if order.is_buy() {
        security.ask_price()
    } else {
        security.bid_price()
    }
}

/// Cash account with optional gross leverage.
#[derive(Debug, Clone)]
pub struct CashBuyingPowerModel {
    leverage: f64,
}

impl Default for CashBuyingPowerModel {
    fn default() -> Self {
        Self { leverage: 1.0 }
    }
}

impl CashBuyingPowerModel {
    pub fn new(leverage: f64) -> Self {
        Self {
            leverage: leverage.max(1.0),
        }
    }
}

impl BuyingPowerModel for CashBuyingPowerModel {
    fn check(
        &self,
        account: &dyn AccountState,
        security: &SecuritySnapshot,
        order: &Order,
        fee: f64,
    ) -> Result<BuyingPowerCheck> {
        let remaining = order.remaining_quantity();
        let price = reference_price(security, order);
        let order_value = (remaining * price).abs();

        let held = account
            .holding(&order.symbol)
            .map(|h| h.quantity)
            .unwrap_or(0.0);
        let reducing = if held != 0.0 && held.signum() != remaining.signum() {
            remaining.abs().min(held.abs())
        } else {
            0.0
        };
        let opening = remaining.abs() - reducing;
        if opening <= 0.0 {
            return Ok(BuyingPowerCheck::sufficient(order_value));
        }

        let required = opening * price / self.leverage + fee;
        let used: f64 = account
            .holdings()
            .iter()
            .map(|h| h.market_value().abs() / self.leverage)
            .sum();
        let available = account.total_portfolio_value() - used;

        if required > available {
            Ok(BuyingPowerCheck::insufficient(
                order_value,
                format!(
                    "Insufficient buying power to complete order (Value:{order_value:.2}), \
                     Reason: Required margin {required:.2} exceeds available buying power {available:.2}"
                ),
            ))
        } else {
            Ok(BuyingPowerCheck::sufficient(order_value))
        }
    }
}
