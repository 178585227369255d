//! Pending-order scanner.
//!
//! One pass evaluates every pending order against the current market state
//! and commits at most one event per order. Per order, in sequence:
//!
//! 1. Staleness: terminal orders are dropped from the pending set
//! 2. Timing gate: non-market orders wait for a step strictly after creation
//! 3. Security lookup: untracked securities invalidate the order
//! 4. Time in force: expired orders are canceled
//! 5. Brokerage veto: the order stays open, no event
//! 6. Buying power: insufficient capital, fee included, invalidates the order
//! 7. Fill model and fee: the candidate event
//! 8. Commit: emitted if the status changed or something filled
//!
//! Errors and panics raised by user-supplied models are caught here. They
//! invalidate only the order being evaluated and are reported to the error
//! channel; the pass carries on with the next order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use simbroker_core::{Order, OrderEvent, OrderStatus};
use thiserror::Error;
use tracing::{debug, warn};

use crate::brokerage_model::BrokerageModel;
use crate::buying_power::{self, BuyingPowerModel};
use crate::events::{ErrorChannel, EventEmitter};
use crate::fees::{fee_for_fill, FeeModelProvider};
use crate::fill_model::{self, FillModel};
use crate::ledger::OrderLedger;
use crate::market_data::MarketDataProvider;
use crate::portfolio::AccountState;

/// Collaborators consulted during a scan pass.
pub struct ScanContext<'a> {
    pub market_data: &'a dyn MarketDataProvider,
    pub account: &'a dyn AccountState,
    pub brokerage_model: &'a dyn BrokerageModel,
    pub buying_power: &'a dyn BuyingPowerModel,
    pub fill_model: &'a dyn FillModel,
    pub fees: &'a dyn FeeModelProvider,
    pub errors: &'a dyn ErrorChannel,
}

/// A fault raised inside a user-supplied model.
#[derive(Debug, Error)]
pub enum ModelFault {
    #[error("{0:#}")]
    Failed(anyhow::Error),
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Run a model call, turning both errors and panics into a [`ModelFault`].
pub fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, ModelFault> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ModelFault::Failed(err)),
        Err(payload) => Err(ModelFault::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Commit an event to the ledger and publish it. Returns false if the ledger
/// rejected the transition, in which case nothing is published.
fn commit(ledger: &mut OrderLedger, emitter: &EventEmitter, event: &OrderEvent) -> bool {
    if !ledger.apply(event) {
        warn!(
            order_id = %event.order_id,
            status = %event.status,
            "illegal order transition ignored"
        );
        return false;
    }
    emitter.emit(event);
    true
}

fn invalidate_on_fault(
    ledger: &mut OrderLedger,
    ctx: &ScanContext<'_>,
    emitter: &EventEmitter,
    order: &Order,
    now: DateTime<Utc>,
    message: String,
) {
    warn!(order_id = %order.id, symbol = %order.symbol, error = %message, "model fault");
    ctx.errors.report(order.id, &message);
    let event = OrderEvent::new(order, now, OrderStatus::Invalid).with_message(message);
    commit(ledger, emitter, &event);
}

/// Evaluate every pending order at `now`.
///
/// Returns whether any order is still waiting for a later pass.
pub fn scan(
    ledger: &mut OrderLedger,
    ctx: &ScanContext<'_>,
    emitter: &EventEmitter,
    now: DateTime<Utc>,
) -> bool {
    let mut needs_scan = false;

    for id in ledger.pending_ids() {
        let Some(order) = ledger.get(id).cloned() else {
            ledger.remove_pending(id);
            continue;
        };

        if order.status.is_terminal() {
            ledger.remove_pending(id);
            continue;
        }

        if now <= order.time && !order.kind.is_market() {
            debug!(order_id = %id, kind = %order.kind, "waiting for a later time step");
            needs_scan = true;
            continue;
        }

        let Some(security) = ctx.market_data.snapshot(&order.symbol) else {
            let event = OrderEvent::new(&order, now, OrderStatus::Invalid)
                .with_message(format!("Security {} is no longer tracked", order.symbol));
            commit(ledger, emitter, &event);
            continue;
        };

        if order.time_in_force.is_expired(order.time, now) {
            let event =
                OrderEvent::new(&order, now, OrderStatus::Canceled).with_message("Order expired");
            commit(ledger, emitter, &event);
            continue;
        }

        if !ctx.brokerage_model.can_execute_order(&security, &order) {
            debug!(order_id = %id, symbol = %order.symbol, "brokerage model vetoed execution");
            needs_scan = true;
            continue;
        }

        let check = guarded(|| {
            let fee_model = ctx.fees.fee_model(&order.symbol);
            let fee = fee_for_fill(
                fee_model.as_ref(),
                &security,
                &order,
                buying_power::reference_price(&security, &order),
                order.remaining_quantity(),
            )?;
            ctx.buying_power.check(ctx.account, &security, &order, fee)
        });
        let check = match check {
            Ok(check) => check,
            Err(fault) => {
                let message = format!("Buying power model failed: {fault}");
                invalidate_on_fault(ledger, ctx, emitter, &order, now, message);
                continue;
            }
        };
        if !check.is_sufficient {
            let message = check.reason.unwrap_or_else(|| {
                format!(
                    "Insufficient buying power to complete order (Value:{:.2})",
                    check.order_value
                )
            });
            let event = OrderEvent::new(&order, now, OrderStatus::Invalid).with_message(message);
            commit(ledger, emitter, &event);
            continue;
        }

        let mut working = order.clone();
        let outcome = guarded(|| {
            let event = fill_model::dispatch(ctx.fill_model, &security, &mut working, now)?;
            if !event.is_fill() {
                return Ok(event);
            }
            let fee_model = ctx.fees.fee_model(&order.symbol);
            let fee = fee_for_fill(
                fee_model.as_ref(),
                &security,
                &order,
                event.fill_price,
                event.fill_quantity,
            )?;
            Ok(event.with_fee(fee))
        });

        let event = match outcome {
            Ok(event) => event,
            Err(fault) => {
                let message = format!("Fill model failed: {fault}");
                invalidate_on_fault(ledger, ctx, emitter, &order, now, message);
                continue;
            }
        };

        if working.kind != order.kind {
            ledger.set_kind(id, working.kind);
        }

        if event.status == order.status && !event.is_fill() {
            needs_scan = true;
            continue;
        }

        if !commit(ledger, emitter, &event) || !event.status.is_terminal() {
            needs_scan = true;
        }
    }

    needs_scan
}
