//! Simulated brokerage facade.
//!
//! Accepts placements, updates and cancels from the algorithm host, keeps
//! the canonical order copies in an [`OrderLedger`] and matches pending
//! orders whenever the simulation advances via [`SimulatedBrokerage::scan`].
//!
//! Every mutation of the ledger and the needs-scan flag happens under one
//! mutex, and a scan pass holds it for its whole duration, so a cancel lands
//! strictly before or after a pass. Order events are published while that
//! lock is held; handlers must not call back into the brokerage.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use simbroker_core::{Cash, Config, Holding, Order, OrderEvent, OrderId, OrderStatus};
use tracing::{debug, info, warn};

use crate::brokerage_model::{BrokerageModel, DefaultBrokerageModel};
use crate::buying_power::{BuyingPowerModel, CashBuyingPowerModel};
use crate::events::{ErrorChannel, EventEmitter, LoggingErrorChannel, OrderEventHandler};
use crate::fees::{FeeModelProvider, FeeModels};
use crate::fill_model::{FillModel, ImmediateFillModel};
use crate::ledger::OrderLedger;
use crate::market_data::MarketDataProvider;
use crate::portfolio::{AccountState, Portfolio};
use crate::scanner::{self, ScanContext};

/// The generic brokerage contract.
pub trait Brokerage: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self);

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Submit a new order. On success the caller's order is marked
    /// `Submitted` and carries the brokerage's identifier.
    fn place_order(&self, order: &mut Order) -> bool;

    /// Replace the editable fields of a pending order.
    fn update_order(&self, order: &mut Order) -> bool;

    fn cancel_order(&self, order: &Order) -> bool;

    fn open_orders(&self) -> Vec<Order>;

    fn account_holdings(&self) -> Vec<Holding>;

    fn cash_balance(&self) -> Vec<Cash>;

    /// Register a subscriber to the order status stream.
    fn subscribe(&self, handler: Arc<dyn OrderEventHandler>);
}

struct BrokerageState {
    ledger: OrderLedger,
    needs_scan: bool,
    emitter: EventEmitter,
    /// Time of the latest scan request.
    time: Option<DateTime<Utc>>,
}

impl BrokerageState {
    fn event_time(&self, order: &Order) -> DateTime<Utc> {
        match self.time {
            Some(now) => now.max(order.time),
            None => order.time,
        }
    }
}

/// Brokerage that fills orders against simulated market data.
pub struct SimulatedBrokerage {
    state: Mutex<BrokerageState>,
    work_ready: Condvar,
    market_data: Arc<dyn MarketDataProvider>,
    account: Arc<dyn AccountState>,
    fill_model: Arc<dyn FillModel>,
    buying_power: Arc<dyn BuyingPowerModel>,
    brokerage_model: Arc<dyn BrokerageModel>,
    fees: Arc<dyn FeeModelProvider>,
    errors: Arc<dyn ErrorChannel>,
}

impl SimulatedBrokerage {
    /// Create a brokerage with the default models described by `config`.
    pub fn new(
        config: &Config,
        market_data: Arc<dyn MarketDataProvider>,
        account: Arc<dyn AccountState>,
    ) -> Self {
        Self {
            state: Mutex::new(BrokerageState {
                ledger: OrderLedger::new(),
                needs_scan: false,
                emitter: EventEmitter::new(),
                time: None,
            }),
            work_ready: Condvar::new(),
            market_data,
            account,
            fill_model: Arc::new(ImmediateFillModel::new(config.fill.clone())),
            buying_power: Arc::new(CashBuyingPowerModel::new(config.buying_power.leverage)),
            brokerage_model: Arc::new(DefaultBrokerageModel::new(&config.brokerage)),
            fees: Arc::new(FeeModels::from_config(&config.fees)),
            errors: Arc::new(LoggingErrorChannel),
        }
    }

    /// Create a brokerage backed by a fresh [`Portfolio`] that is already
    /// subscribed to the event stream.
    pub fn with_portfolio(
        config: &Config,
        market_data: Arc<dyn MarketDataProvider>,
    ) -> (Self, Arc<Portfolio>) {
        let portfolio = Arc::new(Portfolio::from_config(&config.account));
        let brokerage = Self::new(config, market_data, portfolio.clone());
        brokerage.subscribe(portfolio.clone());
        (brokerage, portfolio)
    }

    pub fn with_fill_model(mut self, model: Arc<dyn FillModel>) -> Self {
        self.fill_model = model;
        self
    }

    pub fn with_buying_power_model(mut self, model: Arc<dyn BuyingPowerModel>) -> Self {
        self.buying_power = model;
        self
    }

    pub fn with_brokerage_model(mut self, model: Arc<dyn BrokerageModel>) -> Self {
        self.brokerage_model = model;
        self
    }

    pub fn with_fee_models(mut self, fees: Arc<dyn FeeModelProvider>) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_error_channel(mut self, errors: Arc<dyn ErrorChannel>) -> Self {
        self.errors = errors;
        self
    }

    /// Evaluate pending orders at simulation time `now`.
    ///
    /// Returns immediately when nothing has changed since the last pass
    /// left the ledger with no pending orders.
    pub fn scan(&self, now: DateTime<Utc>) {
        let mut guard = self.state.lock();
        guard.time = Some(now);
        if !guard.needs_scan {
            return;
        }

        let ctx = ScanContext {
            market_data: self.market_data.as_ref(),
            account: self.account.as_ref(),
            brokerage_model: self.brokerage_model.as_ref(),
            buying_power: self.buying_power.as_ref(),
            fill_model: self.fill_model.as_ref(),
            fees: self.fees.as_ref(),
            errors: self.errors.as_ref(),
        };
        let state = &mut *guard;
        state.needs_scan = scanner::scan(&mut state.ledger, &ctx, &state.emitter, now);
        debug!(needs_scan = state.needs_scan, time = %now, "scan pass complete");
    }

    pub fn needs_scan(&self) -> bool {
        self.state.lock().needs_scan
    }

    /// Any order ever placed, terminal ones included.
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.state.lock().ledger.get(id).cloned()
    }

    /// Time of the most recent scan request.
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().time
    }

    /// Block until there is work to scan or `timeout` elapses.
    ///
    /// Returns whether a scan is needed.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.needs_scan {
            self.work_ready.wait_for(&mut state, timeout);
        }
        state.needs_scan
    }

    /// Wake every thread blocked in [`wait_for_work`](Self::wait_for_work).
    pub fn wake_waiters(&self) {
        self.work_ready.notify_all();
    }
}

impl Brokerage for SimulatedBrokerage {
    fn name(&self) -> &str {
        "Simulated Brokerage"
    }

    fn connect(&self) {}

    fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        true
    }

    fn place_order(&self, order: &mut Order) -> bool {
        let mut state = self.state.lock();
        if order.status != OrderStatus::New || state.ledger.get(order.id).is_some() {
            debug!(order_id = %order.id, status = %order.status, "placement rejected");
            return false;
        }
        if let Err(err) = order.validate() {
            warn!(order_id = %order.id, error = %err, "malformed order rejected");
            return false;
        }

        order.add_broker_id(order.id.to_string());
        if !state.ledger.place(order) {
            return false;
        }
        order.status = OrderStatus::Submitted;
        state.needs_scan = true;

        let event = OrderEvent::new(order, state.event_time(order), OrderStatus::Submitted);
        info!(
            order_id = %order.id,
            symbol = %order.symbol,
            kind = %order.kind,
            quantity = order.quantity,
            "order placed"
        );
        state.emitter.emit(&event);
        drop(state);

        self.work_ready.notify_all();
        true
    }

    fn update_order(&self, order: &mut Order) -> bool {
        let mut state = self.state.lock();
        if !state.ledger.is_pending(order.id) {
            debug!(order_id = %order.id, "update for unknown order ignored");
            return false;
        }
        let Some(stored) = state.ledger.get(order.id) else {
            return false;
        };
        if let Err(err) = stored.validate_update(order) {
            warn!(order_id = %order.id, error = %err, "order update rejected");
            return false;
        }

        order.add_broker_id(order.id.to_string());
        let time = state.event_time(order);
        let event = match state.ledger.update(order) {
            Some(stored) => OrderEvent::new(stored, time, OrderStatus::Submitted),
            None => return false,
        };
        let event = OrderEvent {
            is_update: true,
            ..event
        };
        state.needs_scan = true;

        info!(order_id = %order.id, symbol = %order.symbol, "order updated");
        state.emitter.emit(&event);
        drop(state);

        self.work_ready.notify_all();
        true
    }

    fn cancel_order(&self, order: &Order) -> bool {
        let mut state = self.state.lock();
        let time = state.event_time(order);
        let event = match state.ledger.cancel(order.id) {
            Some(stored) => OrderEvent::new(stored, time, OrderStatus::Canceled),
            None => {
                debug!(order_id = %order.id, "cancel for unknown or closed order ignored");
                return false;
            }
        };
        state.emitter.emit(&event);
        true
    }

    fn open_orders(&self) -> Vec<Order> {
        self.state.lock().ledger.open_orders()
    }

    fn account_holdings(&self) -> Vec<Holding> {
        self.account.holdings()
    }

    fn cash_balance(&self) -> Vec<Cash> {
        self.account.cash_balances()
    }

    fn subscribe(&self, handler: Arc<dyn OrderEventHandler>) {
        self.state.lock().emitter.subscribe(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLog, RecordingErrorChannel};
    use crate::logging::init_test_tracing;
    use crate::market_data::InMemoryMarketData;
    use approx::assert_relative_eq;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use simbroker_core::{Bar, OrderKind, SecuritySnapshot, SessionState};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    struct Harness {
        brokerage: SimulatedBrokerage,
        data: Arc<InMemoryMarketData>,
        portfolio: Arc<Portfolio>,
        log: Arc<EventLog>,
    }

    impl Harness {
        fn new(config: Config) -> Self {
            init_test_tracing();
            let data = Arc::new(InMemoryMarketData::new());
            let (brokerage, portfolio) = SimulatedBrokerage::with_portfolio(&config, data.clone());
            let log = Arc::new(EventLog::new());
            brokerage.subscribe(log.clone());
            Self {
                brokerage,
                data,
                portfolio,
                log,
            }
        }

        fn with_cash(cash: f64) -> Self {
            let mut config = Config::default();
            config.account.initial_cash = cash;
            Self::new(config)
        }

        fn price(&self, symbol: &str, time: DateTime<Utc>, price: f64) {
            self.data.update(SecuritySnapshot::from_price(symbol, time, price));
        }

        fn bar(&self, symbol: &str, time: DateTime<Utc>, price: f64, volume: f64) {
            self.data
                .update(SecuritySnapshot::from_bar(symbol, Bar::flat(time, price, volume)));
        }

        fn statuses(&self, id: u64) -> Vec<OrderStatus> {
            self.log
                .for_order(OrderId(id))
                .iter()
                .map(|e| e.status)
                .collect()
        }
    }

    #[test]
    fn test_non_market_orders_wait_a_step() {
        let h = Harness::with_cash(100_000.0);
        h.price("SPY", t(0), 100.0);

        let mut limit = Order::limit(1, "SPY", 10.0, 101.0, t(0));
        let mut market = Order::market(2, "SPY", 10.0, t(0));
        assert!(h.brokerage.place_order(&mut limit));
        assert!(h.brokerage.place_order(&mut market));

        h.brokerage.scan(t(0));
        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted]);
        assert_eq!(h.statuses(2), vec![OrderStatus::Submitted, OrderStatus::Filled]);

        h.price("SPY", t(1), 100.0);
        h.brokerage.scan(t(1));
        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted, OrderStatus::Filled]);
        assert_eq!(h.log.for_order(OrderId(1))[1].fill_price, 100.0);
    }

    #[test]
    fn test_partial_fills_one_terminal_event_fee_once() {
        let mut config = Config::default();
        config.fill.max_volume_participation = Some(0.01);
        let h = Harness::new(config);

        let mut order = Order::market(1, "SPY", 250.0, t(0));
        h.bar("SPY", t(0), 100.0, 10_000.0);
        h.brokerage.place_order(&mut order);

        for minute in 0..5 {
            h.bar("SPY", t(minute), 100.0, 10_000.0);
            h.brokerage.scan(t(minute));
        }

        assert_eq!(
            h.statuses(1),
            vec![
                OrderStatus::Submitted,
                OrderStatus::PartiallyFilled,
                OrderStatus::PartiallyFilled,
                OrderStatus::Filled,
            ]
        );
        let events = h.log.for_order(OrderId(1));
        let fills: Vec<f64> = events.iter().map(|e| e.fill_quantity).collect();
        assert_eq!(fills, vec![0.0, 100.0, 100.0, 50.0]);
        let fees: f64 = events.iter().map(|e| e.fee).sum();
        assert_eq!(fees, 1.0);
        assert_eq!(events[1].fee, 1.0);

        assert!(h.brokerage.open_orders().is_empty());
        assert!(!h.brokerage.needs_scan());
        assert_eq!(h.portfolio.holding("SPY").unwrap().quantity, 250.0);
        assert_relative_eq!(h.portfolio.total_fees(), 1.0);
    }

    #[test]
    fn test_per_unit_fees_charged_on_each_partial() {
        let mut config = Config::default();
        config.fill.max_volume_participation = Some(0.01);
        config.fees = simbroker_core::config::FeeConfig::PerUnit {
            per_unit: 0.01,
            minimum: 0.0,
        };
        let h = Harness::new(config);

        let mut order = Order::market(1, "SPY", 150.0, t(0));
        h.bar("SPY", t(0), 100.0, 10_000.0);
        h.brokerage.place_order(&mut order);
        h.brokerage.scan(t(0));
        h.bar("SPY", t(1), 100.0, 10_000.0);
        h.brokerage.scan(t(1));

        let fees: Vec<f64> = h.log.for_order(OrderId(1)).iter().map(|e| e.fee).collect();
        assert_eq!(fees.len(), 3);
        assert_relative_eq!(fees[1], 1.0);
        assert_relative_eq!(fees[2], 0.5);
    }

    #[test]
    fn test_repeat_scans_share_one_bar_of_volume() {
        let mut config = Config::default();
        config.fill.max_volume_participation = Some(0.01);
        let h = Harness::new(config);

        let mut order = Order::market(1, "SPY", 250.0, t(0));
        h.bar("SPY", t(0), 100.0, 10_000.0);
        h.brokerage.place_order(&mut order);
        for _ in 0..3 {
            h.brokerage.scan(t(0));
        }

        assert_eq!(
            h.statuses(1),
            vec![OrderStatus::Submitted, OrderStatus::PartiallyFilled]
        );
        assert_eq!(h.brokerage.order(OrderId(1)).unwrap().filled_quantity, 100.0);
        assert_eq!(h.portfolio.holding("SPY").unwrap().quantity, 100.0);
        assert!(h.brokerage.needs_scan());

        h.bar("SPY", t(1), 100.0, 10_000.0);
        h.brokerage.scan(t(1));
        h.brokerage.scan(t(1));
        assert_eq!(h.brokerage.order(OrderId(1)).unwrap().filled_quantity, 200.0);
    }

    #[test]
    fn test_cancel_terminal_order_returns_false() {
        let h = Harness::with_cash(100_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::market(1, "SPY", 10.0, t(0));
        h.brokerage.place_order(&mut order);
        h.brokerage.scan(t(0));

        let before = h.log.len();
        assert!(!h.brokerage.cancel_order(&order));
        assert_eq!(h.log.len(), before);

        h.brokerage.scan(t(1));
        assert_eq!(h.log.len(), before);
    }

    #[test]
    fn test_cancel_pending_order() {
        let h = Harness::with_cash(100_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::limit(1, "SPY", 10.0, 90.0, t(0));
        h.brokerage.place_order(&mut order);

        assert!(h.brokerage.cancel_order(&order));
        assert!(!h.brokerage.cancel_order(&order));
        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted, OrderStatus::Canceled]);
        assert!(h.brokerage.open_orders().is_empty());
        assert_eq!(h.brokerage.order(OrderId(1)).unwrap().status, OrderStatus::Canceled);
    }

    #[test]
    fn test_insufficient_capital_invalidates() {
        let h = Harness::with_cash(1_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::market(1, "SPY", 100.0, t(0));
        h.brokerage.place_order(&mut order);
        h.brokerage.scan(t(0));

        let events = h.log.for_order(OrderId(1));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, OrderStatus::Invalid);
        assert!(events[1].message.as_deref().unwrap().contains("Value:10000.00"));
        assert!(h.brokerage.open_orders().is_empty());
        assert_eq!(h.portfolio.cash(), 1_000.0);
        assert!(h.brokerage.account_holdings().is_empty());
    }

    #[test]
    fn test_fee_pushing_cash_negative_invalidates() {
        let h = Harness::with_cash(10_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::market(1, "SPY", 100.0, t(0));
        h.brokerage.place_order(&mut order);
        h.brokerage.scan(t(0));

        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted, OrderStatus::Invalid]);
        assert_eq!(h.portfolio.cash(), 10_000.0);
        assert!(h.brokerage.account_holdings().is_empty());
    }

    #[test]
    fn test_market_buy_fills_on_scan() {
        let h = Harness::with_cash(100_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::market(1, "SPY", 100.0, t(0));

        assert!(h.brokerage.place_order(&mut order));
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.broker_ids, vec!["1".to_string()]);
        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted]);
        assert_eq!(h.log.events()[0].fee, 0.0);

        h.brokerage.scan(t(0));
        let events = h.log.for_order(OrderId(1));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, OrderStatus::Filled);
        assert_eq!(events[1].fill_quantity, 100.0);
        assert!(events[1].fee > 0.0);
        assert!(h.brokerage.open_orders().is_empty());

        assert_relative_eq!(h.portfolio.cash(), 100_000.0 - 10_000.0 - 1.0);
        let cash = h.brokerage.cash_balance();
        assert_eq!(cash[0].currency, "USD");
    }

    #[test]
    fn test_unreached_limit_sell_stays_open() {
        let h = Harness::with_cash(100_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::limit(1, "SPY", -10.0, 200.0, t(0));
        h.brokerage.place_order(&mut order);

        for minute in 1..10 {
            h.price("SPY", t(minute), 100.0 + minute as f64);
            h.brokerage.scan(t(minute));
        }

        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted]);
        let open = h.brokerage.open_orders();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, OrderId(1));
        assert!(h.brokerage.needs_scan());
    }

    #[test]
    fn test_second_order_invalid_after_first_exhausts_capital() {
        let h = Harness::with_cash(10_000.0);
        h.price("SPY", t(0), 100.0);
        let mut first = Order::market(1, "SPY", 90.0, t(0));
        let mut second = Order::market(2, "SPY", 50.0, t(0));
        h.brokerage.place_order(&mut first);
        h.brokerage.place_order(&mut second);

        h.brokerage.scan(t(0));

        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted, OrderStatus::Filled]);
        assert_eq!(h.statuses(2), vec![OrderStatus::Submitted, OrderStatus::Invalid]);
        assert_relative_eq!(h.portfolio.cash(), 999.0);
    }

    #[test]
    fn test_resubmission_rejected() {
        let h = Harness::with_cash(100_000.0);
        let mut order = Order::limit(1, "SPY", 10.0, 90.0, t(0));
        assert!(h.brokerage.place_order(&mut order));
        assert!(!h.brokerage.place_order(&mut order));

        let mut clone = Order::limit(1, "SPY", 10.0, 90.0, t(0));
        assert!(!h.brokerage.place_order(&mut clone));
        assert!(clone.broker_ids.is_empty());
        assert_eq!(h.log.len(), 1);
    }

    #[test]
    fn test_malformed_order_rejected() {
        let h = Harness::with_cash(100_000.0);
        let mut order = Order::market(1, "SPY", 0.0, t(0));
        assert!(!h.brokerage.place_order(&mut order));
        assert_eq!(order.status, OrderStatus::New);
        assert!(h.log.is_empty());
        assert!(h.brokerage.order(OrderId(1)).is_none());
    }

    #[test]
    fn test_caller_mutation_does_not_affect_matching() {
        let h = Harness::with_cash(100_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::market(1, "SPY", 100.0, t(0));
        h.brokerage.place_order(&mut order);
        order.quantity = 1_000_000.0;

        h.brokerage.scan(t(0));
        let events = h.log.for_order(OrderId(1));
        assert_eq!(events[1].fill_quantity, 100.0);
    }

    #[test]
    fn test_update_acknowledged_as_submitted() {
        let h = Harness::with_cash(100_000.0);
        h.price("SPY", t(0), 100.0);
        let mut order = Order::limit(1, "SPY", 10.0, 90.0, t(0));
        h.brokerage.place_order(&mut order);

        let mut update = Order::limit(1, "SPY", 20.0, 99.0, t(0));
        assert!(h.brokerage.update_order(&mut update));

        let events = h.log.for_order(OrderId(1));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, OrderStatus::Submitted);
        assert!(events[1].is_update);
        assert_eq!(update.broker_ids, vec!["1".to_string()]);

        let stored = h.brokerage.order(OrderId(1)).unwrap();
        assert_eq!(stored.quantity, 20.0);
        assert_eq!(stored.kind, OrderKind::Limit { limit_price: 99.0 });

        let mut unknown = Order::limit(9, "SPY", 1.0, 90.0, t(0));
        assert!(!h.brokerage.update_order(&mut unknown));
        assert_eq!(h.log.len(), 2);
    }

    #[test]
    fn test_update_below_filled_quantity_rejected() {
        let mut config = Config::default();
        config.fill.max_volume_participation = Some(0.01);
        let h = Harness::new(config);

        let mut order = Order::market(1, "SPY", 250.0, t(0));
        h.bar("SPY", t(0), 100.0, 10_000.0);
        h.brokerage.place_order(&mut order);
        h.brokerage.scan(t(0));
        let before = h.log.len();

        let mut shrink = Order::market(1, "SPY", 50.0, t(0));
        assert!(!h.brokerage.update_order(&mut shrink));
        let mut to_filled = Order::market(1, "SPY", 100.0, t(0));
        assert!(!h.brokerage.update_order(&mut to_filled));
        assert_eq!(h.log.len(), before);

        h.bar("SPY", t(1), 100.0, 10_000.0);
        h.brokerage.scan(t(1));
        let events = h.log.for_order(OrderId(1));
        assert!(events.iter().all(|e| e.fill_quantity >= 0.0));
        assert_eq!(h.portfolio.holding("SPY").unwrap().quantity, 200.0);
    }

    #[test]
    fn test_update_changing_side_rejected() {
        let h = Harness::with_cash(100_000.0);
        let mut order = Order::limit(1, "SPY", 10.0, 90.0, t(0));
        h.brokerage.place_order(&mut order);

        let mut flipped = Order::limit(1, "SPY", -10.0, 90.0, t(0));
        assert!(!h.brokerage.update_order(&mut flipped));
        assert_eq!(h.brokerage.order(OrderId(1)).unwrap().quantity, 10.0);
        assert_eq!(h.log.len(), 1);
    }

    #[test]
    fn test_malformed_update_rejected() {
        let h = Harness::with_cash(100_000.0);
        let mut order = Order::limit(1, "SPY", 10.0, 90.0, t(0));
        h.brokerage.place_order(&mut order);

        let mut zero = Order::limit(1, "SPY", 0.0, 90.0, t(0));
        assert!(!h.brokerage.update_order(&mut zero));
        let mut bad_price = Order::limit(1, "SPY", -5.0, 0.0, t(0));
        assert!(!h.brokerage.update_order(&mut bad_price));
        let mut bad_price = Order::limit(1, "SPY", 10.0, 0.0, t(0));
        assert!(!h.brokerage.update_order(&mut bad_price));

        let stored = h.brokerage.order(OrderId(1)).unwrap();
        assert_eq!(stored.kind, OrderKind::Limit { limit_price: 90.0 });
        assert_eq!(h.log.len(), 1);
        assert!(bad_price.broker_ids.is_empty());
    }

    #[test]
    fn test_market_on_open_waits_for_opening_cross() {
        let h = Harness::with_cash(100_000.0);
        let closed = SecuritySnapshot::from_price("SPY", t(0), 100.0).with_session(SessionState::Closed);
        h.data.update(closed);
        let mut order = Order::market_on_open(1, "SPY", 10.0, t(0));
        h.brokerage.place_order(&mut order);

        h.data.update(
            SecuritySnapshot::from_price("SPY", t(1), 100.0).with_session(SessionState::Closed),
        );
        h.brokerage.scan(t(1));
        assert_eq!(h.statuses(1), vec![OrderStatus::Submitted]);

        h.data.update(
            SecuritySnapshot::from_bar("SPY", Bar::flat(t(2), 101.0, 5_000.0))
                .with_session(SessionState::Opening),
        );
        h.brokerage.scan(t(2));
        let events = h.log.for_order(OrderId(1));
        assert_eq!(events[1].status, OrderStatus::Filled);
        assert_eq!(events[1].fill_price, 101.0);
    }

    #[test]
    fn test_injected_error_channel_receives_faults() {
        struct Broken;
        impl BuyingPowerModel for Broken {
            fn check(
                &self,
                _: &dyn AccountState,
                _: &SecuritySnapshot,
                _: &Order,
                _: f64,
            ) -> anyhow::Result<crate::buying_power::BuyingPowerCheck> {
                panic!("division by zero in margin table")
            }
        }

        init_test_tracing();
        let config = Config::default();
        let data = Arc::new(InMemoryMarketData::new());
        let errors = Arc::new(RecordingErrorChannel::new());
        let account = Arc::new(Portfolio::from_config(&config.account));
        let brokerage = SimulatedBrokerage::new(&config, data.clone(), account)
            .with_buying_power_model(Arc::new(Broken))
            .with_error_channel(errors.clone());
        let log = Arc::new(EventLog::new());
        brokerage.subscribe(log.clone());

        data.update(SecuritySnapshot::from_price("SPY", t(0), 100.0));
        let mut order = Order::market(1, "SPY", 1.0, t(0));
        brokerage.place_order(&mut order);
        brokerage.scan(t(0));

        assert_eq!(log.events()[1].status, OrderStatus::Invalid);
        assert_eq!(errors.reports().len(), 1);
        assert!(errors.reports()[0].1.contains("division by zero"));
        assert!(!brokerage.needs_scan());
    }

    #[test]
    fn test_idle_scan_short_circuits() {
        let h = Harness::with_cash(100_000.0);
        assert!(!h.brokerage.needs_scan());
        h.brokerage.scan(t(0));
        assert!(h.log.is_empty());
        assert_eq!(h.brokerage.current_time(), Some(t(0)));
    }

    #[test]
    fn test_wait_for_work() {
        let h = Harness::with_cash(100_000.0);
        assert!(!h.brokerage.wait_for_work(Duration::from_millis(5)));

        let mut order = Order::limit(1, "SPY", 1.0, 90.0, t(0));
        h.brokerage.place_order(&mut order);
        assert!(h.brokerage.wait_for_work(Duration::from_secs(5)));
    }

    #[test]
    fn test_trait_object_contract() {
        let h = Harness::with_cash(50_000.0);
        let brokerage: &dyn Brokerage = &h.brokerage;
        brokerage.connect();
        assert!(brokerage.is_connected());
        brokerage.disconnect();
        assert!(brokerage.is_connected());
        assert_eq!(brokerage.name(), "Simulated Brokerage");
        assert_eq!(brokerage.cash_balance()[0].amount, 50_000.0);
    }
}
