//! Brokerage model: per-pass executability veto.

use simbroker_core::config::BrokerageModelConfig;
use simbroker_core::{Order, SecuritySnapshot};

/// Decides whether an order may execute on this scan pass.
///
/// A veto leaves the order open without emitting an event.
pub trait BrokerageModel: Send + Sync {
    fn can_execute_order(&self, security: &SecuritySnapshot, order: &Order) -> bool;
}

/// Vetoes fills while the market is closed and fills without a usable price.
#[derive(Debug, Clone)]
pub struct DefaultBrokerageModel {
    require_open_market: bool,
}

impl Default for DefaultBrokerageModel {
    fn default() -> Self {
        Self::new(&BrokerageModelConfig::default())
    }
}

impl DefaultBrokerageModel {
    pub fn new(config: &BrokerageModelConfig) -> Self {
        Self {
            require_open_market: config.require_open_market,
        }
    }
}

impl BrokerageModel for DefaultBrokerageModel {
    fn can_execute_order(&self, security: &SecuritySnapshot, _order: &Order) -> bool {
        if !security.has_price() {
            return false;
        }
        !self.require_open_market || security.session.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use simbroker_core::SessionState;

    #[test]
    fn test_closed_market_vetoed() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 22, 0, 0).unwrap();
        let order = Order::market(1, "SPY", 10.0, time);
        let open = SecuritySnapshot::from_price("SPY", time, 100.0);
        let closed = open.clone().with_session(SessionState::Closed);

        let model = DefaultBrokerageModel::default();
        assert!(model.can_execute_order(&open, &order));
        assert!(!model.can_execute_order(&closed, &order));

        let extended = DefaultBrokerageModel::new(&BrokerageModelConfig {
            require_open_market: false,
        });
        assert!(extended.can_execute_order(&closed, &order));
    }

    #[test]
    fn test_missing_price_vetoed() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        let order = Order::market(1, "SPY", 10.0, time);
        let snap = SecuritySnapshot::from_price("SPY", time, 0.0);
        assert!(!DefaultBrokerageModel::default().can_execute_order(&snap, &order));
    }
}
