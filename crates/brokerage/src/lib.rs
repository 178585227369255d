//! Simulated brokerage for backtesting and paper trading.
//!
//! This crate provides:
//! - An order ledger and the pending-order scanner
//! - Fill models for market, limit, stop, stop-limit, MOO and MOC orders
//! - Fee, buying power and brokerage (executability) models
//! - The order event stream and an in-memory portfolio that follows it
//! - The [`SimulatedBrokerage`] facade and a background paper trading loop

pub mod brokerage;
pub mod brokerage_model;
pub mod buying_power;
pub mod events;
pub mod fees;
pub mod fill_model;
pub mod ledger;
pub mod logging;
pub mod market_data;
pub mod paper;
pub mod portfolio;
pub mod scanner;

pub use brokerage::{Brokerage, SimulatedBrokerage};
pub use brokerage_model::{BrokerageModel, DefaultBrokerageModel};
pub use buying_power::{BuyingPowerCheck, BuyingPowerModel, CashBuyingPowerModel};
pub use events::{
    ErrorChannel, EventEmitter, EventLog, LoggingErrorChannel, OrderEventHandler,
    RecordingErrorChannel,
};
pub use fees::{
    BpsFeeModel, ConstantFeeModel, FeeModel, FeeModelProvider, FeeModels, FeeSchedule,
    PerUnitFeeModel,
};
pub use fill_model::{FillModel, ImmediateFillModel};
pub use ledger::OrderLedger;
pub use logging::init_tracing;
pub use market_data::{InMemoryMarketData, MarketDataProvider};
pub use paper::PaperTradingLoop;
pub use portfolio::{AccountState, ClosedTrade, Portfolio};
pub use scanner::{ModelFault, ScanContext};
