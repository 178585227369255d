//! Fee models and the per-security fee model registry.
//!
//! A fee model declares whether it charges per order or per unit traded.
//! Per-order fees are charged on the first fill of an order only; per-unit
//! fees are charged on every fill for that fill's quantity.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use simbroker_core::config::FeeConfig;
use simbroker_core::{Order, Price, Quantity, SecuritySnapshot, Symbol, QTY_EPSILON};

/// How a fee model's charges scale across partial fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSchedule {
    /// One charge per order, levied on the first fill.
    PerOrder,
    /// Proportional to the quantity of each fill.
    PerUnit,
}

/// Trait for calculating order fees.
pub trait FeeModel: Send + Sync + fmt::Debug {
    fn schedule(&self) -> FeeSchedule;

    /// Fee for a fill of `fill_quantity` at `fill_price`.
    ///
    /// `order` is the order as it stood before this fill.
    fn order_fee(
        &self,
        security: &SecuritySnapshot,
        order: &Order,
        fill_price: Price,
        fill_quantity: Quantity,
    ) -> Result<f64>;
}

/// Flat fee per order.
#[derive(Debug, Clone)]
pub struct ConstantFeeModel {
    fee: f64,
}

impl ConstantFeeModel {
    pub fn new(fee: f64) -> Self {
        Self { fee }
    }

    /// Create a zero-fee model.
    pub fn zero() -> Self {
        Self::new(0.0)
    }
}

impl FeeModel for ConstantFeeModel {
    fn schedule(&self) -> FeeSchedule {
        FeeSchedule::PerOrder
    }

    fn order_fee(&self, _: &SecuritySnapshot, _: &Order, _: Price, _: Quantity) -> Result<f64> {
        Ok(self.fee)
    }
}

/// Fee per unit traded, with a minimum applied to the order's first fill.
#[derive(Debug, Clone)]
pub struct PerUnitFeeModel {
    per_unit: f64,
    minimum: f64,
}

impl PerUnitFeeModel {
    pub fn new(per_unit: f64, minimum: f64) -> Self {
        Self { per_unit, minimum }
    }
}

impl FeeModel for PerUnitFeeModel {
    fn schedule(&self) -> FeeSchedule {
        FeeSchedule::PerUnit
    }

    fn order_fee(
        &self,
        _: &SecuritySnapshot,
        order: &Order,
        _: Price,
        fill_quantity: Quantity,
    ) -> Result<f64> {
        let fee = self.per_unit * fill_quantity.abs();
        if order.filled_quantity.abs() < QTY_EPSILON {
            Ok(fee.max(self.minimum))
        } else {
            Ok(fee)
        }
    }
}

/// Basis points of fill notional.
#[derive(Debug, Clone)]
pub struct BpsFeeModel {
    bps: f64,
}

impl BpsFeeModel {
    pub fn new(bps: f64) -> Self {
        Self { bps }
    }
}

impl FeeModel for BpsFeeModel {
    fn schedule(&self) -> FeeSchedule {
        FeeSchedule::PerUnit
    }

    fn order_fee(
        &self,
        _: &SecuritySnapshot,
        _: &Order,
        fill_price: Price,
        fill_quantity: Quantity,
    ) -> Result<f64> {
        let notional = fill_price * fill_quantity.abs();
        Ok(notional * self.bps / 10_000.0)
    }
}

/// Build the fee model described by a config section.
pub fn fee_model_from_config(config: &FeeConfig) -> Arc<dyn FeeModel> {
    match *config {
        FeeConfig::PerOrder { fee } => Arc::new(ConstantFeeModel::new(fee)),
        FeeConfig::PerUnit { per_unit, minimum } => Arc::new(PerUnitFeeModel::new(per_unit, minimum)),
        FeeConfig::Bps { bps } => Arc::new(BpsFeeModel::new(bps)),
    }
}

/// Supplies the fee model for a security.
pub trait FeeModelProvider: Send + Sync {
    fn fee_model(&self, symbol: &str) -> Arc<dyn FeeModel>;
}

/// Default fee model with per-symbol overrides.
#[derive(Debug, Clone)]
pub struct FeeModels {
    default: Arc<dyn FeeModel>,
    overrides: HashMap<Symbol, Arc<dyn FeeModel>>,
}

impl FeeModels {
    pub fn new(default: Arc<dyn FeeModel>) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &FeeConfig) -> Self {
        Self::new(fee_model_from_config(config))
    }

    pub fn with_override(mut self, symbol: impl Into<Symbol>, model: Arc<dyn FeeModel>) -> Self {
        self.overrides.insert(symbol.into(), model);
        self
    }
}

impl FeeModelProvider for FeeModels {
    fn fee_model(&self, symbol: &str) -> Arc<dyn FeeModel> {
        self.overrides
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Fee to attach to a fill event, honoring the model's schedule.
///
/// `order` is the order before the fill. Per-order models are charged only
/// when this fill is the order's first fill quantum.
pub fn fee_for_fill(
    model: &dyn FeeModel,
    security: &SecuritySnapshot,
    order: &Order,
    fill_price: Price,
    fill_quantity: Quantity,
) -> Result<f64> {
    if fill_quantity.abs() < QTY_EPSILON {
        return Ok(0.0);
    }
    let first_fill = order.filled_quantity.abs() < QTY_EPSILON;
    match model.schedule() {
        FeeSchedule::PerOrder if !first_fill => Ok(0.0),
        _ => model.order_fee(security, order, fill_price, fill_quantity),
    }
}
