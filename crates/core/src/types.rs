//! Market data and account value types shared by the brokerage crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instrument identifier (ticker).
pub type Symbol = String;

/// Price type.
pub type Price = f64;

/// Signed quantity type. Positive buys, negative sells.
pub type Quantity = f64;

/// Quantities smaller than this are treated as zero.
pub const QTY_EPSILON: f64 = 1e-9;

/// A Level 1 quote (best bid/ask).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Quote time.
    pub time: DateTime<Utc>,
    /// Best bid price.
    pub bid_px: Price,
    /// Best bid size.
    pub bid_sz: f64,
    /// Best ask price.
    pub ask_px: Price,
    /// Best ask size.
    pub ask_sz: f64,
}

impl Quote {
    /// Calculate mid price.
    #[inline]
    pub fn mid(&self) -> Price {
        (self.bid_px + self.ask_px) / 2.0
    }

    /// Calculate spread.
    #[inline]
    pub fn spread(&self) -> Price {
        self.ask_px - self.bid_px
    }
}

/// OHLCV bar. `time` is the bar's end time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: f64,
}

impl Bar {
    /// A flat bar where every price equals `price`.
    pub fn flat(time: DateTime<Utc>, price: Price, volume: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Where the instrument's exchange is within its trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Outside regular trading hours.
    Closed,
    /// The opening cross of the regular session.
    Opening,
    /// Regular trading.
    Open,
    /// The closing cross of the regular session.
    Closing,
}

impl SessionState {
    /// Is the regular session trading?
    pub fn is_open(self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

/// Everything the fill models may know about a security at one point in
/// simulated time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySnapshot {
    pub symbol: Symbol,
    /// Simulation time of the snapshot.
    pub time: DateTime<Utc>,
    /// Last traded price.
    pub last_price: Price,
    /// Latest bar, if the subscription is bar based.
    pub bar: Option<Bar>,
    /// Latest quote, if the subscription carries quotes.
    pub quote: Option<Quote>,
    pub session: SessionState,
}

impl SecuritySnapshot {
    /// Snapshot built from a single bar during regular trading.
    pub fn from_bar(symbol: impl Into<Symbol>, bar: Bar) -> Self {
        Self {
            symbol: symbol.into(),
            time: bar.time,
            last_price: bar.close,
            bar: Some(bar),
            quote: None,
            session: SessionState::Open,
        }
    }

    /// Snapshot built from a last-trade price only.
    pub fn from_price(symbol: impl Into<Symbol>, time: DateTime<Utc>, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            time,
            last_price: price,
            bar: None,
            quote: None,
            session: SessionState::Open,
        }
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quote = Some(quote);
        self
    }

    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = session;
        self
    }

    /// Reference price used for valuation.
    pub fn price(&self) -> Price {
        self.last_price
    }

    /// Price a buyer pays right now: the ask when quoted, else last.
    pub fn ask_price(&self) -> Price {
        match &self.quote {
            Some(q) if q.ask_px > 0.0 => q.ask_px,
            _ => self.last_price,
        }
    }

    /// Price a seller receives right now: the bid when quoted, else last.
    pub fn bid_price(&self) -> Price {
        match &self.quote {
            Some(q) if q.bid_px > 0.0 => q.bid_px,
            _ => self.last_price,
        }
    }

    pub fn open(&self) -> Price {
        self.bar.as_ref().map(|b| b.open).unwrap_or(self.last_price)
    }

    pub fn high(&self) -> Price {
        self.bar.as_ref().map(|b| b.high).unwrap_or(self.last_price)
    }

    pub fn low(&self) -> Price {
        self.bar.as_ref().map(|b| b.low).unwrap_or(self.last_price)
    }

    pub fn close(&self) -> Price {
        self.bar.as_ref().map(|b| b.close).unwrap_or(self.last_price)
    }

    /// Traded volume of the current bar, if known.
    pub fn volume(&self) -> Option<f64> {
        self.bar.as_ref().map(|b| b.volume)
    }

    /// Does the snapshot carry a usable price at all?
    pub fn has_price(&self) -> bool {
        self.last_price > 0.0
    }
}

/// An open position as reported by the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: Symbol,
    /// Signed position size.
    pub quantity: Quantity,
    /// Average entry price.
    pub average_price: Price,
    /// Latest mark.
    pub market_price: Price,
}

impl Holding {
    /// Signed market value at the latest mark.
    pub fn market_value(&self) -> f64 {
        self.quantity * self.market_price
    }

    /// Unrealized P&L at the latest mark.
    pub fn unrealized_pnl(&self) -> f64 {
        (self.market_price - self.average_price) * self.quantity
    }
}

/// A cash balance in one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cash {
    pub currency: String,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap()
    }

    #[test]
    fn test_quote_mid() {
        let quote = Quote {
            time: ts(),
            bid_px: 100.0,
            bid_sz: 1.0,
            ask_px: 100.2,
            ask_sz: 1.0,
        };
        assert_relative_eq!(quote.mid(), 100.1);
        assert_relative_eq!(quote.spread(), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_snapshot_prices_fall_back_to_last() {
        let snap = SecuritySnapshot::from_price("SPY", ts(), 470.0);
        assert_eq!(snap.ask_price(), 470.0);
        assert_eq!(snap.bid_price(), 470.0);
        assert_eq!(snap.high(), 470.0);
        assert!(snap.volume().is_none());
    }

    #[test]
    fn test_snapshot_uses_quote_sides() {
        let snap = SecuritySnapshot::from_price("SPY", ts(), 470.0).with_quote(Quote {
            time: ts(),
            bid_px: 469.9,
            bid_sz: 10.0,
            ask_px: 470.1,
            ask_sz: 10.0,
        });
        assert_eq!(snap.ask_price(), 470.1);
        assert_eq!(snap.bid_price(), 469.9);
    }

    #[test]
    fn test_holding_value() {
        let holding = Holding {
            symbol: "SPY".into(),
            quantity: -10.0,
            average_price: 100.0,
            market_price: 95.0,
        };
        assert_relative_eq!(holding.market_value(), -950.0);
        assert_relative_eq!(holding.unrealized_pnl(), 50.0);
    }

    #[test]
    fn test_session_open() {
        assert!(SessionState::Opening.is_open());
        assert!(SessionState::Closing.is_open());
        assert!(!SessionState::Closed.is_open());
    }
}
