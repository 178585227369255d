//! Market data snapshot provider.

use std::collections::HashMap;

use parking_lot::RwLock;
use simbroker_core::{SecuritySnapshot, Symbol};

/// Source of the latest snapshot for each tracked security.
///
/// `None` means the security is no longer tracked; pending orders on it are
/// invalidated by the scanner.
pub trait MarketDataProvider: Send + Sync {
    fn snapshot(&self, symbol: &str) -> Option<SecuritySnapshot>;
}

/// In-memory snapshot store fed by the simulation host.
#[derive(Debug, Default)]
pub struct InMemoryMarketData {
    snapshots: RwLock<HashMap<Symbol, SecuritySnapshot>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for the snapshot's symbol.
    pub fn update(&self, snapshot: SecuritySnapshot) {
        self.snapshots
            .write()
            .insert(snapshot.symbol.clone(), snapshot);
    }

    /// Stop tracking a security.
    pub fn remove(&self, symbol: &str) -> Option<SecuritySnapshot> {
        self.snapshots.write().remove(symbol)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.snapshots.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl MarketDataProvider for InMemoryMarketData {
    fn snapshot(&self, symbol: &str) -> Option<SecuritySnapshot> {
        self.snapshots.read().get(symbol).cloned()
    }
}
