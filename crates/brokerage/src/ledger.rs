//! Order ledger: canonical order copies and the pending set.
//!
//! The ledger keeps its own clone of every order ever placed. Orders leave
//! the pending set once they reach a terminal status but stay in the history.

use std::collections::{BTreeMap, BTreeSet};

use simbroker_core::{Order, OrderEvent, OrderId, OrderKind, OrderStatus};

/// Canonical store of orders.
#[derive(Debug, Default)]
pub struct OrderLedger {
    orders: BTreeMap<OrderId, Order>,
    pending: BTreeSet<OrderId>,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a clone of a new order as `Submitted`.
    ///
    /// Returns false if the order's status is not `New` or its id was seen before.
    pub fn place(&mut self, order: &Order) -> bool {
        if order.status != OrderStatus::New || self.orders.contains_key(&order.id) {
            return false;
        }
        let mut stored = order.clone();
        stored.status = OrderStatus::Submitted;
        self.pending.insert(stored.id);
        self.orders.insert(stored.id, stored);
        true
    }

    /// Apply an update to a pending order. Returns the stored order after the update.
    pub fn update(&mut self, order: &Order) -> Option<&Order> {
        if !self.pending.contains(&order.id) {
            return None;
        }
        let stored = self.orders.get_mut(&order.id)?;
        stored.apply_update(order);
        Some(stored)
    }

    /// Cancel a pending order. Returns the canceled order.
    pub fn cancel(&mut self, id: OrderId) -> Option<&Order> {
        if !self.pending.remove(&id) {
            return None;
        }
        let stored = self.orders.get_mut(&id)?;
        stored.status = OrderStatus::Canceled;
        Some(stored)
    }

    /// Commit an event to the stored order.
    ///
    /// Illegal transitions (anything out of a terminal status) are ignored
    /// and return false.
    pub fn apply(&mut self, event: &OrderEvent) -> bool {
        let Some(order) = self.orders.get_mut(&event.order_id) else {
            return false;
        };
        if !order.status.can_transition_to(event.status) {
            return false;
        }
        order.status = event.status;
        order.filled_quantity += event.fill_quantity;
        if event.status.is_terminal() {
            self.pending.remove(&event.order_id);
        }
        true
    }

    /// Persist kind-level state changed during evaluation (stop trigger).
    pub fn set_kind(&mut self, id: OrderId, kind: OrderKind) {
        if let Some(order) = self.orders.get_mut(&id) {
            order.kind = kind;
        }
    }

    /// Drop an id from the pending set without touching the stored order.
    pub fn remove_pending(&mut self, id: OrderId) -> bool {
        self.pending.remove(&id)
    }

    /// Pending ids in ascending order.
    pub fn pending_ids(&self) -> Vec<OrderId> {
        self.pending.iter().copied().collect()
    }

    pub fn is_pending(&self, id: OrderId) -> bool {
        self.pending.contains(&id)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Any order ever placed, terminal ones included.
    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.pending
            .iter()
            .filter_map(|id| self.orders.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
