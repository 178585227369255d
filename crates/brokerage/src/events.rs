//! Order event stream and fault reporting.

use std::sync::Arc;

use parking_lot::Mutex;
use simbroker_core::{OrderEvent, OrderId, OrderStatus};
use tracing::{debug, error, info, warn};

/// Subscriber to the order event stream.
///
/// Handlers run synchronously while the brokerage lock is held, so they must
/// not call back into the brokerage.
pub trait OrderEventHandler: Send + Sync {
    fn on_order_event(&self, event: &OrderEvent);
}

impl<F> OrderEventHandler for F
where
    F: Fn(&OrderEvent) + Send + Sync,
{
    fn on_order_event(&self, event: &OrderEvent) {
        self(event)
    }
}

/// Fans out order events to subscribers in registration order.
#[derive(Default)]
pub struct EventEmitter {
    handlers: Vec<Arc<dyn OrderEventHandler>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Arc<dyn OrderEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn emit(&self, event: &OrderEvent) {
        match event.status {
            OrderStatus::Invalid => warn!(
                order_id = %event.order_id,
                symbol = %event.symbol,
                message = event.message.as_deref().unwrap_or(""),
                "order invalidated"
            ),
            OrderStatus::Filled | OrderStatus::PartiallyFilled => info!(
                order_id = %event.order_id,
                symbol = %event.symbol,
                status = %event.status,
                price = event.fill_price,
                quantity = event.fill_quantity,
                fee = event.fee,
                "order filled"
            ),
            OrderStatus::Canceled => info!(
                order_id = %event.order_id,
                symbol = %event.symbol,
                message = event.message.as_deref().unwrap_or(""),
                "order canceled"
            ),
            _ => debug!(
                order_id = %event.order_id,
                symbol = %event.symbol,
                status = %event.status,
                update = event.is_update,
                "order event"
            ),
        }
        for handler in &self.handlers {
            handler.on_order_event(event);
        }
    }
}

/// Handler that records every event it sees.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<OrderEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        self.events.lock().clone()
    }

    /// Events for one order, oldest first.
    pub fn for_order(&self, id: OrderId) -> Vec<OrderEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.order_id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl OrderEventHandler for EventLog {
    fn on_order_event(&self, event: &OrderEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Receives faults raised by user-supplied models during a scan.
pub trait ErrorChannel: Send + Sync {
    fn report(&self, order_id: OrderId, message: &str);
}

/// Forwards faults to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingErrorChannel;

impl ErrorChannel for LoggingErrorChannel {
    fn report(&self, order_id: OrderId, message: &str) {
        error!(order_id = %order_id, error = %message, "model fault during order scan");
    }
}

/// Keeps faults for later inspection.
#[derive(Debug, Default)]
pub struct RecordingErrorChannel {
    reports: Mutex<Vec<(OrderId, String)>>,
}

impl RecordingErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(OrderId, String)> {
        self.reports.lock().clone()
    }
}

impl ErrorChannel for RecordingErrorChannel {
    fn report(&self, order_id: OrderId, message: &str) {
        self.reports.lock().push((order_id, message.to_string()));
    }
}
