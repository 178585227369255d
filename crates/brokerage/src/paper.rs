//! Paper trading driver.
//!
//! Runs scan passes on a background thread against a wall clock. The thread
//! sleeps on the brokerage's condition variable until an order is placed or
//! updated, then scans once per `interval` while orders remain pending.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use simbroker_core::Result;
use tracing::{debug, info, warn};

use crate::brokerage::SimulatedBrokerage;

/// Upper bound on one idle wait, which bounds how long `stop` can take.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl Shutdown {
    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `interval` unless stopped first. Returns true when stopped.
    fn wait(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.signal.wait_for(&mut stopped, interval);
        }
        *stopped
    }
}

/// Background scan loop for paper trading.
pub struct PaperTradingLoop {
    brokerage: Arc<SimulatedBrokerage>,
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl PaperTradingLoop {
    /// Start the loop. `clock` supplies the simulation time for each pass.
    pub fn spawn<C>(brokerage: Arc<SimulatedBrokerage>, interval: Duration, clock: C) -> Result<Self>
    where
        C: Fn() -> DateTime<Utc> + Send + 'static,
    {
        let shutdown = Arc::new(Shutdown::default());
        let thread_brokerage = brokerage.clone();
        let thread_shutdown = shutdown.clone();

        let handle = thread::Builder::new()
            .name("paper-trading".to_string())
            .spawn(move || run(&thread_brokerage, &thread_shutdown, interval, clock))?;

        info!(interval_ms = interval.as_millis() as u64, "paper trading loop started");
        Ok(Self {
            brokerage,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        *self.shutdown.stopped.lock() = true;
        self.shutdown.signal.notify_all();
        self.brokerage.wake_waiters();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("paper trading thread panicked");
            }
            info!("paper trading loop stopped");
        }
    }
}

impl Drop for PaperTradingLoop {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run<C>(brokerage: &SimulatedBrokerage, shutdown: &Shutdown, interval: Duration, clock: C)
where
    C: Fn() -> DateTime<Utc>,
{
    while !shutdown.is_stopped() {
        if !brokerage.wait_for_work(interval.min(MAX_IDLE_WAIT)) {
            continue;
        }
        let now = clock();
        debug!(time = %now, "paper scan");
        brokerage.scan(now);
        if shutdown.wait(interval) {
            break;
        }
    }
}
