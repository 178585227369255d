//! Core types and configuration for the simulated brokerage.
//!
//! This crate provides shared types used across the workspace:
//! - Orders, order kinds, statuses and order events
//! - Market data snapshots (quotes, bars, session state)
//! - Account value types (holdings, cash)
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod order;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use order::*;
pub use types::*;
