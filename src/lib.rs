//! change_monitor Library
//!
//! Watches web pages and JSON endpoints for changes and sends a notification
//! when the watched part of a page differs from what was seen last time.
//!
//! ## Architecture
//!
//! The codebase is organized into modules:
//! - `config`: process settings from the environment and the JSON config file
//! - `logging`: structured logging with tracing
//! - `storage`: last-seen content per monitor
//! - `fetch`: direct HTTP and headless-browser content fetch
//! - `monitors`: monitor configuration, extraction, change detection, scheduling
//!   and the `MonitorService` registry
//! - `alerts`: notification fan-out to Telegram and Mailgun

pub mod alerts;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod monitors;
pub mod storage;

pub use error::{Error, Result};
pub use logging::init_tracing;
pub use monitors::service::MonitorService;
pub use monitors::{Monitor, MonitorConfig, MonitorSummary, Selector};
