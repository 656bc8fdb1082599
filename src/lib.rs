//! # keyhub
//!
//! Electronic key orchestration: vendor adapters, catalog routing, the key
//! lifecycle and the HTTP surface that exposes them.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod repositories;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod validation;
pub use migration;
