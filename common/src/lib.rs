#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, future_incompatible)]
//! Common settings and utilities for the provider-resilience workspace
//!
//! This crate holds the ambient pieces every service binary needs: service
//! settings read from the environment, the configuration validation error
//! type, and tracing subscriber setup.

pub mod config;
pub mod errors;
pub mod telemetry;

pub use config::*;
pub use errors::*;
pub use telemetry::*;
