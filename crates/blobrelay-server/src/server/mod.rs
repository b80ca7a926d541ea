//! Relay server internals.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration (`CliArgs`, `ServerConfig`).
//! - [`store`] - record store and id generator contracts, in-memory store.
//! - [`streaming`] - per-call pipelines and the call scope.
//! - [`service`] - gRPC service entry point and call accounting.
//! - [`lifecycle`] - bind, serve, drain and force stop.
//! - [`telemetry`] - logging and optional OpenTelemetry export.

pub mod config;
pub mod lifecycle;
pub mod service;
pub mod store;
pub mod streaming;
pub mod telemetry;
