//! gRPC service implementation and call accounting.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`RelayService`).
//! - [`tracker`] - in-flight call guards, draining and force stop.

pub mod handler;
pub mod tracker;
