//! # Services module
//!
//! This module provide services to interact with kubernetes, the configuration
//! and telemetry helpers.
pub mod cfg;
pub mod crd;
pub mod http;
pub mod k8s;
pub mod telemetry;
