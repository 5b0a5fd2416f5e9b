//! Diagnostic HTTP surface: CPU/heap profiling endpoints and a Prometheus
//! `/metrics` route. Not part of the wire-protocol data plane.

pub mod http_handler;
pub mod http_server;
