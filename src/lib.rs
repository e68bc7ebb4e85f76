//! `mmin` — an HTTP/1.x load generator: a bulk-preallocated connection pool,
//! a QPS-limited worker pipeline, and a streaming-quantile aggregator.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod connection;
pub mod control_server;
pub mod controller;
pub mod error;
pub mod http1;
pub mod limiter;
pub mod multipart;
pub mod params;
pub mod pool;
pub mod remote;
pub mod report;
pub mod template;
pub mod tls;
pub mod uri;
pub mod worker;
