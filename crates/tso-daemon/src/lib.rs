//! tso-daemon - Timestamp Oracle service library
//!
//! This library provides the leader-side timestamp oracle: a service
//! component that allocates strictly monotonic, globally unique 64-bit
//! timestamps at high throughput, backed by a durable save point so that no
//! timestamp is ever reissued across crashes or leader changes.
//!
//! # Modules
//!
//! - [`oracle`]: the allocator itself (sync, advance, reset, allocate)
//! - [`advancer`]: the background task driving the periodic advance tick
//! - [`config`]: oracle and daemon configuration
//! - [`metrics`]: Prometheus metrics for oracle observability

pub mod advancer;
pub mod config;
pub mod metrics;
pub mod oracle;
