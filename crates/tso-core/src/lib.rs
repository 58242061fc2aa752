//! tso-core - Timestamp Oracle domain library
//!
//! This crate holds the domain types and external-collaborator interfaces
//! consumed by the oracle service in `tso-daemon`:
//!
//! - [`timestamp`]: the `(physical, logical)` timestamp pair and its packed
//!   64-bit wire codec
//! - [`clock`]: the wall clock seam used by the oracle
//! - [`store`]: the durable key-value store interface with leader-conditional
//!   writes, plus in-memory and `SQLite`-backed implementations
//! - [`election`]: the leadership interface consumed on every durable write
//!   and allocation

pub mod clock;
pub mod election;
pub mod store;
pub mod timestamp;
