//! DNS Resolution Module
//!
//! Provides the CNAME-chain and A-record lookups behind domain analysis,
//! with two independent persisted TTL caches (A records: 1 hour, CNAME
//! chains: 24 hours).
//!
//! # Architecture
//!
//! The `Resolve` trait is the core abstraction: it answers a single CNAME
//! step and an A-record query, nothing more. `HickoryResolve` is the
//! production implementation; tests inject static answers. `DnsResolver`
//! wraps any `Resolve` with chain following, cycle detection, negative
//! caching, and the dual persisted caches.
//!
//! # Failure model
//!
//! DNS errors never propagate: NXDOMAIN, NOANSWER, and transport errors
//! all become "no chain, empty IP set" and are cached negatively so the
//! same dead name is not queried twice.

mod hickory;
mod resolve;
mod resolver;
mod ttl_cache;

pub use hickory::HickoryResolve;
pub use resolve::{Resolve, Resolving, StaticResolve};
pub use resolver::{DnsResolver, A_RECORD_TTL_SECS, CNAME_CHAIN_TTL_SECS, CNAME_FLUSH_EVERY};
pub use ttl_cache::TtlCache;
