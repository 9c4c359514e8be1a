//! medsync — offline cache & sync engine for the MedStudy app.
//!
//! Sits between the application layer and its remote API, serving cached
//! data when the network is unavailable, queueing failed writes for later
//! replay, and reconciling state once connectivity returns.
//!
//! - [`cache`]: versioned, region-partitioned response store
//! - [`router`]: per-request strategy selection (cache-first,
//!   network-first, default)
//! - [`queue`]: durable offline write queue with drain/replay
//! - [`notify`]: study reminder scheduling
//! - [`lifecycle`]: install/activate/supersede of cache versions
//! - [`engine`]: the context object tying it all together

pub mod cache;
pub mod config;
pub mod engine;
pub mod event;
pub mod lifecycle;
pub mod net;
pub mod notify;
pub mod queue;
pub mod router;
