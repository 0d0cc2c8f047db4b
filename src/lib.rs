//! # frontierq
//!
//! Crawl frontier queue: the component of a web crawler that decides which
//! URL (or other keyed item) is fetched next.
//!
//! Items are ordered by priority with FIFO ties, deduplicated by a
//! fingerprint of their canonical key, handed to workers under time-bounded
//! leases, and recovered by a reaper when a worker disappears. Two backends
//! implement the same [`queue::FrontierQueue`] contract: an in-process queue
//! and a Postgres-backed queue that any number of processes can share.
//! OpenTelemetry observability is wired through [`telemetry`].

pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod memory;
pub mod model;
pub mod queue;
pub mod reaper;
pub mod telemetry;
