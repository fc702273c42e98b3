//! Prometheus exporter for Fail2ban.
//!
//! Polls the Fail2ban control channel on a fixed interval and exposes per-jail
//! ban and failure counters via an HTTP `/metrics` endpoint. The exporter is
//! read-only; it never bans or unbans anything.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Poll Scheduler  │────>│   Jail Client   │────>│ fail2ban-client │
//! │   (interval)    │     │   (per jail)    │     │  (control sock) │
//! └────────┬────────┘     └─────────────────┘     └─────────────────┘
//!          │ publish
//!          v
//! ┌─────────────────┐     ┌─────────────────┐
//! │ Snapshot Store  │<────│   HTTP Server   │
//! │  (atomic swap)  │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! Scrapes only read the latest published [`Snapshot`]; they never wait on
//! Fail2ban. A failed poll keeps the previous snapshot, and availability is
//! reported through the `fail2ban_up` gauge rather than HTTP status codes.
//!
//! # Usage
//!
//! ```bash
//! prometheus-f2b-exporter --config exporter.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod config;
pub mod error;
pub mod exit;
pub mod http;
pub mod logging;
pub mod render;
pub mod scheduler;
pub mod snapshot;
pub mod store;

pub use client::{Fail2banClient, JailClient};
pub use config::ExporterConfig;
pub use error::{BuildFailure, ClientError, ErrorKind, JailQueryError};
pub use http::HttpServer;
pub use render::Renderer;
pub use scheduler::{CycleOutcome, PollScheduler, SchedulerState, TickOutcome};
pub use snapshot::{CollectionError, JailFilter, JailRecord, Snapshot, SnapshotBuilder};
pub use store::{PollStatus, SharedStore, SnapshotStore};
