//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registry, storage, eviction, API produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or compact)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Metric calls are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
