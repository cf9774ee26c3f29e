//! Service registry and client-side load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   SERVICE CENTER                     │
//!                    │                                                      │
//!   API request      │  ┌─────────┐    ┌──────────┐    ┌─────────────────┐  │
//!   ─────────────────┼─▶│  http   │───▶│   api    │───▶│    registry     │  │
//!                    │  │ server  │    │ handlers │    │ service → Arc<  │  │
//!                    │  └─────────┘    └────┬─────┘    │   Cluster>      │  │
//!                    │                      │          └───────┬─────────┘  │
//!                    │                      ▼                  ▼            │
//!                    │               ┌────────────┐    ┌─────────────────┐  │
//!   ┌──────────┐     │               │  storage   │    │    cluster      │  │
//!   │ KV store │◀────┼───────────────│  mediator  │    │ wr / wrr / swrr │  │
//!   │          │─────┼── watch ─────▶│            │    └───────┬─────────┘  │
//!   └──────────┘     │               └─────▲──────┘            │ expired    │
//!                    │                     │ clean             ▼            │
//!                    │               ┌─────┴──────────────────────────────┐ │
//!                    │               │     eviction queue + worker        │ │
//!                    │               └────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────────────┘
//! ```

// Core
pub mod cluster;
pub mod error;
pub mod eviction;
pub mod registry;
pub mod storage;

// Surfaces
pub mod api;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use cluster::{Algorithm, Cluster, Node, ServiceConfig};
pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use lifecycle::Shutdown;
pub use registry::Registry;
pub use storage::{KvBackend, MemoryBackend, Storage};
