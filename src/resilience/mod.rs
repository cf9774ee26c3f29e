//! Resilience helpers for store interactions.
//!
//! # Data Flow
//! ```text
//! Storage call:
//!     → timeouts.rs (every backend call has a deadline)
//!
//! Watch stream lost:
//!     → backoff.rs (exponential delay with jitter before resubscribing)
//! ```

pub mod backoff;
pub mod timeouts;
