//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout and trace layers)
//!     → api/ (auth, handlers)
//!     → Registry (memory) then Storage (store)
//!     → JSON response
//! ```

pub mod server;

pub use server::HttpServer;
