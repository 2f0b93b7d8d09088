//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → recorder, context store, aggregator
//!     → breakers per dependency (registered) → dashboard query service
//!     → background tasks → admin listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → tasks exit their loops → drain (bounded)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
pub use startup::{Monitor, StartupError};
