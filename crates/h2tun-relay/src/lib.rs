//! Byte relay and shutdown plumbing shared by the gateway and the client
//!
//! - [`bridge`] copies bytes both ways between two endpoints until one side
//!   finishes, then closes the other.
//! - [`ShutdownSignal`] is the one-shot cancellation event observed by the
//!   listeners.
//! - [`AcceptFailures`] decides when a failing accept loop should give up.
//! - [`TaskTracker`] keeps connection and session tasks joinable so that a
//!   shutdown can wait for them with a bounded grace period.

mod accept;
mod bridge;
mod shutdown;
mod task_tracker;

pub use accept::{
    is_connection_error, AcceptFailures, ACCEPT_ERROR_BACKOFF, MAX_CONSECUTIVE_ACCEPT_ERRORS,
};
pub use bridge::{bridge, RelayOutcome, RelayReport};
pub use shutdown::{ShutdownSignal, DEFAULT_SHUTDOWN_GRACE};
pub use task_tracker::{DrainOutcome, TaskTracker};
