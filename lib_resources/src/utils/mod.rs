//! # Utilities Module
//!
//! Small building blocks the resource core is assembled from.
//!
//! - **`once`**: a single-use guard. Release handles and completion callbacks
//!   use it so a second call is silently ignored.
//! - **`debounce`**: plain and keyed debouncers backed by cancellable Tokio
//!   timers. Cleanup grace periods and scheduled listener updates run on it.
//! - **`ids`**: per-instance id sequences and prefixed string id generators.

/// Cancellable, coalescing timers.
pub mod debounce;
/// Resource ids and id generators.
pub mod ids;
/// At-most-once guard.
pub mod once;

pub use debounce::{Debouncer, KeyedDebouncer};
pub use ids::{IdGenerator, ResourceId, Sequence};
pub use once::Once;
