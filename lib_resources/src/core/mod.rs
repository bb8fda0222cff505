//! # Core Engine Module
//!
//! This module holds the resource-sharing engine: the value model requests are
//! keyed by, the per-request lifecycle state machine, the manager that maps
//! requests to records, and the lifecycle event fan-out.
//!
//! ## Core Components:
//!
//! - **`value`**: the dynamic request/response [`Value`] and the total order
//!   ([`compare`]) that makes structurally equal requests share one record.
//!
//! - **`shared_resource`**: a reference-counted, lazily created value with a
//!   "linger" grace period after its last release, retry backoff after
//!   failures, and stale-completion protection across retries and refreshes.
//!
//! - **`manager`**: the [`ResourceManager`]. It deduplicates requests, diffs
//!   each listener's request set against what it already holds, and reports
//!   the lifecycle of every record.
//!
//! - **`events`**: non-blocking fan-out of `create`, `ready`, `error` and
//!   `delete` events to any number of subscribers.

/// Lifecycle event types and their dispatcher.
pub mod events;
/// Request deduplication and listener bookkeeping.
pub mod manager;
/// The per-request lifecycle state machine.
pub mod shared_resource;
/// Dynamic values and their total order.
pub mod value;

// --- Public API Re-exports ---
pub use events::{EventDispatcher, EventKind, LifecycleEvent};
pub use manager::{RequestMeta, Requested, ResourceFactory, ResourceManager};
pub use shared_resource::{
    Completion, Reference, ResourceStatus, ResourceValue, SharedResource, SharedResourceBuilder,
    StopHandle,
};
pub use value::{compare, Value};
