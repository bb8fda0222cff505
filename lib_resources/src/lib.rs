//! # lib_resources
//!
//! Shares asynchronously created resources (subscriptions, queries, remote
//! lookups) between many consumers. Structurally equal requests resolve to one
//! record; the record is created on first use, kept alive for a grace period
//! after its last user leaves, and torn down afterwards.
//!
//! ```no_run
//! use lib_resources::{ManagerConfig, ResourceManager, StopHandle, Value};
//!
//! # async fn demo() {
//! let manager = ResourceManager::new(
//!     |request: &Value, _meta: lib_resources::RequestMeta, done: lib_resources::Completion| -> Box<dyn StopHandle> {
//!         done.resolve(request.clone());
//!         Box::new(|_refresh_only: bool| {})
//!     },
//!     ManagerConfig::default(),
//! );
//! let slots = manager.update_requests("listener", &[Some(Value::from("quotes"))]);
//! let value = slots[0].value.get().await;
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Manager configuration and its file/environment loaders.
pub mod configs;
/// The resource-sharing engine.
pub mod core;
/// Error types.
pub mod error;
/// Timers, guards and id sequences.
pub mod utils;

pub use crate::configs::{CleanupDelay, ManagerConfig};
#[cfg(feature = "configs")]
pub use crate::configs::{ConfigError, ManagerSettings};
pub use crate::core::{
    compare, Completion, EventKind, LifecycleEvent, Reference, RequestMeta, Requested,
    ResourceFactory, ResourceManager, ResourceStatus, ResourceValue, SharedResource, StopHandle,
    Value,
};
pub use crate::error::{CreationError, ResourceError};
pub use crate::utils::{IdGenerator, ResourceId};
