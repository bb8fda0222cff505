//! # Manager Configuration
//!
//! A resource lingers for `cleanup_delay` after its last reference is released,
//! or for `cleanup_delay_on_error` when its last creation attempt failed. The
//! error delay also bounds how long a failure is served from cache before the
//! next `require()` retries.
//!
//! Both delays may be fixed or derived from the request, so that e.g. cheap
//! queries can be dropped sooner than expensive subscriptions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::value::Value;

/// Default grace period before an unused resource is torn down.
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(60);
/// Default grace period for failed resources, and their retry backoff.
pub const DEFAULT_CLEANUP_DELAY_ON_ERROR: Duration = Duration::from_secs(1);

/// A delay that is either constant or a function of the request.
#[derive(Clone)]
pub enum CleanupDelay {
    /// The same delay for every request.
    Fixed(Duration),
    /// A delay computed from the request.
    PerRequest(Arc<dyn Fn(&Value) -> Duration + Send + Sync>),
}

impl CleanupDelay {
    /// Wraps a function of the request.
    pub fn per_request<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Duration + Send + Sync + 'static,
    {
        CleanupDelay::PerRequest(Arc::new(f))
    }

    /// The delay that applies to `request`.
    pub fn resolve(&self, request: &Value) -> Duration {
        match self {
            CleanupDelay::Fixed(delay) => *delay,
            CleanupDelay::PerRequest(f) => f(request),
        }
    }
}

impl From<Duration> for CleanupDelay {
    fn from(delay: Duration) -> Self {
        CleanupDelay::Fixed(delay)
    }
}

impl fmt::Debug for CleanupDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            CleanupDelay::PerRequest(_) => f.write_str("PerRequest(..)"),
        }
    }
}

/// Configuration of a [`ResourceManager`](crate::core::manager::ResourceManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Grace period after the last release.
    pub cleanup_delay: CleanupDelay,
    /// Grace period after the last release of a failed resource, and the
    /// minimum age of a cached failure before it is retried.
    pub cleanup_delay_on_error: CleanupDelay,
}

impl ManagerConfig {
    /// Sets the regular cleanup delay.
    pub fn with_cleanup_delay(mut self, delay: impl Into<CleanupDelay>) -> Self {
        self.cleanup_delay = delay.into();
        self
    }

    /// Sets the cleanup delay for failed resources.
    pub fn with_cleanup_delay_on_error(mut self, delay: impl Into<CleanupDelay>) -> Self {
        self.cleanup_delay_on_error = delay.into();
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cleanup_delay: CleanupDelay::Fixed(DEFAULT_CLEANUP_DELAY),
            cleanup_delay_on_error: CleanupDelay::Fixed(DEFAULT_CLEANUP_DELAY_ON_ERROR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_fixed_and_computed_delays() {
        let config = ManagerConfig::default()
            .with_cleanup_delay(CleanupDelay::per_request(|request| {
                match request.get("type") {
                    Some(Value::String(kind)) if kind == "query" => Duration::from_secs(5),
                    _ => Duration::from_secs(30),
                }
            }))
            .with_cleanup_delay_on_error(Duration::from_millis(250));

        let query = Value::object([("type", "query")]);
        let subscription = Value::object([("type", "subscription")]);
        assert_eq!(config.cleanup_delay.resolve(&query), Duration::from_secs(5));
        assert_eq!(config.cleanup_delay.resolve(&subscription), Duration::from_secs(30));
        assert_eq!(config.cleanup_delay_on_error.resolve(&query), Duration::from_millis(250));
    }

    #[test]
    fn defaults_to_a_minute_and_a_second() {
        let config = ManagerConfig::default();
        assert_eq!(config.cleanup_delay.resolve(&Value::Null), Duration::from_secs(60));
        assert_eq!(config.cleanup_delay_on_error.resolve(&Value::Null), Duration::from_secs(1));
    }
}
