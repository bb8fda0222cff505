//! # Shared Resource
//!
//! A single asynchronously created value shared by any number of users.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --require--> Pending --completion--> Ready
//!                           \-------------> Errored --require after backoff--> Pending
//! any state --last release + cleanup delay--> Idle (effect stopped)
//! ```
//!
//! - `require()` bumps the user count and starts creation only from `Idle`, or
//!   from `Errored` once the failure is at least `cleanup_delay_on_error` old.
//!   A younger failure is handed out as is.
//! - `release()` is idempotent per reference. When the count drops to zero a
//!   cleanup check is debounced for `cleanup_delay` (or the error delay when
//!   the last attempt failed). Reacquiring within the grace period keeps the
//!   value and its effect alive.
//! - Every creation attempt gets a fresh [`Completion`]. Only its first call
//!   counts, and only while the attempt is still the current one.
//!
//! ## Locking
//!
//! The creator and stop handles are external code and are always invoked with
//! the record lock released. The settle and destroy hooks are internal: the
//! settle hook runs under the record lock and must not call back into the
//! record.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::value::Value;
use crate::error::{CreationError, ResourceError};
use crate::utils::debounce::Debouncer;
use crate::utils::ids::ResourceId;
use crate::utils::once::Once;

/// Default grace period of a standalone resource.
pub const STANDALONE_CLEANUP_DELAY: Duration = Duration::from_secs(5);
/// Default failure grace period and retry backoff of a standalone resource.
pub const STANDALONE_CLEANUP_DELAY_ON_ERROR: Duration = Duration::from_secs(1);

/// Tears down the external effect of one creation attempt.
///
/// `refresh_only` is `true` when the effect is being replaced by a new attempt
/// for the same record, and `false` when the record itself goes away.
pub trait StopHandle: Send {
    /// Stops the effect.
    fn stop(&mut self, refresh_only: bool);
}

impl<F> StopHandle for F
where
    F: FnMut(bool) + Send,
{
    fn stop(&mut self, refresh_only: bool) {
        self(refresh_only)
    }
}

type CreateFn = dyn Fn(Completion) -> Box<dyn StopHandle> + Send + Sync;
type SettleHook = dyn Fn(ResourceId, &Result<Arc<Value>, CreationError>) + Send + Sync;
type DestroyHook = dyn Fn(ResourceId) + Send + Sync;

/// Coarse state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Nothing in flight, nothing cached.
    Idle,
    /// A creation attempt is in flight.
    Pending,
    /// The last attempt produced a value.
    Ready,
    /// The last attempt failed.
    Errored,
}

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Ready(Arc<Value>),
    Failed(CreationError),
}

enum Phase {
    Idle,
    Pending,
    Ready(Arc<Value>),
    Errored { error: CreationError, at: Instant },
}

struct ResourceState {
    users: usize,
    phase: Phase,
    attempt: u64,
    stop: Option<Box<dyn StopHandle>>,
    channel: Option<watch::Sender<Slot>>,
}

struct ResourceInner {
    id: ResourceId,
    create: Box<CreateFn>,
    on_settle: Option<Box<SettleHook>>,
    on_destroy: Option<Box<DestroyHook>>,
    cleanup_delay: Duration,
    cleanup_delay_on_error: Duration,
    state: Mutex<ResourceState>,
    cleanup: Debouncer,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(mut stop) = state.stop.take() {
                stop.stop(false);
            }
        }
    }
}

/// A reference-counted, lazily created, lingering resource.
///
/// Cloning yields another handle to the same record.
#[derive(Clone)]
pub struct SharedResource {
    inner: Arc<ResourceInner>,
}

/// Configures a [`SharedResource`].
pub struct SharedResourceBuilder {
    id: ResourceId,
    create: Box<CreateFn>,
    on_settle: Option<Box<SettleHook>>,
    on_destroy: Option<Box<DestroyHook>>,
    cleanup_delay: Duration,
    cleanup_delay_on_error: Duration,
}

impl SharedResourceBuilder {
    /// Id reported by events and errors. Defaults to `0`.
    pub fn id(mut self, id: ResourceId) -> Self {
        self.id = id;
        self
    }

    /// Grace period after the last release.
    pub fn cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Grace period after the last release of a failed resource, and the
    /// minimum age of a failure before `require()` retries.
    pub fn cleanup_delay_on_error(mut self, delay: Duration) -> Self {
        self.cleanup_delay_on_error = delay;
        self
    }

    /// Called under the record lock whenever an attempt settles.
    pub fn on_settle<F>(mut self, hook: F) -> Self
    where
        F: Fn(ResourceId, &Result<Arc<Value>, CreationError>) + Send + Sync + 'static,
    {
        self.on_settle = Some(Box::new(hook));
        self
    }

    /// Called without the record lock after the record was torn down.
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(ResourceId) + Send + Sync + 'static,
    {
        self.on_destroy = Some(Box::new(hook));
        self
    }

    /// Builds the resource in the `Idle` state.
    pub fn build(self) -> SharedResource {
        SharedResource {
            inner: Arc::new(ResourceInner {
                id: self.id,
                create: self.create,
                on_settle: self.on_settle,
                on_destroy: self.on_destroy,
                cleanup_delay: self.cleanup_delay,
                cleanup_delay_on_error: self.cleanup_delay_on_error,
                state: Mutex::new(ResourceState {
                    users: 0,
                    phase: Phase::Idle,
                    attempt: 0,
                    stop: None,
                    channel: None,
                }),
                cleanup: Debouncer::new(),
            }),
        }
    }
}

/// A creation attempt that still has to be started.
///
/// Produced while locks are held, run after they are released.
#[must_use]
pub(crate) struct Launch {
    resource: SharedResource,
    attempt: u64,
    previous: Option<Box<dyn StopHandle>>,
}

impl Launch {
    pub(crate) fn run(self) {
        if let Some(mut previous) = self.previous {
            previous.stop(true);
        }
        self.resource.start(self.attempt);
    }
}

impl SharedResource {
    /// Starts configuring a resource created by `create`.
    ///
    /// `create` receives the [`Completion`] of one attempt and returns the
    /// handle that stops that attempt's effect.
    pub fn builder<F>(create: F) -> SharedResourceBuilder
    where
        F: Fn(Completion) -> Box<dyn StopHandle> + Send + Sync + 'static,
    {
        SharedResourceBuilder {
            id: ResourceId(0),
            create: Box::new(create),
            on_settle: None,
            on_destroy: None,
            cleanup_delay: STANDALONE_CLEANUP_DELAY,
            cleanup_delay_on_error: STANDALONE_CLEANUP_DELAY_ON_ERROR,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.inner.state.lock().expect("Resource lock poisoned")
    }

    /// The record id.
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Number of live references.
    pub fn users(&self) -> usize {
        self.lock().users
    }

    /// Current state.
    pub fn status(&self) -> ResourceStatus {
        match self.lock().phase {
            Phase::Idle => ResourceStatus::Idle,
            Phase::Pending => ResourceStatus::Pending,
            Phase::Ready(_) => ResourceStatus::Ready,
            Phase::Errored { .. } => ResourceStatus::Errored,
        }
    }

    /// `true` when nothing is in flight and nothing is cached.
    pub fn is_clean(&self) -> bool {
        matches!(self.lock().phase, Phase::Idle)
    }

    /// Takes a reference, starting creation if needed.
    ///
    /// Never blocks; creation failures are delivered through the returned
    /// reference's value.
    pub fn require(&self) -> Reference {
        let (reference, launch) = self.acquire();
        if let Some(launch) = launch {
            launch.run();
        }
        reference
    }

    /// Like [`require`](Self::require), but leaves starting creation to the
    /// caller so it can happen outside the caller's own locks.
    pub(crate) fn acquire(&self) -> (Reference, Option<Launch>) {
        let mut state = self.lock();
        state.users += 1;
        let start = match &state.phase {
            Phase::Idle => true,
            Phase::Errored { at, .. } => at.elapsed() >= self.inner.cleanup_delay_on_error,
            Phase::Pending | Phase::Ready(_) => false,
        };
        let launch = if start {
            Some(self.begin_attempt(&mut state))
        } else {
            None
        };
        let value = self.current_value(&state);
        drop(state);
        (
            Reference {
                resource: self.clone(),
                value,
                released: Once::new(),
            },
            launch,
        )
    }

    /// Replaces the current effect with a fresh creation attempt, keeping the
    /// user count and every reference intact.
    ///
    /// Repeated refreshes do not coalesce: each one supersedes the previous
    /// attempt, whose completion is then ignored. Refreshing a resource nobody
    /// uses restarts its cleanup grace period.
    pub fn refresh(&self) -> ResourceValue {
        let (launch, value) = {
            let mut state = self.lock();
            let launch = self.begin_attempt(&mut state);
            if state.users == 0 {
                self.schedule_cleanup(&state);
            }
            (launch, self.current_value(&state))
        };
        log::debug!("Refreshing resource {}", self.inner.id);
        launch.run();
        value
    }

    /// Tears the resource down if nobody uses it. Returns `true` if it did.
    pub fn maybe_cleanup(&self) -> bool {
        let stop = {
            let mut state = self.lock();
            if state.users > 0 {
                return false;
            }
            self.inner.cleanup.cancel();
            state.phase = Phase::Idle;
            // Invalidates the completion of whatever is still in flight.
            state.attempt += 1;
            state.channel = None;
            state.stop.take()
        };
        log::debug!("Cleaning up resource {}", self.inner.id);
        if let Some(mut stop) = stop {
            stop.stop(false);
        }
        if let Some(hook) = &self.inner.on_destroy {
            hook(self.inner.id);
        }
        true
    }

    fn begin_attempt(&self, state: &mut ResourceState) -> Launch {
        state.attempt += 1;
        state.phase = Phase::Pending;
        match &state.channel {
            Some(tx) => {
                tx.send_replace(Slot::Pending);
            }
            None => {
                let (tx, _) = watch::channel(Slot::Pending);
                state.channel = Some(tx);
            }
        }
        Launch {
            resource: self.clone(),
            attempt: state.attempt,
            previous: state.stop.take(),
        }
    }

    fn current_value(&self, state: &ResourceState) -> ResourceValue {
        match &state.channel {
            Some(tx) => ResourceValue::watching(self.inner.id, tx.subscribe()),
            None => ResourceValue::settled(Err(ResourceError::Destroyed { id: self.inner.id })),
        }
    }

    fn start(&self, attempt: u64) {
        let completion = Completion {
            resource: Arc::downgrade(&self.inner),
            attempt,
            once: Arc::new(Once::new()),
        };
        log::debug!("Creating resource {} (attempt {})", self.inner.id, attempt);
        let mut stop = (self.inner.create)(completion);

        let mut state = self.lock();
        if state.attempt == attempt && !matches!(state.phase, Phase::Idle) {
            state.stop = Some(stop);
            return;
        }
        drop(state);
        // Superseded or cleaned up while the creator was running.
        stop.stop(false);
    }

    fn settle(&self, attempt: u64, result: Result<Value, CreationError>) -> bool {
        let mut state = self.lock();
        if state.attempt != attempt || !matches!(state.phase, Phase::Pending) {
            log::debug!(
                "Ignoring stale completion for resource {} (attempt {})",
                self.inner.id,
                attempt
            );
            return false;
        }

        let outcome = result.map(Arc::new);
        let slot = match &outcome {
            Ok(value) => {
                state.phase = Phase::Ready(Arc::clone(value));
                Slot::Ready(Arc::clone(value))
            }
            Err(error) => {
                state.phase = Phase::Errored {
                    error: error.clone(),
                    at: Instant::now(),
                };
                Slot::Failed(error.clone())
            }
        };
        if let Some(tx) = &state.channel {
            tx.send_replace(slot);
        }
        if let Some(hook) = &self.inner.on_settle {
            hook(self.inner.id, &outcome);
        }
        true
    }

    fn release_one(&self) {
        let mut state = self.lock();
        state.users = state.users.saturating_sub(1);
        if state.users == 0 {
            self.schedule_cleanup(&state);
        }
    }

    fn schedule_cleanup(&self, state: &ResourceState) {
        let delay = match state.phase {
            Phase::Errored { .. } => self.inner.cleanup_delay_on_error,
            _ => self.inner.cleanup_delay,
        };
        let weak = Arc::downgrade(&self.inner);
        self.inner.cleanup.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                SharedResource { inner }.maybe_cleanup();
            }
        });
        log::debug!(
            "Resource {} unused, cleanup in {:?}",
            self.inner.id,
            delay
        );
    }
}

impl fmt::Debug for SharedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResource")
            .field("id", &self.inner.id)
            .field("users", &self.users())
            .field("status", &self.status())
            .finish()
    }
}

/// Completion callback of one creation attempt.
///
/// May be cloned and called from several places (e.g. a "ready" and a "stopped"
/// notification of the same subscription); only the first call has an effect.
#[derive(Clone)]
pub struct Completion {
    resource: Weak<ResourceInner>,
    attempt: u64,
    once: Arc<Once>,
}

impl Completion {
    /// Delivers the outcome of the attempt. Returns `true` if it was applied.
    pub fn complete(&self, result: Result<Value, CreationError>) -> bool {
        if !self.once.fire() {
            log::debug!("Ignoring repeated completion (attempt {})", self.attempt);
            return false;
        }
        match self.resource.upgrade() {
            Some(inner) => SharedResource { inner }.settle(self.attempt, result),
            None => false,
        }
    }

    /// Completes with a value.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.complete(Ok(value.into()))
    }

    /// Completes with a failure.
    pub fn reject(&self, error: CreationError) -> bool {
        self.complete(Err(error))
    }

    /// Whether this attempt was already completed through any clone.
    pub fn is_completed(&self) -> bool {
        self.once.has_fired()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("attempt", &self.attempt)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// One user's hold on a [`SharedResource`].
///
/// Releasing is explicit and idempotent: only the first call to
/// [`release`](Self::release) decrements the user count.
pub struct Reference {
    resource: SharedResource,
    value: ResourceValue,
    released: Once,
}

impl Reference {
    /// Id of the referenced record.
    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    /// Handle to the value as of the time the reference was taken.
    pub fn value(&self) -> ResourceValue {
        self.value.clone()
    }

    /// Gives the reference back. Returns `false` if it was already released.
    pub fn release(&self) -> bool {
        if !self.released.fire() {
            return false;
        }
        self.resource.release_one();
        true
    }

    /// Whether [`release`](Self::release) was called.
    pub fn is_released(&self) -> bool {
        self.released.has_fired()
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("id", &self.id())
            .field("released", &self.is_released())
            .finish()
    }
}

#[derive(Clone)]
enum Source {
    Settled(Result<Arc<Value>, ResourceError>),
    Watch {
        id: ResourceId,
        rx: watch::Receiver<Slot>,
    },
}

/// A future-like handle to a resource's value.
///
/// Cheap to clone. Follows the record across retries and refreshes until the
/// record is torn down.
#[derive(Clone)]
pub struct ResourceValue {
    source: Source,
}

impl ResourceValue {
    /// A handle that is already resolved to `value`.
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::settled(Ok(Arc::new(value.into())))
    }

    fn settled(result: Result<Arc<Value>, ResourceError>) -> Self {
        Self {
            source: Source::Settled(result),
        }
    }

    fn watching(id: ResourceId, rx: watch::Receiver<Slot>) -> Self {
        Self {
            source: Source::Watch { id, rx },
        }
    }

    /// The settled outcome, or `None` while creation is in flight.
    pub fn peek(&self) -> Option<Result<Arc<Value>, ResourceError>> {
        match &self.source {
            Source::Settled(result) => Some(result.clone()),
            Source::Watch { id, rx } => {
                let slot = rx.borrow().clone();
                match slot {
                    Slot::Ready(value) => Some(Ok(value)),
                    Slot::Failed(error) => Some(Err(ResourceError::Creation(error))),
                    Slot::Pending if rx.has_changed().is_err() => {
                        Some(Err(ResourceError::Destroyed { id: *id }))
                    }
                    Slot::Pending => None,
                }
            }
        }
    }

    /// Whether the outcome is known.
    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }

    /// Waits for the outcome.
    pub async fn get(&self) -> Result<Arc<Value>, ResourceError> {
        match &self.source {
            Source::Settled(result) => result.clone(),
            Source::Watch { id, rx } => {
                let mut rx = rx.clone();
                let slot = rx
                    .wait_for(|slot| !matches!(slot, Slot::Pending))
                    .await
                    .map(|slot| slot.clone());
                match slot {
                    Ok(Slot::Ready(value)) => Ok(value),
                    Ok(Slot::Failed(error)) => Err(ResourceError::Creation(error)),
                    Ok(Slot::Pending) | Err(_) => Err(ResourceError::Destroyed { id: *id }),
                }
            }
        }
    }
}

impl fmt::Debug for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceValue").field(&self.peek()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn noop_stop() -> Box<dyn StopHandle> {
        Box::new(|_refresh_only: bool| {})
    }

    /// Resolves every attempt with `1234` after `delay`.
    fn delayed(delay: Duration, cleanup: Duration) -> (SharedResource, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resource = SharedResource::builder(move |done| {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                sleep(delay).await;
                done.resolve(1234);
            });
            noop_stop()
        })
        .cleanup_delay(cleanup)
        .build();
        (resource, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn untouched_resource_stays_clean() {
        let (resource, calls) = delayed(Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(resource.users(), 0);
        assert!(resource.is_clean());
        sleep(Duration::from_secs(5)).await;
        assert!(resource.is_clean());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_user_gets_value_and_resource_lingers() {
        let (resource, calls) = delayed(Duration::from_secs(10), Duration::from_secs(10));
        let user = resource.require();
        assert_eq!(resource.users(), 1);
        assert_eq!(resource.status(), ResourceStatus::Pending);
        assert_eq!(*user.value().get().await.unwrap(), Value::from(1234));
        assert_eq!(resource.status(), ResourceStatus::Ready);

        assert!(user.release());
        assert_eq!(resource.users(), 0);
        assert!(!resource.is_clean());

        assert!(!user.release());
        assert_eq!(resource.users(), 0);

        sleep(Duration::from_secs(5)).await;
        assert!(!resource.is_clean());
        sleep(Duration::from_millis(5_001)).await;
        assert!(resource.is_clean());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reacquiring_within_grace_period_keeps_value() {
        let (resource, calls) = delayed(Duration::from_millis(10), Duration::from_secs(10));
        let first = resource.require();
        first.value().get().await.unwrap();
        first.release();

        sleep(Duration::from_secs(5)).await;
        let second = resource.require();
        sleep(Duration::from_secs(10)).await;
        assert!(!resource.is_clean());
        assert_eq!(second.value().peek().unwrap().unwrap(), Arc::new(Value::from(1234)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_release_cycles_fire_one_cleanup_at_latest_deadline() {
        let (resource, _) = delayed(Duration::from_millis(1), Duration::from_secs(10));
        resource.require().release();
        sleep(Duration::from_secs(4)).await;
        resource.require().release();
        sleep(Duration::from_secs(4)).await;
        resource.require().release();

        // First two deadlines (10s, 14s) have passed; the latest is at 18s.
        sleep(Duration::from_secs(9)).await;
        assert!(!resource.is_clean());
        sleep(Duration::from_millis(1_001)).await;
        assert!(resource.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn two_users_keep_resource_until_both_release() {
        let (resource, calls) = delayed(Duration::from_secs(10), Duration::from_secs(10));
        let users = [resource.require(), resource.require()];
        assert_eq!(resource.users(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        users[0].release();
        users[0].release();
        assert_eq!(resource.users(), 1);
        sleep(Duration::from_secs(11)).await;
        assert!(!resource.is_clean());

        users[1].release();
        assert_eq!(resource.users(), 0);
        sleep(Duration::from_millis(10_001)).await;
        assert!(resource.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_cached_until_backoff_then_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resource = SharedResource::builder(move |done| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(async move {
                sleep(Duration::from_secs(1)).await;
                if n % 2 == 1 {
                    done.reject(CreationError::new("Resource is broken [test]."));
                } else {
                    done.resolve(1234);
                }
            });
            noop_stop()
        })
        .cleanup_delay(Duration::from_secs(1))
        .cleanup_delay_on_error(Duration::from_millis(500))
        .build();

        let first = resource.require();
        let err = first.value().get().await.unwrap_err();
        assert_eq!(
            err,
            ResourceError::Creation(CreationError::new("Resource is broken [test]."))
        );
        assert_eq!(resource.status(), ResourceStatus::Errored);

        // Too early: the failure is served from cache.
        sleep(Duration::from_millis(100)).await;
        let second = resource.require();
        assert!(matches!(second.value().peek(), Some(Err(ResourceError::Creation(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(400)).await;
        let third = resource.require();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resource.users(), 3);
        assert_eq!(*third.value().get().await.unwrap(), Value::from(1234));
        // Earlier handles follow the record into the retry.
        assert_eq!(*second.value().get().await.unwrap(), Value::from(1234));
    }

    #[tokio::test(start_paused = true)]
    async fn only_first_completion_counts() {
        let resource = SharedResource::builder(|done| {
            done.resolve("first");
            done.clone().resolve("second");
            assert!(!done.reject(CreationError::new("late")));
            noop_stop()
        })
        .build();

        let user = resource.require();
        assert_eq!(*user.value().get().await.unwrap(), Value::from("first"));
        assert_eq!(resource.status(), ResourceStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_replaces_effect_and_ignores_stale_completion() {
        let stops = Arc::new(Mutex::new(Vec::new()));
        let pending = Arc::new(Mutex::new(Vec::<Completion>::new()));
        let resource = {
            let stops = Arc::clone(&stops);
            let pending = Arc::clone(&pending);
            SharedResource::builder(move |done| {
                pending.lock().unwrap().push(done);
                let stops = Arc::clone(&stops);
                Box::new(move |refresh_only: bool| stops.lock().unwrap().push(refresh_only))
            })
            .build()
        };

        let user = resource.require();
        pending.lock().unwrap()[0].resolve(1);
        assert_eq!(*user.value().get().await.unwrap(), Value::from(1));

        let refreshed = resource.refresh();
        assert_eq!(*stops.lock().unwrap(), vec![true]);
        assert_eq!(resource.users(), 1);
        assert!(refreshed.peek().is_none());

        // The first attempt's completion is spent; a stale clone cannot win.
        assert!(!pending.lock().unwrap()[0].resolve(99));
        pending.lock().unwrap()[1].resolve(2);
        assert_eq!(*refreshed.get().await.unwrap(), Value::from(2));
        assert_eq!(*user.value().get().await.unwrap(), Value::from(2));
    }

    #[tokio::test(start_paused = true)]
    async fn release_while_pending_stops_effect_after_grace_period() {
        let stops = Arc::new(Mutex::new(Vec::new()));
        let pending = Arc::new(Mutex::new(Vec::<Completion>::new()));
        let resource = {
            let stops = Arc::clone(&stops);
            let pending = Arc::clone(&pending);
            SharedResource::builder(move |done| {
                pending.lock().unwrap().push(done);
                let stops = Arc::clone(&stops);
                Box::new(move |refresh_only: bool| stops.lock().unwrap().push(refresh_only))
            })
            .cleanup_delay(Duration::from_secs(2))
            .build()
        };

        let user = resource.require();
        let value = user.value();
        user.release();
        sleep(Duration::from_millis(2_001)).await;

        assert!(resource.is_clean());
        assert_eq!(*stops.lock().unwrap(), vec![false]);
        assert_eq!(
            value.get().await.unwrap_err(),
            ResourceError::Destroyed { id: ResourceId(0) }
        );
        // Settling after teardown changes nothing.
        assert!(!pending.lock().unwrap()[0].resolve(5));
        assert!(resource.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn maybe_cleanup_respects_live_users() {
        let (resource, _) = delayed(Duration::from_millis(1), Duration::from_secs(60));
        let user = resource.require();
        assert!(!resource.maybe_cleanup());
        user.release();
        assert!(resource.maybe_cleanup());
        assert!(resource.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn refreshing_an_unused_resource_still_gets_cleaned_up() {
        let stops = Arc::new(Mutex::new(Vec::new()));
        let resource = {
            let stops = Arc::clone(&stops);
            SharedResource::builder(move |_done| {
                let stops = Arc::clone(&stops);
                Box::new(move |refresh_only: bool| stops.lock().unwrap().push(refresh_only))
            })
            .cleanup_delay(Duration::from_secs(2))
            .build()
        };

        let value = resource.refresh();
        assert_eq!(resource.users(), 0);
        assert_eq!(resource.status(), ResourceStatus::Pending);

        sleep(Duration::from_millis(2_001)).await;
        assert!(resource.is_clean());
        assert_eq!(*stops.lock().unwrap(), vec![false]);
        assert!(matches!(
            value.get().await,
            Err(ResourceError::Destroyed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn standalone_resource_lingers_for_its_own_default() {
        let resource = SharedResource::builder(|_done| noop_stop()).build();
        resource.require().release();

        sleep(STANDALONE_CLEANUP_DELAY - Duration::from_millis(1)).await;
        assert!(!resource.is_clean());
        sleep(Duration::from_millis(2)).await;
        assert!(resource.is_clean());
        assert!(STANDALONE_CLEANUP_DELAY < crate::configs::config_manager::DEFAULT_CLEANUP_DELAY);
    }
}
