//! # Resource Manager
//!
//! Maps requests to [`SharedResource`] records and keeps track of which
//! listener holds which record.
//!
//! ## Structural cache
//!
//! Records live in a `BTreeMap` ordered by [`compare`](crate::core::value::compare),
//! so structurally equal requests always resolve to the same record no matter
//! how each request value was built. A record is inserted (and `create`
//! emitted) under the map lock; it leaves the map (and `delete` is emitted)
//! only once it has been torn down with no users left.
//!
//! ## Listener diffing
//!
//! A listener states its complete set of requests on every
//! [`update_requests`](ResourceManager::update_requests) call. The manager
//! acquires references for new requests, keeps the ones it already holds, and
//! releases the ones that were dropped. Records still used by other listeners
//! are never disturbed.
//!
//! ## Lock order
//!
//! `listeners` → `resources` → record state → event dispatcher. The factory's
//! `create` and stop handles run only after every lock is released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::configs::config_manager::ManagerConfig;
use crate::core::events::{EventDispatcher, EventKind, LifecycleEvent};
use crate::core::shared_resource::{
    Completion, Launch, Reference, ResourceValue, SharedResource, StopHandle,
};
use crate::core::value::Value;
use crate::error::ResourceError;
use crate::utils::debounce::KeyedDebouncer;
use crate::utils::ids::{ResourceId, Sequence};

/// Extra information handed to the factory with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMeta {
    /// Id of the record being created.
    pub id: ResourceId,
}

/// Creates the external effect behind a request (a subscription, a query...).
///
/// `create` must not block: it starts the work and reports the outcome later
/// through `done`. It returns the handle that stops the effect. Closures with
/// the matching signature implement this trait.
pub trait ResourceFactory: Send + Sync + 'static {
    /// Starts one creation attempt for `request`.
    fn create(&self, request: &Value, meta: RequestMeta, done: Completion) -> Box<dyn StopHandle>;
}

impl<F> ResourceFactory for F
where
    F: Fn(&Value, RequestMeta, Completion) -> Box<dyn StopHandle> + Send + Sync + 'static,
{
    fn create(&self, request: &Value, meta: RequestMeta, done: Completion) -> Box<dyn StopHandle> {
        self(request, meta, done)
    }
}

/// What a listener gets back for one request slot.
#[derive(Debug, Clone)]
pub struct Requested {
    /// The record serving the slot, or `None` for an empty slot.
    pub id: Option<ResourceId>,
    /// The record's value. Empty slots carry an already resolved `null`.
    pub value: ResourceValue,
}

impl Requested {
    fn empty() -> Self {
        Self {
            id: None,
            value: ResourceValue::ready(Value::Null),
        }
    }
}

struct Entry {
    id: ResourceId,
    resource: SharedResource,
}

#[derive(Default)]
struct ListenerBinding {
    held: BTreeMap<ResourceId, Reference>,
}

struct ManagerInner {
    factory: Arc<dyn ResourceFactory>,
    config: ManagerConfig,
    ids: Sequence,
    resources: Mutex<BTreeMap<Arc<Value>, Entry>>,
    listeners: Mutex<HashMap<String, ListenerBinding>>,
    events: Arc<EventDispatcher>,
    updates: KeyedDebouncer<String>,
}

impl ManagerInner {
    fn resources(&self) -> MutexGuard<'_, BTreeMap<Arc<Value>, Entry>> {
        self.resources.lock().expect("Resource map lock poisoned")
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<String, ListenerBinding>> {
        self.listeners.lock().expect("Listener map lock poisoned")
    }

    /// Drops the map entry of a record that was torn down, unless it was
    /// picked up again in the meantime.
    fn forget(&self, id: ResourceId, request: &Arc<Value>) {
        let mut resources = self.resources();
        let stale = resources.get(request.as_ref()).is_some_and(|entry| {
            entry.id == id && entry.resource.users() == 0 && entry.resource.is_clean()
        });
        if stale {
            resources.remove(request.as_ref());
            log::debug!("Resource {} deleted", id);
            self.events.emit(LifecycleEvent::Delete {
                id,
                request: Arc::clone(request),
            });
        }
    }
}

/// Shares resources between listeners. Cloning yields another handle to the
/// same manager.
///
/// Cleanup timers are Tokio tasks, so the manager must be driven from inside
/// a Tokio runtime.
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<ManagerInner>,
}

impl ResourceManager {
    /// Creates a manager backed by `factory`.
    pub fn new<F: ResourceFactory>(factory: F, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                factory: Arc::new(factory),
                config,
                ids: Sequence::new(),
                resources: Mutex::new(BTreeMap::new()),
                listeners: Mutex::new(HashMap::new()),
                events: Arc::new(EventDispatcher::new()),
                updates: KeyedDebouncer::new(),
            }),
        }
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Subscribes to the given lifecycle events.
    pub fn subscribe(
        &self,
        kinds: &[EventKind],
    ) -> tokio::sync::mpsc::UnboundedReceiver<LifecycleEvent> {
        self.inner.events.subscribe(kinds)
    }

    /// Subscribes to every lifecycle event.
    pub fn subscribe_all(&self) -> tokio::sync::mpsc::UnboundedReceiver<LifecycleEvent> {
        self.inner.events.subscribe_all()
    }

    /// Returns the record for `request`, creating it if needed.
    ///
    /// A record obtained here should be required before the caller yields;
    /// an unused record is only removed by a later cleanup pass.
    pub fn get_or_create_resource(&self, request: &Value) -> (ResourceId, SharedResource) {
        let mut resources = self.inner.resources();
        self.get_or_create_locked(&mut resources, request)
    }

    fn get_or_create_locked(
        &self,
        resources: &mut BTreeMap<Arc<Value>, Entry>,
        request: &Value,
    ) -> (ResourceId, SharedResource) {
        if let Some(entry) = resources.get(request) {
            return (entry.id, entry.resource.clone());
        }

        let id = ResourceId(self.inner.ids.next());
        let request = Arc::new(request.clone());
        let resource = self.build_resource(id, &request);
        resources.insert(
            Arc::clone(&request),
            Entry {
                id,
                resource: resource.clone(),
            },
        );
        log::debug!("Resource {} created for {}", id, request);
        self.inner
            .events
            .emit(LifecycleEvent::Create { id, request });
        (id, resource)
    }

    fn build_resource(&self, id: ResourceId, request: &Arc<Value>) -> SharedResource {
        let config = &self.inner.config;
        let factory = Arc::clone(&self.inner.factory);
        let create_request = Arc::clone(request);
        let events = Arc::clone(&self.inner.events);
        let manager = Arc::downgrade(&self.inner);
        let destroy_request = Arc::clone(request);

        SharedResource::builder(move |done| {
            factory.create(&create_request, RequestMeta { id }, done)
        })
        .id(id)
        .cleanup_delay(config.cleanup_delay.resolve(request))
        .cleanup_delay_on_error(config.cleanup_delay_on_error.resolve(request))
        .on_settle(move |id, outcome| match outcome {
            Ok(value) => events.emit(LifecycleEvent::Ready {
                id,
                value: Arc::clone(value),
            }),
            Err(error) => {
                log::warn!("While requesting resource {}: {}", id, error);
                events.emit(LifecycleEvent::Error {
                    id,
                    error: error.clone(),
                });
            }
        })
        .on_destroy(move |id| {
            if let Some(manager) = manager.upgrade() {
                manager.forget(id, &destroy_request);
            }
        })
        .build()
    }

    /// Replaces the request set of `listener`.
    ///
    /// Returns one result per slot, in input order. `None` (or a nil value)
    /// requests nothing and yields a resolved `null`.
    pub fn update_requests(&self, listener: &str, requests: &[Option<Value>]) -> Vec<Requested> {
        self.apply_requests(listener, requests.iter().map(Option::as_ref))
    }

    /// Keyed variant of [`update_requests`](Self::update_requests): the result
    /// has exactly the keys of the input.
    pub fn update_keyed_requests<K>(
        &self,
        listener: &str,
        requests: &BTreeMap<K, Option<Value>>,
    ) -> BTreeMap<K, Requested>
    where
        K: Ord + Clone,
    {
        let results = self.apply_requests(listener, requests.values().map(Option::as_ref));
        requests.keys().cloned().zip(results).collect()
    }

    fn apply_requests<'a, I>(&self, listener: &str, requests: I) -> Vec<Requested>
    where
        I: IntoIterator<Item = Option<&'a Value>>,
    {
        let mut launches: Vec<Launch> = Vec::new();
        let results = {
            let mut listeners = self.inner.listeners();
            let mut resources = self.inner.resources();
            let mut binding = listeners.remove(listener).unwrap_or_default();
            let mut wanted = BTreeSet::new();

            let results: Vec<Requested> = requests
                .into_iter()
                .map(|request| {
                    let Some(request) = request.filter(|r| !r.is_nil()) else {
                        return Requested::empty();
                    };
                    let (id, resource) = self.get_or_create_locked(&mut resources, request);
                    wanted.insert(id);
                    let reference = binding.held.entry(id).or_insert_with(|| {
                        let (reference, launch) = resource.acquire();
                        launches.extend(launch);
                        reference
                    });
                    Requested {
                        id: Some(id),
                        value: reference.value(),
                    }
                })
                .collect();

            let dropped: Vec<ResourceId> = binding
                .held
                .keys()
                .filter(|id| !wanted.contains(*id))
                .copied()
                .collect();
            for id in dropped {
                if let Some(reference) = binding.held.remove(&id) {
                    reference.release();
                }
            }

            if !binding.held.is_empty() {
                listeners.insert(listener.to_string(), binding);
            }
            results
        };

        for launch in launches {
            launch.run();
        }
        results
    }

    /// Releases everything `listener` holds and cancels its scheduled update.
    pub fn release_all(&self, listener: &str) {
        self.inner.updates.cancel(&listener.to_string());
        self.update_requests(listener, &[]);
    }

    /// Applies `requests` for `listener` after `delay`, unless a newer update
    /// for the same listener is scheduled first.
    pub fn schedule_update(&self, listener: &str, requests: Vec<Option<Value>>, delay: Duration) {
        let manager = Arc::downgrade(&self.inner);
        let owner = listener.to_string();
        self.inner
            .updates
            .schedule(listener.to_string(), delay, move || {
                if let Some(inner) = manager.upgrade() {
                    ResourceManager { inner }.update_requests(&owner, &requests);
                }
            });
    }

    /// Forces the record for `request` to recreate its value without touching
    /// its users.
    ///
    /// Fails with [`ResourceError::UnknownResource`] when there is no record,
    /// or when the record is idle and nobody holds it.
    pub fn refresh(&self, request: &Value) -> Result<ResourceValue, ResourceError> {
        let resource = self
            .inner
            .resources()
            .get(request)
            .map(|entry| entry.resource.clone())
            .filter(|resource| resource.users() > 0 || !resource.is_clean());
        match resource {
            Some(resource) => Ok(resource.refresh()),
            None => {
                log::warn!("Refresh requested for an unknown {} request", request.kind());
                Err(ResourceError::UnknownResource {
                    request: request.clone(),
                })
            }
        }
    }

    /// Tears down every record nobody uses, without waiting for grace periods.
    pub fn cleanup_resources(&self) {
        let resources: Vec<SharedResource> = self
            .inner
            .resources()
            .values()
            .map(|entry| entry.resource.clone())
            .collect();
        let cleaned = resources.iter().filter(|r| r.maybe_cleanup()).count();
        log::info!("Cleaned up {} unused resources", cleaned);
    }

    /// The record currently serving `request`, if any.
    pub fn lookup(&self, request: &Value) -> Option<(ResourceId, SharedResource)> {
        self.inner
            .resources()
            .get(request)
            .map(|entry| (entry.id, entry.resource.clone()))
    }

    /// Number of records in the cache.
    pub fn resource_count(&self) -> usize {
        self.inner.resources().len()
    }

    /// Number of listeners holding at least one reference.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }

    /// Ids of the records `listener` holds, in ascending order.
    pub fn held_by(&self, listener: &str) -> Vec<ResourceId> {
        self.inner
            .listeners()
            .get(listener)
            .map(|binding| binding.held.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("resources", &self.resource_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
