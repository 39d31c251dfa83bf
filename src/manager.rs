// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resource lifecycle orchestration.
//!
//! Any thread may request resources through a [`ManagerHandle`] and drop the
//! returned [`Instance`]s. Both only push onto producer queues. One thread owns
//! the [`Manager`] and calls [`Manager::update`] once per frame, which drains
//! the queues in a fixed order:
//!
//! 1. requests (cache lookup or creation, proxy fulfilment)
//! 2. releases (deferred until the instance settles)
//! 3. deletions (handed to the deleter once unreferenced)
//! 4. constructs (instance hooks, dependency fulfilment)
//! 5. replacements (hot reload)
//! 6. deleter and loader completions
//! 7. watcher polling and data-changed notifications

use crate::config::ManagerConfig;
use crate::deleter::Deleter;
use crate::error::{ResourceError, Result};
use crate::factory::{Factory, FactoryRegistry, ResourceContent};
use crate::flags::{BuildInfo, InstanceStatus, ResourceFlags};
use crate::hash::ResourceHash;
use crate::instance::{
    self, HookEvents, Instance, InstanceArena, InstanceId, InstanceNode, InstanceShared,
};
use crate::loader::Loader;
use crate::multi_queue::{MultiQueue, QueueAction, ThreadIndexFn};
use crate::object::{ReferenceRelease, ResourceObject};
use crate::proxy::{CreationProxy, Fulfillment};
use crate::source::FileLoader;
use crate::stats::ManagerStats;
use crate::storage::Storage;
use crate::watcher::{DataChangedNotifier, NullWatcher, Watcher};
use crossbeam::channel::{unbounded, Receiver};
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, info, info_span, trace_span, warn};

pub(crate) struct RequestMessage {
    proxy: CreationProxy,
    factory: Arc<dyn Factory>,
    runtime: Option<Vec<u8>>,
}

/// State reachable from producer threads
pub(crate) struct ManagerShared {
    pub(crate) factories: RwLock<FactoryRegistry>,
    pub(crate) instances: Mutex<InstanceArena>,
    pub(crate) requests: MultiQueue<RequestMessage>,
    pub(crate) releases: MultiQueue<InstanceId>,
    file_loader: Arc<dyn FileLoader>,
    shut_down: AtomicBool,
}

/// Producer-side access to a [`Manager`]
#[derive(Clone)]
pub struct ManagerHandle {
    shared: Arc<ManagerShared>,
}

impl ManagerHandle {
    pub fn register_factory<T: ResourceContent>(&self, factory: Arc<dyn Factory>) -> Result<()> {
        self.shared.factories.write().register::<T>(factory)
    }

    /// Request the file-backed resource `hash`.
    ///
    /// The handle comes back immediately; the resource resolves on a later
    /// tick. Fails if the backing file does not exist.
    pub fn request<T: ResourceContent>(
        &self,
        hash: impl Into<ResourceHash>,
        build_info: BuildInfo,
    ) -> Result<Instance<T>> {
        let hash = hash.into();
        if !self.shared.file_loader.file_exists(&hash) {
            error!(path = %hash, "Requested resource does not exist");
            return Err(ResourceError::ResourceNotFound(hash.path().to_string()));
        }
        self.enqueue::<T>(hash, build_info, None)
    }

    /// Request a resource built from inline bytes instead of a file
    pub fn request_runtime<T: ResourceContent>(
        &self,
        hash: impl Into<ResourceHash>,
        build_info: BuildInfo,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Instance<T>> {
        self.enqueue::<T>(hash.into(), build_info, Some(bytes.into()))
    }

    fn enqueue<T: ResourceContent>(
        &self,
        hash: ResourceHash,
        build_info: BuildInfo,
        runtime: Option<Vec<u8>>,
    ) -> Result<Instance<T>> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(ResourceError::ManagerShutDown);
        }

        let factory = self.shared.factories.read().get::<T>()?;
        let hooks = factory.request_instance(&hash);
        let shared = {
            let mut arena = self.shared.instances.lock();
            let id = arena.insert_with_key(|id| {
                let shared = Arc::new(InstanceShared::new(id, hash, build_info, TypeId::of::<T>()));
                InstanceNode::new(shared, factory.clone(), hooks)
            });
            arena[id].shared.clone()
        };

        self.shared.requests.push(RequestMessage {
            proxy: CreationProxy::new(shared.clone()),
            factory,
            runtime,
        });
        Ok(Instance::new(shared, self.shared.clone()))
    }
}

struct Replacement {
    old: Arc<ResourceObject>,
    new: Arc<ResourceObject>,
}

/// Owner of the resource cache and the tick loop
pub struct Manager {
    shared: Arc<ManagerShared>,
    config: ManagerConfig,
    storage: Storage,
    loader: Loader,
    deleter: Deleter,
    watcher: Box<dyn Watcher>,
    notifier: DataChangedNotifier,
    data_changed: Receiver<Arc<ResourceObject>>,
    external_context: Option<Box<dyn Any + Send>>,
    construct_pending: Vec<InstanceId>,
    deletion_pending: Vec<Arc<ResourceObject>>,
    replace_pending: Vec<Arc<ResourceObject>>,
    replacements: Vec<Replacement>,
    stats: ManagerStats,
    tick_thread: Option<ThreadId>,
    shut_down: bool,
}

impl Manager {
    pub fn new(config: ManagerConfig, file_loader: Arc<dyn FileLoader>) -> Result<Self> {
        Self::with_thread_index(config, file_loader, None)
    }

    /// Shard the producer queues by `thread_index`
    pub fn with_thread_index(
        config: ManagerConfig,
        file_loader: Arc<dyn FileLoader>,
        thread_index: Option<ThreadIndexFn>,
    ) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(ManagerShared {
            factories: RwLock::new(FactoryRegistry::new()),
            instances: Mutex::new(InstanceArena::with_key()),
            requests: MultiQueue::with_shards(config.queue_shards, thread_index.clone()),
            releases: MultiQueue::with_shards(config.queue_shards, thread_index),
            file_loader: file_loader.clone(),
            shut_down: AtomicBool::new(false),
        });
        let loader = Loader::new(file_loader, config.loader_threads)?;
        let deleter = Deleter::new(config.deleter_threads)?;

        let (sender, data_changed) = unbounded();
        let notifier = DataChangedNotifier::new(sender);
        let mut watcher: Box<dyn Watcher> = Box::new(NullWatcher);
        watcher.register_on_resource_data_changed(notifier.clone());

        info!(
            loader_threads = config.loader_threads,
            deleter_threads = config.deleter_threads,
            hot_reload = config.enable_hot_reload,
            "Resource manager started"
        );

        Ok(Self {
            shared,
            storage: Storage::new(config.hash_index),
            config,
            loader,
            deleter,
            watcher,
            notifier,
            data_changed,
            external_context: None,
            construct_pending: Vec::new(),
            deletion_pending: Vec::new(),
            replace_pending: Vec::new(),
            replacements: Vec::new(),
            stats: ManagerStats::new(),
            tick_thread: None,
            shut_down: false,
        })
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn register_factory<T: ResourceContent>(&self, factory: Arc<dyn Factory>) -> Result<()> {
        self.handle().register_factory::<T>(factory)
    }

    /// Replace the change source. Objects already cached are watched right away.
    pub fn set_watcher(&mut self, mut watcher: Box<dyn Watcher>) {
        watcher.register_on_resource_data_changed(self.notifier.clone());
        if self.config.enable_hot_reload {
            for object in self.storage.iter().filter(|object| !object.is_runtime()) {
                watcher.watch_resource(object);
            }
        }
        self.watcher = watcher;
    }

    /// Another way to report data changes, e.g. from a file-system event thread
    pub fn data_changed_notifier(&self) -> DataChangedNotifier {
        self.notifier.clone()
    }

    /// Context handed to external construction of kinds that need one
    pub fn set_external_context(&mut self, context: Box<dyn Any + Send>) {
        self.external_context = Some(context);
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Instances not yet detached
    pub fn instance_count(&self) -> usize {
        self.shared.instances.lock().len()
    }

    /// Data changes waiting for their instances to settle
    pub fn pending_replacements(&self) -> usize {
        self.replace_pending.len()
    }

    /// Nothing is queued, loading, replacing or deleting
    pub fn is_settled(&self) -> bool {
        self.shared.requests.is_empty()
            && self.shared.releases.is_empty()
            && self.construct_pending.is_empty()
            && self.deletion_pending.is_empty()
            && self.replace_pending.is_empty()
            && self.replacements.is_empty()
            && self.loader.in_flight() == 0
            && self.deleter.in_flight() == 0
    }

    /// Run one tick.
    ///
    /// Must always be called from the same thread (checked in debug builds).
    pub fn update(&mut self) {
        let current = thread::current().id();
        match self.tick_thread {
            Some(tick_thread) => debug_assert_eq!(
                tick_thread, current,
                "Manager::update called from a second thread"
            ),
            None => self.tick_thread = Some(current),
        }

        if self.shut_down {
            return;
        }
        self.tick();
    }

    fn tick(&mut self) {
        let _span = trace_span!("resource_update").entered();

        self.drain_requests();
        self.drain_releases();
        self.process_deletions();
        self.process_constructs();
        self.process_replacements();

        self.stats.deletions += self.deleter.update() as u64;
        let context = self.external_context.as_deref().map(|context| context as &dyn Any);
        let report = self.loader.update(context);
        self.stats.loads_completed += report.completed as u64;
        self.stats.load_failures += report.failed as u64;
        self.resolve_replacements();

        if self.config.enable_hot_reload {
            self.watcher.update();
            while let Ok(object) = self.data_changed.try_recv() {
                self.on_resource_data_changed(&object);
            }
        }
    }

    fn drain_requests(&mut self) {
        let shared = self.shared.clone();
        for request in shared.requests.drain() {
            self.handle_request(request);
        }
    }

    fn handle_request(&mut self, request: RequestMessage) {
        let RequestMessage {
            proxy,
            factory,
            runtime,
        } = request;
        let target = proxy.target().clone();
        let build_info = target.build_info();
        self.stats.requests += 1;

        let cached = self
            .storage
            .find_object(target.hash(), build_info.build_flags)
            .cloned();
        let object = match cached {
            Some(object) => {
                self.stats.cache_hits += 1;
                if object.content_type() != target.content_type() {
                    let expected = factory.type_name();
                    let found = object.factory().type_name();
                    warn!(
                        path = %target.hash(),
                        expected,
                        cached = found,
                        "Cached resource has a different type"
                    );
                    proxy.fail(ResourceError::TypeMismatch { expected, found });
                    return;
                }
                if build_info.flags.contains(ResourceFlags::PERMANENT) {
                    object.mark_permanent();
                }
                object
            }
            None => {
                self.stats.cache_misses += 1;
                let is_runtime = runtime.is_some();
                let object = Arc::new(ResourceObject::new(
                    target.hash().clone(),
                    build_info,
                    target.content_type(),
                    factory.clone(),
                    factory.request_object(),
                    runtime,
                ));
                if self.config.enable_hot_reload && !is_runtime {
                    self.watcher.watch_resource(&object);
                }
                self.loader.submit(object.clone());
                self.storage.insert_object(object.clone());
                debug!(path = %object.hash(), build_flags = ?build_info.build_flags, "Resource created");
                object
            }
        };

        match proxy.fulfill(&object) {
            Fulfillment::Assigned => self.construct_pending.push(target.id()),
            Fulfillment::Abandoned(ReferenceRelease::Released) => self.evict(object),
            Fulfillment::Abandoned(_) => {}
        }
    }

    fn drain_releases(&mut self) {
        let shared = self.shared.clone();
        shared.releases.process(|id| self.try_release(*id));
    }

    fn try_release(&mut self, id: InstanceId) -> QueueAction {
        let mut events = HookEvents::new();
        let node = {
            let mut arena = self.shared.instances.lock();
            let Some(node) = arena.get(id) else {
                return QueueAction::Remove;
            };
            let target = &node.shared;
            if target.borrows() > 0 {
                return QueueAction::Keep;
            }
            if let Some(resource) = target.resource() {
                let settled = target.is_constructed()
                    || target.status().contains(InstanceStatus::FAILED)
                    || resource.construction_failed();
                if !settled {
                    return QueueAction::Keep;
                }
            }
            instance::detach(&mut arena, id, &mut events)
        };

        self.construct_pending.retain(|pending| *pending != id);
        if let Some(node) = node {
            self.finish_release(node);
        }
        instance::dispatch_hooks(&self.shared.instances, events);
        QueueAction::Remove
    }

    /// Return the instance's reference and hand its hooks back to the factory
    fn finish_release(&mut self, mut node: InstanceNode) {
        self.stats.instances_released += 1;
        if let Some(resource) = node.shared.take_resource() {
            let allow_release = !self.is_replacement_target(&resource);
            if resource.decrement_references(allow_release) == ReferenceRelease::Released {
                self.evict(resource);
            }
        }
        if let Some(hooks) = node.hooks.take() {
            node.factory.release_instance(hooks);
        }
    }

    /// Move an unreferenced object from the cache to the deletion list
    fn evict(&mut self, object: Arc<ResourceObject>) {
        if self.is_replacement_target(&object) {
            return;
        }
        let owned = self.storage.get_object_ownership(&object).unwrap_or(object);
        self.push_deletion(owned);
    }

    fn push_deletion(&mut self, object: Arc<ResourceObject>) {
        let queued = object.is_pending_deletion()
            || self
                .deletion_pending
                .iter()
                .any(|pending| Arc::ptr_eq(pending, &object));
        if !queued {
            self.deletion_pending.push(object);
        }
    }

    fn is_replacement_target(&self, object: &Arc<ResourceObject>) -> bool {
        self.replacements
            .iter()
            .any(|replacement| Arc::ptr_eq(&replacement.new, object))
    }

    fn process_deletions(&mut self) {
        let mut index = self.deletion_pending.len();
        while index > 0 {
            index -= 1;
            let object = &self.deletion_pending[index];
            if object.references() > 0 || object.is_mid_replacement() || object.is_in_flight() {
                continue;
            }

            let object = self.deletion_pending.swap_remove(index);
            self.submit_deletion(object);
        }
    }

    fn submit_deletion(&mut self, object: Arc<ResourceObject>) {
        self.watcher.remove_watch(&object);
        object.mark_pending_deletion();
        debug!(path = %object.hash(), "Resource queued for deletion");
        self.deleter.submit(object);
    }

    fn process_constructs(&mut self) {
        let shared = self.shared.clone();
        let mut arena = shared.instances.lock();
        let mut events = HookEvents::new();

        let mut index = self.construct_pending.len();
        while index > 0 {
            index -= 1;
            let id = self.construct_pending[index];
            let Some(node) = arena.get(id) else {
                self.construct_pending.swap_remove(index);
                continue;
            };
            let Some(resource) = node.shared.resource() else {
                self.construct_pending.swap_remove(index);
                continue;
            };

            if resource.construction_failed() {
                node.shared.fail(ResourceError::ResourceLoadError(format!(
                    "{} failed to construct",
                    resource.hash()
                )));
                self.construct_pending.swap_remove(index);
                continue;
            }
            if !resource.is_usable() {
                continue;
            }

            self.construct_pending.swap_remove(index);
            instance::begin_construction(&mut arena, id, &mut events);
        }
        drop(arena);

        instance::dispatch_hooks(&shared.instances, events);
    }

    fn process_replacements(&mut self) {
        let mut index = self.replace_pending.len();
        while index > 0 {
            index -= 1;
            let old = self.replace_pending[index].clone();

            if !self.storage.contains(&old) {
                old.clear_pending_modification();
                self.replace_pending.swap_remove(index);
                continue;
            }
            if old.is_in_flight() {
                continue;
            }

            let shared = self.shared.clone();
            let mut arena = shared.instances.lock();
            let mut events = HookEvents::new();
            let mut referencing = Vec::new();
            let mut settled = true;
            for (id, node) in arena.iter() {
                let Some(resource) = node.shared.resource() else {
                    continue;
                };
                if !Arc::ptr_eq(&resource, &old) {
                    continue;
                }
                let status = node.shared.status();
                if node.shared.borrows() > 0
                    || !status.intersects(InstanceStatus::CONSTRUCTED | InstanceStatus::FAILED)
                {
                    settled = false;
                    break;
                }
                referencing.push(id);
            }
            if !settled {
                continue;
            }

            self.replace_pending.swap_remove(index);

            let factory = old.factory().clone();
            let new = Arc::new(ResourceObject::new(
                old.hash().clone(),
                old.build_info(),
                old.content_type(),
                factory.clone(),
                factory.request_object(),
                None,
            ));
            if old.is_permanent() {
                new.mark_permanent();
            }
            old.register_replacing_resource(new.clone());

            for id in referencing {
                if let Some(node) = arena.get(id) {
                    new.increment_references();
                    node.shared.redirect(new.clone());
                    old.decrement_references(false);
                }
                instance::reset_instance(&mut arena, id, &mut self.construct_pending, &mut events);
            }
            drop(arena);
            instance::dispatch_hooks(&shared.instances, events);

            info!(path = %old.hash(), "Replacing resource");
            if self.config.enable_hot_reload {
                self.watcher.update_watched_resource(&new);
            }
            self.loader.submit(new.clone());
            self.storage.replace_object(new.clone());
            self.push_deletion(old.clone());
            self.replacements.push(Replacement { old, new });
            self.stats.replacements_started += 1;
        }
    }

    fn resolve_replacements(&mut self) {
        let mut index = self.replacements.len();
        while index > 0 {
            index -= 1;
            let replacement = &self.replacements[index];
            if replacement.new.is_in_flight() {
                continue;
            }

            if replacement.new.is_ready() {
                let replacement = self.replacements.swap_remove(index);
                self.commit_replacement(replacement);
            } else if replacement.new.construction_failed() {
                let replacement = self.replacements.swap_remove(index);
                self.abort_replacement(replacement);
            }
        }
    }

    fn commit_replacement(&mut self, Replacement { old, new }: Replacement) {
        old.clear_replacing_resource();
        old.clear_pending_modification();
        self.stats.replacements_committed += 1;
        info!(path = %new.hash(), "Resource replaced");

        // Every instance may have been released while the new object loaded
        if new.references() == 0 && !new.is_permanent() {
            self.evict(new);
        }
    }

    /// Keep serving `old` after `new` failed to load
    fn abort_replacement(&mut self, Replacement { old, new }: Replacement) {
        let shared = self.shared.clone();
        let mut arena = shared.instances.lock();
        let redirected: Vec<InstanceId> = arena
            .iter()
            .filter(|(_, node)| {
                node.shared
                    .resource()
                    .is_some_and(|resource| Arc::ptr_eq(&resource, &new))
            })
            .map(|(id, _)| id)
            .collect();

        let mut events = HookEvents::new();
        for id in redirected {
            if let Some(node) = arena.get(id) {
                old.increment_references();
                node.shared.redirect(old.clone());
                new.decrement_references(false);
            }
            instance::reset_instance(&mut arena, id, &mut self.construct_pending, &mut events);
        }
        drop(arena);
        instance::dispatch_hooks(&shared.instances, events);

        old.clear_replacing_resource();
        old.clear_pending_modification();
        self.deletion_pending
            .retain(|pending| !Arc::ptr_eq(pending, &old));
        self.storage.replace_object(old.clone());
        if self.config.enable_hot_reload {
            self.watcher.update_watched_resource(&old);
        }
        self.push_deletion(new);

        warn!(path = %old.hash(), "Replacement failed to load, keeping previous resource");
        self.stats.replacements_aborted += 1;

        if old.references() == 0 && !old.is_permanent() {
            self.evict(old);
        }
    }

    /// Queue `object` for replacement because its backing data changed.
    ///
    /// Returns false when the notification is ignored: reload disabled for
    /// the object, runtime or no longer cached objects, and duplicates of a
    /// change already queued.
    pub fn on_resource_data_changed(&mut self, object: &Arc<ResourceObject>) -> bool {
        if object.build_info().flags.contains(ResourceFlags::DISABLE_RELOAD)
            || object.is_runtime()
            || object.is_pending_deletion()
            || !self.storage.contains(object)
        {
            debug!(path = %object.hash(), "Ignoring data change");
            return false;
        }

        let key = object.key();
        let duplicate = self.replace_pending.iter().any(|pending| pending.key() == key)
            || self
                .replacements
                .iter()
                .any(|replacement| replacement.new.key() == key)
            || self.deletion_pending.iter().any(|pending| pending.key() == key);
        if duplicate {
            warn!(path = %object.hash(), "Ignoring duplicate data-changed notification");
            self.stats.duplicate_change_notifications += 1;
            return false;
        }

        object.mark_pending_modification();
        self.replace_pending.push(object.clone());
        true
    }

    /// Settle outstanding work and delete every cached object.
    ///
    /// Instances still held by callers are detached and stop resolving.
    /// Called automatically on drop; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        let _span = info_span!("resource_shutdown").entered();
        self.shared.shut_down.store(true, Ordering::Release);

        for _ in 0..self.config.shutdown_tick_limit {
            self.tick();
            if self.is_settled() {
                break;
            }
        }

        for request in self.shared.requests.drain() {
            request.proxy.fail(ResourceError::ManagerShutDown);
        }
        // Hook events of detached instances have no node left to run on
        let mut events = HookEvents::new();
        let leaked: Vec<InstanceNode> = {
            let mut arena = self.shared.instances.lock();
            let ids: Vec<InstanceId> = arena.keys().collect();
            ids.into_iter()
                .filter_map(|id| instance::detach(&mut arena, id, &mut events))
                .collect()
        };
        if !leaked.is_empty() {
            warn!(count = leaked.len(), "Releasing instances still alive at shutdown");
        }
        for node in leaked {
            self.finish_release(node);
        }
        self.shared.releases.drain();
        self.construct_pending.clear();
        for object in self.replace_pending.drain(..) {
            object.clear_pending_modification();
        }

        self.loader.finish();
        let report = self.loader.update(None);
        self.stats.loads_completed += report.completed as u64;
        self.stats.load_failures += report.failed as u64;

        for Replacement { old, new } in std::mem::take(&mut self.replacements) {
            old.clear_replacing_resource();
            old.clear_pending_modification();
            self.push_deletion(old);
            self.push_deletion(new);
        }
        let permanent = self.storage.get_permanent_resources_ownership();
        debug!(count = permanent.len(), "Releasing permanent resources");
        for object in permanent.into_iter().chain(self.storage.take_all()) {
            self.push_deletion(object);
        }
        for object in std::mem::take(&mut self.deletion_pending) {
            if object.references() > 0 {
                error!(
                    path = %object.hash(),
                    references = object.references(),
                    "Resource still referenced at shutdown"
                );
                continue;
            }
            self.submit_deletion(object);
        }

        self.deleter.finish();
        self.stats.deletions += self.deleter.update() as u64;
        self.shut_down = true;
        info!(
            deletions = self.stats.deletions,
            "Resource manager shut down"
        );
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
