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

//! Resource instances.
//!
//! Every request produces one instance. The caller holds an [`Instance`]
//! handle; the manager keeps the per-instance bookkeeping (hooks, dependency
//! edges) in a generational arena keyed by [`InstanceId`]. An instance may
//! depend on any number of other instances, but each instance has at most one
//! dependent.

use crate::error::{ResourceError, Result};
use crate::factory::{Factory, InstanceHooks, ResourceContent};
use crate::flags::{AtomicInstanceStatus, BuildInfo, InstanceStatus};
use crate::hash::ResourceHash;
use crate::manager::ManagerShared;
use crate::object::ResourceObject;
use parking_lot::{Condvar, Mutex};
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

slotmap::new_key_type! {
    /// Generational handle of an instance in the manager's arena
    pub struct InstanceId;
}

pub(crate) type InstanceArena = SlotMap<InstanceId, InstanceNode>;

/// State shared between a caller handle, its creation proxy and the arena
pub(crate) struct InstanceShared {
    id: InstanceId,
    hash: ResourceHash,
    build_info: BuildInfo,
    content_type: TypeId,
    status: AtomicInstanceStatus,
    borrows: AtomicU32,
    slot: Mutex<Option<Arc<ResourceObject>>>,
    failure: Mutex<Option<ResourceError>>,
    resolved: Condvar,
}

impl InstanceShared {
    pub(crate) fn new(
        id: InstanceId,
        hash: ResourceHash,
        build_info: BuildInfo,
        content_type: TypeId,
    ) -> Self {
        Self {
            id,
            hash,
            build_info,
            content_type,
            status: AtomicInstanceStatus::new(InstanceStatus::LINKED),
            borrows: AtomicU32::new(0),
            slot: Mutex::new(None),
            failure: Mutex::new(None),
            resolved: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn hash(&self) -> &ResourceHash {
        &self.hash
    }

    pub(crate) fn build_info(&self) -> BuildInfo {
        self.build_info
    }

    /// `TypeId` of the content the caller asked for
    pub(crate) fn content_type(&self) -> TypeId {
        self.content_type
    }

    pub(crate) fn status(&self) -> InstanceStatus {
        self.status.load()
    }

    pub(crate) fn is_constructed(&self) -> bool {
        self.status().contains(InstanceStatus::CONSTRUCTED)
    }

    pub(crate) fn borrows(&self) -> u32 {
        self.borrows.load(Ordering::SeqCst)
    }

    pub(crate) fn resource(&self) -> Option<Arc<ResourceObject>> {
        self.slot.lock().clone()
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Write `object` into the slot if a caller still holds the handle
    pub(crate) fn assign_if_linked(&self, object: Arc<ResourceObject>) -> bool {
        let mut slot = self.slot.lock();
        if !self.status().contains(InstanceStatus::LINKED) {
            return false;
        }
        *slot = Some(object);
        self.resolved.notify_all();
        true
    }

    /// Point the slot at a different object, returning the previous one
    pub(crate) fn redirect(&self, object: Arc<ResourceObject>) -> Option<Arc<ResourceObject>> {
        self.slot.lock().replace(object)
    }

    pub(crate) fn take_resource(&self) -> Option<Arc<ResourceObject>> {
        self.slot.lock().take()
    }

    /// Mark failed with `error` and wake anyone waiting for resolution
    pub(crate) fn fail(&self, error: ResourceError) {
        let _slot = self.slot.lock();
        self.failure.lock().get_or_insert(error);
        self.status.insert(InstanceStatus::FAILED);
        self.resolved.notify_all();
    }

    pub(crate) fn failure(&self) -> Option<ResourceError> {
        self.failure.lock().clone()
    }

    pub(crate) fn unlink(&self) {
        let _slot = self.slot.lock();
        self.status.remove(InstanceStatus::LINKED);
    }

    fn wait_until_resolved(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() && !self.status().contains(InstanceStatus::FAILED) {
            if self.resolved.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.is_some()
    }
}

/// Arena entry, owned by the manager
pub(crate) struct InstanceNode {
    pub(crate) shared: Arc<InstanceShared>,
    pub(crate) factory: Arc<dyn Factory>,
    pub(crate) hooks: Option<Box<dyn InstanceHooks>>,
    /// Dependencies that have not constructed yet
    pub(crate) dependency_count: u32,
    pub(crate) dependencies: SmallVec<[InstanceId; 4]>,
    pub(crate) dependent: Option<InstanceId>,
}

impl InstanceNode {
    pub(crate) fn new(
        shared: Arc<InstanceShared>,
        factory: Arc<dyn Factory>,
        hooks: Box<dyn InstanceHooks>,
    ) -> Self {
        Self {
            shared,
            factory,
            hooks: Some(hooks),
            dependency_count: 0,
            dependencies: SmallVec::new(),
            dependent: None,
        }
    }

    fn status(&self) -> InstanceStatus {
        self.shared.status()
    }
}

/// Declare that `dependent` cannot finish constructing before `dependency` has.
///
/// # Panics
/// Panics if `dependency` already has a different dependent.
pub(crate) fn add_dependency(
    arena: &mut InstanceArena,
    dependent: InstanceId,
    dependency: InstanceId,
) -> Result<()> {
    if dependent == dependency {
        return Err(ResourceError::SelfDependency);
    }

    let dependency_constructed = {
        let node = arena.get(dependency).ok_or(ResourceError::InvalidInstance)?;
        match node.dependent {
            Some(existing) if existing == dependent => return Ok(()),
            Some(existing) => panic!(
                "Instance {:?} of {} already has dependent {existing:?}",
                dependency, node.shared.hash
            ),
            None => {}
        }
        node.status().contains(InstanceStatus::CONSTRUCTED)
    };

    let parent = arena.get_mut(dependent).ok_or(ResourceError::InvalidInstance)?;
    if parent.status().contains(InstanceStatus::CONSTRUCTED) {
        return Err(ResourceError::DependencyAfterConstruction);
    }
    parent.dependencies.push(dependency);
    if !dependency_constructed {
        parent.dependency_count += 1;
    }

    if let Some(child) = arena.get_mut(dependency) {
        child.dependent = Some(dependent);
    }
    Ok(())
}

/// Instance callback recorded under the arena lock and run after it is released
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HookEvent {
    Construct,
    DependenciesFulfilled,
    Reset,
}

pub(crate) type HookEvents = Vec<(InstanceId, HookEvent)>;

impl HookEvent {
    pub(crate) fn fire(self, hooks: &mut dyn InstanceHooks, resource: Option<&ResourceObject>) {
        match (self, resource) {
            (HookEvent::Construct, Some(resource)) => hooks.on_construct(resource),
            (HookEvent::DependenciesFulfilled, Some(resource)) => {
                hooks.on_dependencies_fulfilled(resource)
            }
            (HookEvent::Reset, _) => hooks.on_reset(),
            (_, None) => {}
        }
    }
}

/// Run `events` in order. Must be called without the arena lock held: hooks
/// may request, release or link other instances.
pub(crate) fn dispatch_hooks(instances: &Mutex<InstanceArena>, events: HookEvents) {
    for (id, event) in events {
        let (mut hooks, resource, factory) = {
            let mut arena = instances.lock();
            let Some(node) = arena.get_mut(id) else {
                continue;
            };
            let Some(hooks) = node.hooks.take() else {
                continue;
            };
            (hooks, node.shared.resource(), node.factory.clone())
        };

        event.fire(hooks.as_mut(), resource.as_deref());

        let mut arena = instances.lock();
        match arena.get_mut(id) {
            Some(node) => node.hooks = Some(hooks),
            None => {
                drop(arena);
                factory.release_instance(hooks);
            }
        }
    }
}

/// Record `on_construct` and complete right away when nothing is outstanding
pub(crate) fn begin_construction(
    arena: &mut InstanceArena,
    id: InstanceId,
    events: &mut HookEvents,
) {
    let Some(node) = arena.get_mut(id) else {
        return;
    };
    if !node.shared.is_resolved() {
        return;
    }

    events.push((id, HookEvent::Construct));

    if node.dependency_count == 0 {
        complete_construction(arena, id, events);
    } else {
        trace!(path = %node.shared.hash, pending = node.dependency_count, "Instance waiting on dependencies");
        node.shared.status.insert(InstanceStatus::CONSTRUCTION_BEGUN);
    }
}

/// Mark `id` constructed and fulfil up the dependent chain
fn complete_construction(arena: &mut InstanceArena, id: InstanceId, events: &mut HookEvents) {
    let mut current = id;
    loop {
        let Some(node) = arena.get_mut(current) else {
            return;
        };
        if node.shared.is_resolved() {
            events.push((current, HookEvent::DependenciesFulfilled));
        }
        node.shared.status.remove(InstanceStatus::CONSTRUCTION_BEGUN);
        node.shared.status.insert(InstanceStatus::CONSTRUCTED);

        let Some(parent) = node.dependent else {
            return;
        };
        match fulfill_dependency(arena, parent) {
            Some(next) => current = next,
            None => return,
        }
    }
}

/// One dependency of `id` finished. Returns `id` if it can now complete.
fn fulfill_dependency(arena: &mut InstanceArena, id: InstanceId) -> Option<InstanceId> {
    let node = arena.get_mut(id)?;
    assert!(
        node.dependency_count > 0,
        "Dependency of {} fulfilled twice",
        node.shared.hash
    );
    node.dependency_count -= 1;
    let waiting = node.status().contains(InstanceStatus::CONSTRUCTION_BEGUN);
    (node.dependency_count == 0 && waiting).then_some(id)
}

/// Undo construction of `id` because its resource is being replaced.
///
/// Constructed dependents are reset first, so none of them keeps a constructed
/// state on top of a dependency that is rebuilding. Every reset instance is
/// queued in `construct_pending`.
pub(crate) fn reset_instance(
    arena: &mut InstanceArena,
    id: InstanceId,
    construct_pending: &mut Vec<InstanceId>,
    events: &mut HookEvents,
) {
    let mut chain: SmallVec<[InstanceId; 8]> = SmallVec::new();
    chain.push(id);

    let mut current = id;
    while let Some(node) = arena.get(current) {
        if !node.status().contains(InstanceStatus::CONSTRUCTED) {
            break;
        }
        let Some(parent_id) = node.dependent else {
            break;
        };
        let Some(parent) = arena.get_mut(parent_id) else {
            break;
        };
        parent.dependency_count += 1;
        if !parent.status().contains(InstanceStatus::CONSTRUCTED) {
            break;
        }
        chain.push(parent_id);
        current = parent_id;
    }

    for id in chain.into_iter().rev() {
        let Some(node) = arena.get_mut(id) else {
            continue;
        };
        let built = InstanceStatus::CONSTRUCTED
            | InstanceStatus::CONSTRUCTION_BEGUN
            | InstanceStatus::FAILED;
        if node.status().intersects(built) {
            node.shared.status.remove(built);
            events.push((id, HookEvent::Reset));
        }
        if !construct_pending.contains(&id) {
            construct_pending.push(id);
        }
    }
}

/// Remove `id` from the arena, unhooking it from both sides of the chain.
///
/// A dependent still waiting on this instance is fulfilled.
pub(crate) fn detach(
    arena: &mut InstanceArena,
    id: InstanceId,
    events: &mut HookEvents,
) -> Option<InstanceNode> {
    let node = arena.remove(id)?;

    for dependency in &node.dependencies {
        if let Some(child) = arena.get_mut(*dependency) {
            if child.dependent == Some(id) {
                child.dependent = None;
            }
        }
    }

    if let Some(parent_id) = node.dependent {
        let mut ready = None;
        if let Some(parent) = arena.get_mut(parent_id) {
            parent.dependencies.retain(|dependency| *dependency != id);
            if !node.status().contains(InstanceStatus::CONSTRUCTED) {
                ready = fulfill_dependency(arena, parent_id);
            }
        }
        if let Some(ready) = ready {
            complete_construction(arena, ready, events);
        }
    }

    Some(node)
}

/// Caller-side handle of one resource request.
///
/// Dropping the handle queues the instance for release on the next tick; it
/// never blocks.
pub struct Instance<T: ResourceContent> {
    shared: Arc<InstanceShared>,
    manager: Arc<ManagerShared>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ResourceContent> Instance<T> {
    pub(crate) fn new(shared: Arc<InstanceShared>, manager: Arc<ManagerShared>) -> Self {
        Self {
            shared,
            manager,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.shared.id
    }

    pub fn hash(&self) -> &ResourceHash {
        &self.shared.hash
    }

    pub fn build_info(&self) -> BuildInfo {
        self.shared.build_info
    }

    pub fn status(&self) -> InstanceStatus {
        self.shared.status()
    }

    /// The tick thread has assigned a resource object
    pub fn is_resolved(&self) -> bool {
        self.shared.is_resolved()
    }

    /// Constructed, resolved, and the resource itself is ready
    pub fn is_ready(&self) -> bool {
        self.shared.is_constructed()
            && self
                .shared
                .resource()
                .is_some_and(|resource| resource.is_ready())
    }

    /// The request can never become ready
    pub fn is_failed(&self) -> bool {
        self.status().contains(InstanceStatus::FAILED)
            || self
                .shared
                .resource()
                .is_some_and(|resource| resource.construction_failed())
    }

    /// Current resource object, following any in-progress replacement
    pub fn resource(&self) -> Option<Arc<ResourceObject>> {
        let mut resource = self.shared.resource()?;
        while let Some(next) = resource.replacing_resource() {
            resource = next;
        }
        Some(resource)
    }

    /// Run `f` against the resource content once the instance is constructed
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.usable_resource()?.read::<T, R>(f)
    }

    /// Pin the ready resource. While any borrow is alive the instance is
    /// neither released nor redirected by a replacement.
    pub fn borrow(&self) -> Option<InstanceBorrow<'_, T>> {
        self.shared.borrows.fetch_add(1, Ordering::SeqCst);
        match self.usable_resource() {
            Some(resource) => Some(InstanceBorrow {
                instance: self,
                resource,
            }),
            None => {
                self.shared.borrows.fetch_sub(1, Ordering::SeqCst);
                None
            }
        }
    }

    /// Resource of a constructed instance, also while a data change is pending
    fn usable_resource(&self) -> Option<Arc<ResourceObject>> {
        if !self.shared.is_constructed() {
            return None;
        }
        self.shared.resource().filter(|resource| resource.is_usable())
    }

    /// Number of live borrows
    pub fn borrow_count(&self) -> u32 {
        self.shared.borrows()
    }

    /// `self` will not finish constructing before `dependency` has.
    ///
    /// # Panics
    /// Panics if `dependency` already belongs to another instance.
    pub fn add_dependency<U: ResourceContent>(&self, dependency: &Instance<U>) -> Result<()> {
        if !Arc::ptr_eq(&self.manager, &dependency.manager) {
            return Err(ResourceError::InvalidInstance);
        }
        let mut arena = self.manager.instances.lock();
        add_dependency(&mut arena, self.shared.id, dependency.shared.id)
    }

    /// Block until the tick thread has assigned a resource or failed the
    /// request. Returns whether a resource was assigned.
    pub fn wait_until_resolved(&self, timeout: Duration) -> bool {
        self.shared.wait_until_resolved(timeout)
    }

    /// Like [`Instance::wait_until_resolved`], but reports why the request
    /// did not resolve: the failure reason, or [`ResourceError::Timeout`].
    pub fn try_wait_until_resolved(&self, timeout: Duration) -> Result<()> {
        if self.shared.wait_until_resolved(timeout) {
            return Ok(());
        }
        Err(self.error().unwrap_or(ResourceError::Timeout))
    }

    /// Why the request can never become ready, if it failed
    pub fn error(&self) -> Option<ResourceError> {
        if let Some(error) = self.shared.failure() {
            return Some(error);
        }
        self.shared
            .resource()
            .filter(|resource| resource.construction_failed())
            .map(|resource| {
                ResourceError::ResourceLoadError(format!(
                    "{} failed to construct",
                    resource.hash()
                ))
            })
    }
}

impl<T: ResourceContent> Drop for Instance<T> {
    fn drop(&mut self) {
        self.shared.unlink();
        self.manager.releases.push(self.shared.id);
    }
}

impl<T: ResourceContent> std::fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.shared.id)
            .field("hash", &self.shared.hash)
            .field("status", &self.status())
            .finish()
    }
}

/// Temporary pin on a ready instance's resource
pub struct InstanceBorrow<'a, T: ResourceContent> {
    instance: &'a Instance<T>,
    resource: Arc<ResourceObject>,
}

impl<T: ResourceContent> InstanceBorrow<'_, T> {
    pub fn resource(&self) -> &Arc<ResourceObject> {
        &self.resource
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.resource.read::<T, R>(f)
    }
}

impl<T: ResourceContent> Drop for InstanceBorrow<'_, T> {
    fn drop(&mut self) {
        self.instance.shared.borrows.fetch_sub(1, Ordering::SeqCst);
    }
}
