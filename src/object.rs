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

//! Cached resource objects.
//!
//! A [`ResourceObject`] is keyed by `(hash, build flags)` and shared between
//! every instance that requested it. Besides the `Arc` that keeps the memory
//! alive it carries an explicit lifecycle count: one per linked instance. The
//! manager evicts the object when that count reaches zero.

use crate::data::ResourceData;
use crate::factory::{Factory, ResourceContent};
use crate::flags::{AtomicResourceStatus, BuildInfo, ResourceFlags, ResourceStatus};
use crate::hash::ResourceHash;
use crate::references::ReferenceManager;
use crate::storage::ResourceKey;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of dropping one lifecycle reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceRelease {
    /// Other references remain
    Referenced,
    /// Count reached zero but the object stays (permanent, mid-replacement,
    /// or release not allowed by the caller)
    Retained,
    /// Count reached zero and the object should be evicted
    Released,
}

/// Cached, reference-counted resource content plus lifecycle state
pub struct ResourceObject {
    hash: ResourceHash,
    build_info: BuildInfo,
    type_id: TypeId,
    factory: Arc<dyn Factory>,
    status: AtomicResourceStatus,
    references: AtomicU32,
    keep_data: AtomicBool,
    in_flight: AtomicBool,
    torn_down: AtomicBool,
    data: Mutex<ResourceData>,
    content: Mutex<Option<Box<dyn ResourceContent>>>,
    replacing: Mutex<Option<Arc<ResourceObject>>>,
}

impl ResourceObject {
    /// Create an unloaded object. `runtime` bytes make it a runtime resource
    /// that never touches the file collaborator.
    pub fn new(
        hash: ResourceHash,
        build_info: BuildInfo,
        type_id: TypeId,
        factory: Arc<dyn Factory>,
        content: Box<dyn ResourceContent>,
        runtime: Option<Vec<u8>>,
    ) -> Self {
        let mut status = ResourceStatus::empty();
        if build_info.flags.contains(ResourceFlags::PERMANENT) {
            status |= ResourceStatus::PERMANENT;
        }

        let data = match runtime {
            Some(bytes) => {
                status |= ResourceStatus::RUNTIME;
                ResourceData::runtime(bytes)
            }
            None => ResourceData::new(),
        };

        Self {
            hash,
            build_info,
            type_id,
            factory,
            status: AtomicResourceStatus::new(status),
            references: AtomicU32::new(0),
            keep_data: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            data: Mutex::new(data),
            content: Mutex::new(Some(content)),
            replacing: Mutex::new(None),
        }
    }

    pub fn hash(&self) -> &ResourceHash {
        &self.hash
    }

    pub fn build_info(&self) -> BuildInfo {
        self.build_info
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.hash, self.build_info.build_flags)
    }

    /// `TypeId` of the content type this object was created for
    pub fn content_type(&self) -> TypeId {
        self.type_id
    }

    pub fn factory(&self) -> &Arc<dyn Factory> {
        &self.factory
    }

    pub fn status(&self) -> ResourceStatus {
        self.status.load()
    }

    pub fn references(&self) -> u32 {
        self.references.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    /// Constructed and live, even with a data change pending
    pub fn is_usable(&self) -> bool {
        self.status().is_usable()
    }

    pub fn is_loaded(&self) -> bool {
        self.status().contains(ResourceStatus::LOADED)
    }

    pub fn is_constructed(&self) -> bool {
        self.status().contains(ResourceStatus::CONSTRUCTED)
    }

    pub fn is_runtime(&self) -> bool {
        self.status().contains(ResourceStatus::RUNTIME)
    }

    pub fn is_permanent(&self) -> bool {
        self.status().contains(ResourceStatus::PERMANENT)
    }

    pub fn construction_failed(&self) -> bool {
        self.status().contains(ResourceStatus::CONSTRUCTION_FAILED)
    }

    pub fn is_pending_deletion(&self) -> bool {
        self.status().contains(ResourceStatus::PENDING_DELETION)
    }

    pub fn is_pending_modification(&self) -> bool {
        self.status().contains(ResourceStatus::PENDING_MODIFICATION)
    }

    /// Queued for replacement or superseded by a successor still loading
    pub fn is_mid_replacement(&self) -> bool {
        self.is_pending_modification() || self.replacing.lock().is_some()
    }

    /// A load job for this object has not been collected yet
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Size of the payload currently held
    pub fn data_len(&self) -> usize {
        self.data.lock().len()
    }

    /// Run `f` against the content if it is of type `T`
    pub fn read<T: ResourceContent, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let content = self.content.lock();
        content
            .as_ref()
            .and_then(|content| content.as_any().downcast_ref::<T>())
            .map(f)
    }

    pub fn increment_references(&self) -> u32 {
        self.references.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one lifecycle reference.
    ///
    /// # Panics
    /// Panics if the count is already zero.
    pub fn decrement_references(&self, allow_release: bool) -> ReferenceRelease {
        let previous = match self
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
        {
            Ok(previous) => previous,
            Err(_) => panic!("Released {} with no outstanding references", self.hash),
        };

        if previous > 1 {
            ReferenceRelease::Referenced
        } else if !allow_release || self.is_permanent() || self.replacing.lock().is_some() {
            ReferenceRelease::Retained
        } else {
            ReferenceRelease::Released
        }
    }

    /// Allocate the payload buffer through the factory
    pub fn allocate(&self, size: usize) -> bool {
        let mut data = self.data.lock();
        self.factory.allocate_data(&mut data, size)
    }

    /// Fill the payload buffer in place
    pub fn write_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.lock();
        f(data.as_mut_slice())
    }

    /// Finish the load step. Fails (and marks construction failed) when a
    /// file-backed object ended up with no payload.
    pub fn begin_load(&self, persistent: bool) -> bool {
        let empty = self.data.lock().is_empty();
        if empty && !self.is_runtime() {
            warn!(path = %self.hash, "Resource has no payload, construction skipped");
            self.status.insert(ResourceStatus::CONSTRUCTION_FAILED);
            self.release_data();
            return false;
        }

        self.keep_data.store(persistent, Ordering::Release);
        self.status.insert(ResourceStatus::LOADED);
        true
    }

    /// Run the construction hook against the payload
    pub fn begin_construct(&self) -> bool {
        let status = self.status();
        if !status.contains(ResourceStatus::LOADED)
            || status.contains(ResourceStatus::CONSTRUCTION_FAILED)
        {
            return false;
        }

        let constructed = {
            let data = self.data.lock();
            let mut content = self.content.lock();
            match content.as_mut() {
                Some(content) => content.on_construct(data.as_slice(), self.build_info.build_flags),
                None => false,
            }
        };

        if constructed {
            self.status.insert(ResourceStatus::CONSTRUCTED);
        } else {
            warn!(path = %self.hash, build_flags = ?self.build_info.build_flags, "Resource construction failed");
            self.status.insert(ResourceStatus::CONSTRUCTION_FAILED);
        }

        if !self.keep_data.load(Ordering::Acquire) {
            self.release_data();
        }

        constructed
    }

    /// Run the second construction phase
    pub fn begin_external_construct(&self, context: Option<&dyn Any>) -> bool {
        let status = self.status();
        if !status.contains(ResourceStatus::CONSTRUCTED)
            || status.contains(ResourceStatus::CONSTRUCTION_FAILED)
        {
            return false;
        }

        let constructed = match self.content.lock().as_mut() {
            Some(content) => content.on_external_construct(context),
            None => false,
        };

        if constructed {
            self.status.insert(ResourceStatus::EXTERNALLY_CONSTRUCTED);
        } else {
            warn!(path = %self.hash, "External construction failed");
            self.status.insert(ResourceStatus::CONSTRUCTION_FAILED);
        }
        constructed
    }

    /// Run the teardown hook and free the payload. Returns false if the object
    /// was already torn down.
    ///
    /// # Panics
    /// Panics if lifecycle references remain.
    pub fn begin_delete(&self) -> bool {
        let references = self.references();
        assert_eq!(
            references, 0,
            "Teardown of {} while {references} references remain",
            self.hash
        );

        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(content) = self.content.lock().as_mut() {
            content.on_delete();
        }

        self.status.remove(
            ResourceStatus::LOADED
                | ResourceStatus::CONSTRUCTED
                | ResourceStatus::EXTERNALLY_CONSTRUCTED,
        );
        self.release_data();
        debug!(path = %self.hash, "Resource torn down");
        true
    }

    /// Take the content for reclamation by the factory
    pub fn take_content(&self) -> Option<Box<dyn ResourceContent>> {
        self.content.lock().take()
    }

    /// Mark this object as superseded by `other`
    pub fn register_replacing_resource(&self, other: Arc<ResourceObject>) {
        *self.replacing.lock() = Some(other);
    }

    /// Successor readers should redirect to, while a replacement is running
    pub fn replacing_resource(&self) -> Option<Arc<ResourceObject>> {
        self.replacing.lock().clone()
    }

    pub(crate) fn clear_replacing_resource(&self) -> Option<Arc<ResourceObject>> {
        self.replacing.lock().take()
    }

    /// Record that this resource's file references `target`
    pub fn register_reference(&self, references: &dyn ReferenceManager, target: &ResourceHash) {
        references.register_file_reference(&self.hash, target);
    }

    /// Forget a reference registered with [`register_reference`](Self::register_reference)
    pub fn remove_reference(&self, references: &dyn ReferenceManager, target: &ResourceHash) {
        references.remove_file_reference(&self.hash, target);
    }

    pub(crate) fn mark_permanent(&self) {
        self.status.insert(ResourceStatus::PERMANENT);
    }

    pub(crate) fn mark_pending_deletion(&self) {
        self.status.insert(ResourceStatus::PENDING_DELETION);
    }

    pub(crate) fn mark_pending_modification(&self) {
        self.status.insert(ResourceStatus::PENDING_MODIFICATION);
    }

    pub(crate) fn clear_pending_modification(&self) {
        self.status.remove(ResourceStatus::PENDING_MODIFICATION);
    }

    /// Give up on a load that never reached `begin_load`
    pub(crate) fn fail_load(&self) {
        self.status.insert(ResourceStatus::CONSTRUCTION_FAILED);
        self.release_data();
    }

    pub(crate) fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Release);
    }

    fn release_data(&self) {
        let mut data = self.data.lock();
        if data.is_runtime() {
            data.clear_runtime();
        } else if !data.is_deallocated() {
            self.factory.deallocate_data(&mut data);
        }
    }
}

impl fmt::Debug for ResourceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceObject")
            .field("hash", &self.hash)
            .field("build_info", &self.build_info)
            .field("status", &self.status())
            .field("references", &self.references())
            .finish()
    }
}
