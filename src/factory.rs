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

//! Per-kind plug-in contract.
//!
//! Every resource kind registers one [`Factory`]. The lifecycle engine never
//! allocates or frees resource memory itself: payload buffers, resource content
//! and instance hooks all cross this boundary so a kind can back them with its
//! own pools.

use crate::data::ResourceData;
use crate::error::{ResourceError, Result};
use crate::flags::BuildFlags;
use crate::hash::ResourceHash;
use crate::object::ResourceObject;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Typed content of a resource object.
///
/// The concrete type doubles as the resource kind: factories are registered
/// and looked up by its `TypeId`.
pub trait ResourceContent: Send + Sync + 'static {
    /// Build the content from the loaded payload. Returning false marks the
    /// object as failed for good.
    fn on_construct(&mut self, data: &[u8], build_flags: BuildFlags) -> bool;

    /// Second construction phase, only run for kinds whose factory declares
    /// [`Factory::requires_external_construct_phase`] (with the host's context)
    /// or immediately after `on_construct` otherwise (without one).
    fn on_external_construct(&mut self, _context: Option<&dyn Any>) -> bool {
        true
    }

    /// Teardown hook, runs exactly once before the factory reclaims the content
    fn on_delete(&mut self) {}

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

/// Per-instance callbacks.
pub trait InstanceHooks: Send + 'static {
    /// The resource became ready and the instance starts constructing
    fn on_construct(&mut self, _resource: &ResourceObject) {}

    /// Every dependency of the instance is constructed
    fn on_dependencies_fulfilled(&mut self, _resource: &ResourceObject) {}

    /// The resource was replaced and the instance will construct again
    fn on_reset(&mut self) {}
}

/// Hooks for kinds that do not care about instance events
pub struct NoInstanceHooks;

impl InstanceHooks for NoInstanceHooks {}

/// Which thread hands a torn-down object back to its factory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Released on the deleter worker
    Async,
    /// Released on the tick thread (e.g. GPU handles owned by the main thread)
    Sync,
}

/// Creation and destruction contract of one resource kind
pub trait Factory: Send + Sync + 'static {
    /// Readable kind name for diagnostics
    fn type_name(&self) -> &'static str;

    /// Create the hooks for a new instance of `hash`
    fn request_instance(&self, _hash: &ResourceHash) -> Box<dyn InstanceHooks> {
        Box::new(NoInstanceHooks)
    }

    /// Reclaim the hooks of a detached instance
    fn release_instance(&self, _hooks: Box<dyn InstanceHooks>) {}

    /// Create empty content for a new resource object
    fn request_object(&self) -> Box<dyn ResourceContent>;

    /// Reclaim the content of a torn-down resource object
    fn release_object(&self, _content: Box<dyn ResourceContent>) {}

    /// Allocate `size` bytes of payload into `data`
    fn allocate_data(&self, data: &mut ResourceData, size: usize) -> bool {
        data.set_allocation(vec![0u8; size].into_boxed_slice());
        true
    }

    /// Free the payload held by `data`
    fn deallocate_data(&self, data: &mut ResourceData) {
        data.take_allocation();
    }

    fn requires_external_construct_phase(&self) -> bool {
        false
    }

    fn delete_mode(&self) -> DeleteMode {
        DeleteMode::Async
    }
}

/// Factories keyed by the content type they produce
#[derive(Default)]
pub struct FactoryRegistry {
    factories: FxHashMap<TypeId, Arc<dyn Factory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    pub fn register<T: ResourceContent>(&mut self, factory: Arc<dyn Factory>) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if self.factories.contains_key(&type_id) {
            return Err(ResourceError::FactoryAlreadyRegistered(
                std::any::type_name::<T>(),
            ));
        }
        self.factories.insert(type_id, factory);
        Ok(())
    }

    pub fn get<T: ResourceContent>(&self) -> Result<Arc<dyn Factory>> {
        self.get_by_id(TypeId::of::<T>())
            .ok_or_else(|| ResourceError::FactoryNotRegistered(std::any::type_name::<T>()))
    }

    pub fn get_by_id(&self, type_id: TypeId) -> Option<Arc<dyn Factory>> {
        self.factories.get(&type_id).cloned()
    }

    pub fn contains<T: ResourceContent>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
