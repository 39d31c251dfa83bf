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

//! Resource cache map.
//!
//! Only the manager's tick thread mutates the storage, so it carries no locks.

use crate::flags::BuildFlags;
use crate::hash::ResourceHash;
use crate::object::ResourceObject;
use ahash::AHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// Cache identity: digest plus build flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub digest: u64,
    pub build_flags: BuildFlags,
}

impl ResourceKey {
    pub fn new(hash: &ResourceHash, build_flags: BuildFlags) -> Self {
        Self {
            digest: hash.digest(),
            build_flags,
        }
    }
}

/// Owner of every cached resource object
pub struct Storage {
    objects: AHashMap<ResourceKey, Arc<ResourceObject>>,
    /// Bare digest -> every cached build-flag variant
    variants: Option<AHashMap<u64, SmallVec<[BuildFlags; 2]>>>,
}

impl Storage {
    pub fn new(hash_index: bool) -> Self {
        Self {
            objects: AHashMap::with_capacity(256),
            variants: hash_index.then(AHashMap::new),
        }
    }

    pub fn find_object(
        &self,
        hash: &ResourceHash,
        build_flags: BuildFlags,
    ) -> Option<&Arc<ResourceObject>> {
        self.objects.get(&ResourceKey::new(hash, build_flags))
    }

    /// True if `object` itself (not just its key) is cached
    pub fn contains(&self, object: &ResourceObject) -> bool {
        self.objects
            .get(&object.key())
            .is_some_and(|cached| std::ptr::eq(Arc::as_ptr(cached), object))
    }

    /// Insert under the object's own key. Fails on key collision.
    pub fn insert_object(&mut self, object: Arc<ResourceObject>) -> bool {
        let key = object.key();
        if self.objects.contains_key(&key) {
            return false;
        }
        self.objects.insert(key, object);
        self.index_variant(key);
        true
    }

    /// Swap the slot for the object's key, returning the superseded object
    pub fn replace_object(&mut self, object: Arc<ResourceObject>) -> Option<Arc<ResourceObject>> {
        let key = object.key();
        let previous = self.objects.insert(key, object);
        if previous.is_none() {
            self.index_variant(key);
        }
        previous
    }

    /// Remove `object` and return its ownership, if it is the cached entry
    pub fn get_object_ownership(&mut self, object: &ResourceObject) -> Option<Arc<ResourceObject>> {
        if !self.contains(object) {
            return None;
        }
        let key = object.key();
        let owned = self.objects.remove(&key);
        self.unindex_variant(key);
        owned
    }

    /// Remove and return every permanent object
    pub fn get_permanent_resources_ownership(&mut self) -> Vec<Arc<ResourceObject>> {
        let keys: Vec<ResourceKey> = self
            .objects
            .iter()
            .filter(|(_, object)| object.is_permanent())
            .map(|(key, _)| *key)
            .collect();

        let mut owned = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(object) = self.objects.remove(&key) {
                self.unindex_variant(key);
                owned.push(object);
            }
        }
        owned
    }

    /// Remove and return everything
    pub fn take_all(&mut self) -> Vec<Arc<ResourceObject>> {
        if let Some(variants) = self.variants.as_mut() {
            variants.clear();
        }
        self.objects.drain().map(|(_, object)| object).collect()
    }

    /// Build-flag variants cached for a bare hash (requires the hash index)
    pub fn variants(&self, hash: &ResourceHash) -> Vec<BuildFlags> {
        self.variants
            .as_ref()
            .and_then(|variants| variants.get(&hash.digest()))
            .map(|flags| flags.to_vec())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceObject>> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn index_variant(&mut self, key: ResourceKey) {
        if let Some(variants) = self.variants.as_mut() {
            let flags = variants.entry(key.digest).or_default();
            if !flags.contains(&key.build_flags) {
                flags.push(key.build_flags);
            }
        }
    }

    fn unindex_variant(&mut self, key: ResourceKey) {
        if let Some(variants) = self.variants.as_mut() {
            if let Some(flags) = variants.get_mut(&key.digest) {
                flags.retain(|flags| *flags != key.build_flags);
                if flags.is_empty() {
                    variants.remove(&key.digest);
                }
            }
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(false)
    }
}
