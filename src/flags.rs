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

//! Build information and status bit-sets.
//!
//! [`BuildFlags`] take part in cache identity: two requests for the same hash
//! with different build flags produce two cached objects. [`ResourceFlags`] only
//! change runtime behaviour and never affect lookup.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Build-output selector, part of the cache key
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildFlags(pub u32);

impl BuildFlags {
    pub const NONE: BuildFlags = BuildFlags(0);

    pub fn bits(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Behavioural flags that do not affect cache identity
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        /// Never evicted at zero references, only at shutdown
        const PERMANENT = 1 << 0;
        /// Keep the payload bytes after construction
        const PERSISTENT_DATA = 1 << 1;
        /// Ignore data-changed notifications
        const DISABLE_RELOAD = 1 << 2;
    }
}

impl Default for ResourceFlags {
    fn default() -> Self {
        ResourceFlags::empty()
    }
}

/// Everything a request carries besides the hash
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BuildInfo {
    pub build_flags: BuildFlags,
    pub flags: ResourceFlags,
}

impl BuildInfo {
    pub fn new(build_flags: BuildFlags, flags: ResourceFlags) -> Self {
        Self { build_flags, flags }
    }

    pub fn with_build_flags(build_flags: BuildFlags) -> Self {
        Self {
            build_flags,
            flags: ResourceFlags::empty(),
        }
    }

    pub fn with_flags(flags: ResourceFlags) -> Self {
        Self {
            build_flags: BuildFlags::NONE,
            flags,
        }
    }
}

bitflags! {
    /// Lifecycle state of a cached resource object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStatus: u32 {
        const LOADED = 1 << 0;
        const CONSTRUCTED = 1 << 1;
        const EXTERNALLY_CONSTRUCTED = 1 << 2;
        const PENDING_MODIFICATION = 1 << 3;
        const PENDING_DELETION = 1 << 4;
        const CONSTRUCTION_FAILED = 1 << 5;
        const RUNTIME = 1 << 6;
        const PERMANENT = 1 << 7;
    }
}

impl ResourceStatus {
    /// loaded ∧ constructed ∧ externally-constructed, with no pending or failed bit
    pub fn is_ready(self) -> bool {
        self.contains(Self::LOADED | Self::CONSTRUCTED | Self::EXTERNALLY_CONSTRUCTED)
            && !self.intersects(
                Self::PENDING_MODIFICATION | Self::PENDING_DELETION | Self::CONSTRUCTION_FAILED,
            )
    }

    /// Fully constructed and still live. Unlike [`is_ready`](Self::is_ready)
    /// this holds while a data change is pending.
    pub fn is_usable(self) -> bool {
        self.contains(Self::LOADED | Self::CONSTRUCTED | Self::EXTERNALLY_CONSTRUCTED)
            && !self.intersects(Self::PENDING_DELETION | Self::CONSTRUCTION_FAILED)
    }
}

bitflags! {
    /// Lifecycle state of a resource instance
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstanceStatus: u8 {
        /// A caller handle still owns the instance
        const LINKED = 1 << 0;
        /// Construction hooks finished and every dependency is fulfilled
        const CONSTRUCTED = 1 << 1;
        /// `on_construct` fired, waiting on dependencies
        const CONSTRUCTION_BEGUN = 1 << 2;
        /// Resource could not be resolved or failed to construct
        const FAILED = 1 << 3;
    }
}

/// Status bits shared between threads
pub(crate) struct AtomicResourceStatus(AtomicU32);

impl AtomicResourceStatus {
    pub(crate) fn new(status: ResourceStatus) -> Self {
        Self(AtomicU32::new(status.bits()))
    }

    pub(crate) fn load(&self) -> ResourceStatus {
        ResourceStatus::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn insert(&self, status: ResourceStatus) {
        self.0.fetch_or(status.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, status: ResourceStatus) {
        self.0.fetch_and(!status.bits(), Ordering::AcqRel);
    }
}

pub(crate) struct AtomicInstanceStatus(AtomicU8);

impl AtomicInstanceStatus {
    pub(crate) fn new(status: InstanceStatus) -> Self {
        Self(AtomicU8::new(status.bits()))
    }

    pub(crate) fn load(&self) -> InstanceStatus {
        InstanceStatus::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn insert(&self, status: InstanceStatus) {
        self.0.fetch_or(status.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, status: InstanceStatus) {
        self.0.fetch_and(!status.bits(), Ordering::AcqRel);
    }
}
