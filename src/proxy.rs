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

//! Deferred resource assignment.
//!
//! A request returns its handle before the tick thread has looked the resource
//! up. The [`CreationProxy`] travels with the request message and is resolved
//! exactly once on the tick thread, racing the caller dropping the handle.

use crate::error::ResourceError;
use crate::instance::InstanceShared;
use crate::object::{ReferenceRelease, ResourceObject};
use std::sync::Arc;

/// How a proxy resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fulfillment {
    /// The handle is live and now points at the object
    Assigned,
    /// The handle was dropped first; the reference taken for it was returned
    Abandoned(ReferenceRelease),
}

pub(crate) struct CreationProxy {
    target: Arc<InstanceShared>,
}

impl CreationProxy {
    pub(crate) fn new(target: Arc<InstanceShared>) -> Self {
        Self { target }
    }

    pub(crate) fn target(&self) -> &Arc<InstanceShared> {
        &self.target
    }

    /// Hand `object` to the instance, taking one lifecycle reference for it.
    ///
    /// When the handle is already gone the reference is dropped again, which
    /// may leave `object` unreferenced and due for eviction.
    pub(crate) fn fulfill(self, object: &Arc<ResourceObject>) -> Fulfillment {
        object.increment_references();
        if self.target.assign_if_linked(object.clone()) {
            Fulfillment::Assigned
        } else {
            Fulfillment::Abandoned(object.decrement_references(true))
        }
    }

    /// Resolve without a resource, recording why
    pub(crate) fn fail(self, error: ResourceError) {
        self.target.fail(error);
    }
}
