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

//! Cross-file reference bookkeeping contract.
//!
//! The lifecycle engine never calls this itself; resource objects forward to it
//! when their data declares references to other files.

use crate::hash::ResourceHash;

pub trait ReferenceManager: Send + Sync {
    fn register_file_reference(&self, from: &ResourceHash, to: &ResourceHash);

    fn remove_file_reference(&self, from: &ResourceHash, to: &ResourceHash);

    /// Point every reference to `from` at `to`
    fn redirect_references(&self, from: &ResourceHash, to: &ResourceHash);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{Factory, ResourceContent};
    use crate::flags::{BuildFlags, BuildInfo};
    use crate::object::ResourceObject;
    use parking_lot::Mutex;
    use std::any::{Any, TypeId};
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingReferences {
        links: Mutex<Vec<(u64, u64)>>,
    }

    impl ReferenceManager for RecordingReferences {
        fn register_file_reference(&self, from: &ResourceHash, to: &ResourceHash) {
            self.links.lock().push((from.digest(), to.digest()));
        }

        fn remove_file_reference(&self, from: &ResourceHash, to: &ResourceHash) {
            self.links
                .lock()
                .retain(|link| *link != (from.digest(), to.digest()));
        }

        fn redirect_references(&self, from: &ResourceHash, to: &ResourceHash) {
            for link in self.links.lock().iter_mut() {
                if link.1 == from.digest() {
                    link.1 = to.digest();
                }
            }
        }
    }

    struct Unit;

    impl ResourceContent for Unit {
        fn on_construct(&mut self, _data: &[u8], _build_flags: BuildFlags) -> bool {
            true
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct UnitFactory;

    impl Factory for UnitFactory {
        fn type_name(&self) -> &'static str {
            "Unit"
        }

        fn request_object(&self) -> Box<dyn ResourceContent> {
            Box::new(Unit)
        }
    }

    #[test]
    fn test_object_forwards_references() {
        let references = RecordingReferences::default();
        let object = ResourceObject::new(
            ResourceHash::new("materials/stone"),
            BuildInfo::default(),
            TypeId::of::<Unit>(),
            Arc::new(UnitFactory),
            Box::new(Unit),
            None,
        );
        let texture = ResourceHash::new("textures/stone");
        let moved = ResourceHash::new("textures/granite");

        object.register_reference(&references, &texture);
        assert_eq!(references.links.lock().len(), 1);

        references.redirect_references(&texture, &moved);
        object.remove_reference(&references, &moved);
        assert!(references.links.lock().is_empty());
    }
}
