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

//! Resource payload bytes.

/// Owned payload of a resource object.
///
/// File-backed payloads are allocated and freed through the owning
/// [`Factory`](crate::factory::Factory); runtime payloads are supplied inline by
/// the caller. Dropping a `ResourceData` that still holds bytes panics.
#[derive(Default)]
pub enum ResourceData {
    #[default]
    Empty,
    Allocated(Box<[u8]>),
    Runtime(Vec<u8>),
}

impl ResourceData {
    pub fn new() -> Self {
        ResourceData::Empty
    }

    pub fn runtime(bytes: Vec<u8>) -> Self {
        ResourceData::Runtime(bytes)
    }

    pub fn len(&self) -> usize {
        match self {
            ResourceData::Empty => 0,
            ResourceData::Allocated(bytes) => bytes.len(),
            ResourceData::Runtime(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, ResourceData::Runtime(_))
    }

    /// True once no backing memory remains
    pub fn is_deallocated(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            ResourceData::Empty => &[],
            ResourceData::Allocated(bytes) => bytes,
            ResourceData::Runtime(bytes) => bytes,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            ResourceData::Empty => &mut [],
            ResourceData::Allocated(bytes) => bytes,
            ResourceData::Runtime(bytes) => bytes,
        }
    }

    /// Install a factory allocation. Any previous contents must already be released.
    pub fn set_allocation(&mut self, bytes: Box<[u8]>) {
        assert!(
            self.is_deallocated(),
            "ResourceData already owns {} bytes",
            self.len()
        );
        *self = ResourceData::Allocated(bytes);
    }

    /// Hand a factory allocation back for reclamation
    pub fn take_allocation(&mut self) -> Option<Box<[u8]>> {
        match self {
            ResourceData::Allocated(bytes) => {
                let bytes = std::mem::take(bytes);
                *self = ResourceData::Empty;
                Some(bytes)
            }
            _ => None,
        }
    }

    /// Drop inline runtime bytes
    pub fn clear_runtime(&mut self) {
        if let ResourceData::Runtime(bytes) = self {
            *bytes = Vec::new();
            *self = ResourceData::Empty;
        }
    }
}

impl std::fmt::Debug for ResourceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceData::Empty => write!(f, "ResourceData::Empty"),
            ResourceData::Allocated(bytes) => write!(f, "ResourceData::Allocated({} bytes)", bytes.len()),
            ResourceData::Runtime(bytes) => write!(f, "ResourceData::Runtime({} bytes)", bytes.len()),
        }
    }
}

impl Drop for ResourceData {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                self.is_deallocated(),
                "ResourceData dropped while still owning {} bytes",
                self.len()
            );
        }
    }
}
