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

//! Backing-file access.
//!
//! The loader resolves every file-backed resource through a [`FileLoader`].
//! Reads block and run on loader workers, never on the tick thread (unless
//! the manager is configured without workers).

use crate::error::{ResourceError, Result};
use crate::hash::ResourceHash;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Blocking read access to resource files
pub trait FileLoader: Send + Sync {
    fn file_exists(&self, hash: &ResourceHash) -> bool;

    fn file_size(&self, hash: &ResourceHash) -> Result<u64>;

    /// Fill `buffer` with the file contents. `buffer` is exactly
    /// [`file_size`](Self::file_size) bytes long.
    fn read_file(&self, hash: &ResourceHash, buffer: &mut [u8]) -> Result<()>;
}

/// Files held in memory, keyed by hash digest
#[derive(Default)]
pub struct MemoryFileLoader {
    files: RwLock<AHashMap<u64, Vec<u8>>>,
}

impl MemoryFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a file
    pub fn insert(&self, hash: impl Into<ResourceHash>, bytes: impl Into<Vec<u8>>) {
        self.files.write().insert(hash.into().digest(), bytes.into());
    }

    pub fn remove(&self, hash: &ResourceHash) -> Option<Vec<u8>> {
        self.files.write().remove(&hash.digest())
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl FileLoader for MemoryFileLoader {
    fn file_exists(&self, hash: &ResourceHash) -> bool {
        self.files.read().contains_key(&hash.digest())
    }

    fn file_size(&self, hash: &ResourceHash) -> Result<u64> {
        self.files
            .read()
            .get(&hash.digest())
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| ResourceError::ResourceNotFound(hash.path().to_string()))
    }

    fn read_file(&self, hash: &ResourceHash, buffer: &mut [u8]) -> Result<()> {
        let files = self.files.read();
        let bytes = files
            .get(&hash.digest())
            .ok_or_else(|| ResourceError::ResourceNotFound(hash.path().to_string()))?;
        if bytes.len() != buffer.len() {
            return Err(ResourceError::ResourceLoadError(format!(
                "{} changed size while loading ({} != {})",
                hash.path(),
                bytes.len(),
                buffer.len()
            )));
        }
        buffer.copy_from_slice(bytes);
        Ok(())
    }
}

/// Files resolved by path under a root directory
pub struct DirectoryFileLoader {
    root: PathBuf,
}

impl DirectoryFileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of `hash`
    pub fn resolve(&self, hash: &ResourceHash) -> PathBuf {
        self.root.join(hash.path())
    }
}

impl FileLoader for DirectoryFileLoader {
    fn file_exists(&self, hash: &ResourceHash) -> bool {
        self.resolve(hash).is_file()
    }

    fn file_size(&self, hash: &ResourceHash) -> Result<u64> {
        let path = self.resolve(hash);
        fs::metadata(&path).map(|m| m.len()).map_err(|e| {
            ResourceError::ResourceLoadError(format!(
                "Failed to get file size {}: {e}",
                path.display()
            ))
        })
    }

    fn read_file(&self, hash: &ResourceHash, buffer: &mut [u8]) -> Result<()> {
        let path = self.resolve(hash);
        let mut file = File::open(&path).map_err(|e| {
            ResourceError::ResourceLoadError(format!("Failed to open {}: {e}", path.display()))
        })?;
        file.read_exact(buffer).map_err(|e| {
            ResourceError::ResourceLoadError(format!("Failed to read {}: {e}", path.display()))
        })
    }
}
