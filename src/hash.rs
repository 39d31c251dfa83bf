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

//! Content keys.
//!
//! A [`ResourceHash`] pairs a canonical path with a 64-bit digest of that path.
//! The digest ignores separator characters and the order of the remaining bytes,
//! so `a/b`, `a\b` and `ab` all name the same resource. Equality, ordering and
//! hashing only look at the digest.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Content-addressing key of a resource
#[derive(Clone)]
pub struct ResourceHash {
    path: String,
    digest: u64,
}

impl ResourceHash {
    /// Create a key from a path, computing its digest
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let digest = digest_path(&path);
        Self { path, digest }
    }

    /// Create a key from a precomputed digest
    pub fn from_parts(path: impl Into<String>, digest: u64) -> Self {
        Self {
            path: path.into(),
            digest,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }
}

/// Order-independent digest of a path, separators excluded.
pub fn digest_path(path: &str) -> u64 {
    let mut sum = 0u64;
    let mut folded = 0u64;
    let mut count = 0u64;

    for byte in path.bytes().filter(|b| *b != b'/' && *b != b'\\') {
        let mixed = mix64(u64::from(byte));
        sum = sum.wrapping_add(mixed);
        folded ^= mixed.rotate_left(23);
        count += 1;
    }

    mix64(sum ^ mix64(folded) ^ count.rotate_left(56))
}

// splitmix64 finalizer
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl PartialEq for ResourceHash {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for ResourceHash {}

impl PartialOrd for ResourceHash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceHash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.digest.cmp(&other.digest)
    }
}

impl Hash for ResourceHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Debug for ResourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHash({:?}, {:#018x})", self.path, self.digest)
    }
}

impl fmt::Display for ResourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for ResourceHash {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for ResourceHash {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}
