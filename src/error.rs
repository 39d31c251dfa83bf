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

//! Error types
//!
//! Only recoverable conditions are represented here. Broken lifecycle contracts
//! (reference underflow, teardown of a referenced object, re-parenting a
//! dependency) panic instead.

use std::fmt;

/// Resource lifecycle error type
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// No factory registered for the requested resource type
    FactoryNotRegistered(&'static str),

    /// A factory is already registered for this resource type
    FactoryAlreadyRegistered(&'static str),

    /// Backing file does not exist
    ResourceNotFound(String),

    /// Backing file exists but could not be read
    ResourceLoadError(String),

    /// Factory refused to allocate the payload buffer
    AllocationFailed { path: String, size: u64 },

    /// Instance handle no longer refers to a live instance
    InvalidInstance,

    /// Dependency declared after the dependent instance already constructed
    DependencyAfterConstruction,

    /// An instance cannot depend on itself
    SelfDependency,

    /// The cached resource for this key holds a different content type
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Timed out waiting for the tick thread
    Timeout,

    /// Manager has been shut down and accepts no further requests
    ManagerShutDown,

    /// Invalid configuration value
    ConfigError(String),

    /// IO error (file operations, worker spawning, etc.)
    IoError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::FactoryNotRegistered(name) => {
                write!(f, "No factory registered for resource type {name}")
            }
            ResourceError::FactoryAlreadyRegistered(name) => {
                write!(f, "Factory already registered for resource type {name}")
            }
            ResourceError::ResourceNotFound(msg) => write!(f, "Resource not found: {msg}"),
            ResourceError::ResourceLoadError(msg) => write!(f, "Resource load error: {msg}"),
            ResourceError::AllocationFailed { path, size } => {
                write!(f, "Failed to allocate {size} bytes for {path}")
            }
            ResourceError::InvalidInstance => write!(f, "Invalid resource instance"),
            ResourceError::DependencyAfterConstruction => {
                write!(f, "Dependency declared after the dependent instance was constructed")
            }
            ResourceError::SelfDependency => write!(f, "An instance cannot depend on itself"),
            ResourceError::TypeMismatch { expected, found } => {
                write!(f, "Expected resource of type {expected}, cached resource is {found}")
            }
            ResourceError::Timeout => write!(f, "Timed out waiting for the resource manager"),
            ResourceError::ManagerShutDown => write!(f, "Resource manager has been shut down"),
            ResourceError::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            ResourceError::IoError(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        ResourceError::IoError(err.to_string())
    }
}

impl From<notify::Error> for ResourceError {
    fn from(err: notify::Error) -> Self {
        ResourceError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::ConfigError(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ResourceError>;
