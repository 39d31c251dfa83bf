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

//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use resource_lifecycle::prelude::*;
//! ```

pub use crate::config::ManagerConfig;
pub use crate::error::{ResourceError, Result};
pub use crate::factory::{DeleteMode, Factory, InstanceHooks, NoInstanceHooks, ResourceContent};
pub use crate::flags::{BuildFlags, BuildInfo, InstanceStatus, ResourceFlags, ResourceStatus};
pub use crate::hash::ResourceHash;
pub use crate::instance::{Instance, InstanceBorrow};
pub use crate::manager::{Manager, ManagerHandle};
pub use crate::object::ResourceObject;
pub use crate::source::{DirectoryFileLoader, FileLoader, MemoryFileLoader};
pub use crate::watcher::{NotifyWatcher, PollingWatcher, Watcher};
