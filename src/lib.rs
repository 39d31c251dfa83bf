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

//! Resource Lifecycle - reference-counted resource cache
//!
//! Requests from any thread resolve on a single tick thread. Objects load on
//! background workers, instances construct in dependency order, and changed
//! data is hot-reloaded without invalidating live handles.

pub mod config;
pub mod data;
pub mod deleter;
pub mod error;
pub mod factory;
pub mod flags;
pub mod hash;
pub mod instance;
pub mod loader;
pub mod manager;
pub mod multi_queue;
pub mod object;
pub mod prelude;
mod proxy;
pub mod references;
pub mod source;
pub mod stats;
pub mod storage;
pub mod watcher;

pub use config::*;
pub use data::*;
pub use error::*;
pub use factory::*;
pub use flags::*;
pub use hash::*;
pub use instance::{Instance, InstanceBorrow, InstanceId};
pub use manager::{Manager, ManagerHandle};
pub use multi_queue::*;
pub use object::*;
pub use references::*;
pub use source::*;
pub use stats::*;
pub use storage::*;
pub use watcher::*;
