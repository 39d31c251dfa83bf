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

//! Manager configuration

use crate::error::{ResourceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MAX_WORKER_THREADS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Loader worker threads. Zero loads inline on the tick thread.
    pub loader_threads: usize,
    /// Deleter worker threads. Zero deletes inline on the tick thread.
    pub deleter_threads: usize,
    /// Producer queue shards, used with a thread-index function
    pub queue_shards: usize,
    /// Poll the watcher and handle data-changed notifications
    pub enable_hot_reload: bool,
    /// Keep the bare-hash index of build-flag variants
    pub hash_index: bool,
    /// Upper bound on ticks spent settling queues at shutdown
    pub shutdown_tick_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            loader_threads: 1,
            deleter_threads: 1,
            queue_shards: 1,
            enable_hot_reload: cfg!(debug_assertions),
            hash_index: false,
            shutdown_tick_limit: 1024,
        }
    }
}

impl ManagerConfig {
    /// Everything on the tick thread
    pub fn inline() -> Self {
        Self {
            loader_threads: 0,
            deleter_threads: 0,
            ..Self::default()
        }
    }

    pub fn with_hot_reload(mut self, enabled: bool) -> Self {
        self.enable_hot_reload = enabled;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_shards == 0 {
            return Err(ResourceError::ConfigError(
                "queue_shards must be at least 1".to_string(),
            ));
        }
        if self.loader_threads > MAX_WORKER_THREADS || self.deleter_threads > MAX_WORKER_THREADS {
            return Err(ResourceError::ConfigError(format!(
                "at most {MAX_WORKER_THREADS} worker threads are supported"
            )));
        }
        if self.shutdown_tick_limit == 0 {
            return Err(ResourceError::ConfigError(
                "shutdown_tick_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
