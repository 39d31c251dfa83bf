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

//! Hot-reload change detection.
//!
//! A [`Watcher`] tracks the backing files of cached objects and reports data
//! changes through a [`DataChangedNotifier`]. Notifications are queued and
//! handled by the manager on its next tick.

use crate::error::Result;
use crate::hash::ResourceHash;
use crate::object::ResourceObject;
use crate::storage::ResourceKey;
use ahash::{AHashMap, AHashSet};
use crossbeam::channel::Sender;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Sending side of the manager's data-changed queue
#[derive(Clone)]
pub struct DataChangedNotifier {
    sender: Sender<Arc<ResourceObject>>,
}

impl DataChangedNotifier {
    pub(crate) fn new(sender: Sender<Arc<ResourceObject>>) -> Self {
        Self { sender }
    }

    /// Report that the data behind `object` changed. Returns false once the
    /// manager is gone.
    pub fn notify(&self, object: Arc<ResourceObject>) -> bool {
        self.sender.send(object).is_ok()
    }
}

/// File-change source driven by the manager's tick
pub trait Watcher: Send {
    fn watch_resource(&mut self, object: &Arc<ResourceObject>);

    fn remove_watch(&mut self, object: &ResourceObject);

    /// `object` superseded the watched object with the same key
    fn update_watched_resource(&mut self, object: &Arc<ResourceObject>);

    fn register_on_resource_data_changed(&mut self, notifier: DataChangedNotifier);

    /// Poll for changes
    fn update(&mut self) {}
}

/// Watcher that never reports anything
#[derive(Default)]
pub struct NullWatcher;

impl Watcher for NullWatcher {
    fn watch_resource(&mut self, _object: &Arc<ResourceObject>) {}

    fn remove_watch(&mut self, _object: &ResourceObject) {}

    fn update_watched_resource(&mut self, _object: &Arc<ResourceObject>) {}

    fn register_on_resource_data_changed(&mut self, _notifier: DataChangedNotifier) {}
}

/// Time and modification-time source for [`PollingWatcher`]
pub trait ModificationClock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn file_modified(&self, hash: &ResourceHash) -> io::Result<SystemTime>;
}

impl<C: ModificationClock + ?Sized> ModificationClock for Arc<C> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }

    fn file_modified(&self, hash: &ResourceHash) -> io::Result<SystemTime> {
        (**self).file_modified(hash)
    }
}

/// Modification times of files under a root directory
pub struct FileSystemClock {
    root: PathBuf,
}

impl FileSystemClock {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModificationClock for FileSystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn file_modified(&self, hash: &ResourceHash) -> io::Result<SystemTime> {
        std::fs::metadata(self.root.join(hash.path()))?.modified()
    }
}

struct WatchedResource {
    object: Weak<ResourceObject>,
    modified: Option<SystemTime>,
}

/// Watcher comparing modification times at a fixed interval
pub struct PollingWatcher {
    clock: Box<dyn ModificationClock>,
    check_interval: Duration,
    last_check: Option<SystemTime>,
    watched: AHashMap<ResourceKey, WatchedResource>,
    notifier: Option<DataChangedNotifier>,
}

impl PollingWatcher {
    pub fn new(clock: Box<dyn ModificationClock>) -> Self {
        Self {
            clock,
            check_interval: Duration::from_millis(500),
            last_check: None,
            watched: AHashMap::new(),
            notifier: None,
        }
    }

    pub fn set_check_interval(&mut self, interval: Duration) {
        self.check_interval = interval;
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    fn due(&self, now: SystemTime) -> bool {
        match self.last_check {
            None => true,
            Some(last) => now
                .duration_since(last)
                .is_ok_and(|elapsed| elapsed >= self.check_interval),
        }
    }
}

impl Watcher for PollingWatcher {
    fn watch_resource(&mut self, object: &Arc<ResourceObject>) {
        let modified = self.clock.file_modified(object.hash()).ok();
        self.watched.insert(
            object.key(),
            WatchedResource {
                object: Arc::downgrade(object),
                modified,
            },
        );
    }

    fn remove_watch(&mut self, object: &ResourceObject) {
        let key = object.key();
        let watches_object = self
            .watched
            .get(&key)
            .is_some_and(|watched| std::ptr::eq(watched.object.as_ptr(), object));
        if watches_object {
            self.watched.remove(&key);
        }
    }

    fn update_watched_resource(&mut self, object: &Arc<ResourceObject>) {
        match self.watched.get_mut(&object.key()) {
            Some(watched) => watched.object = Arc::downgrade(object),
            None => self.watch_resource(object),
        }
    }

    fn register_on_resource_data_changed(&mut self, notifier: DataChangedNotifier) {
        self.notifier = Some(notifier);
    }

    fn update(&mut self) {
        let now = self.clock.now();
        if !self.due(now) {
            return;
        }
        self.last_check = Some(now);

        let Some(notifier) = self.notifier.as_ref() else {
            return;
        };

        for watched in self.watched.values_mut() {
            let Some(object) = watched.object.upgrade() else {
                continue;
            };
            let Ok(modified) = self.clock.file_modified(object.hash()) else {
                continue;
            };
            if watched.modified.is_some_and(|previous| previous >= modified) {
                continue;
            }
            watched.modified = Some(modified);
            debug!(path = %object.hash(), "Resource data changed");
            notifier.notify(object);
        }
    }
}

/// Watcher fed by operating-system file events under a root directory.
///
/// Events arrive on notify's own thread and are collected until the next
/// [`Watcher::update`], so a burst of writes to one file reports one change
/// per tick.
pub struct NotifyWatcher {
    root: PathBuf,
    _events: RecommendedWatcher,
    changed: Arc<Mutex<AHashSet<PathBuf>>>,
    watched: AHashMap<PathBuf, Weak<ResourceObject>>,
    notifier: Option<DataChangedNotifier>,
}

impl NotifyWatcher {
    /// Watch everything below `root`, which must exist
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::fs::canonicalize(root)?;
        let changed = Arc::new(Mutex::new(AHashSet::new()));

        let sink = changed.clone();
        let mut events =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| match event {
                Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                    sink.lock().extend(event.paths);
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "File watcher error"),
            })?;
        events.watch(&root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), "Watching resource directory");

        Ok(Self {
            root,
            _events: events,
            changed,
            watched: AHashMap::new(),
            notifier: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    fn resolve(&self, hash: &ResourceHash) -> PathBuf {
        self.root.join(hash.path())
    }
}

impl Watcher for NotifyWatcher {
    fn watch_resource(&mut self, object: &Arc<ResourceObject>) {
        self.watched
            .insert(self.resolve(object.hash()), Arc::downgrade(object));
    }

    fn remove_watch(&mut self, object: &ResourceObject) {
        let path = self.resolve(object.hash());
        let watches_object = self
            .watched
            .get(&path)
            .is_some_and(|watched| std::ptr::eq(watched.as_ptr(), object));
        if watches_object {
            self.watched.remove(&path);
        }
    }

    fn update_watched_resource(&mut self, object: &Arc<ResourceObject>) {
        self.watch_resource(object);
    }

    fn register_on_resource_data_changed(&mut self, notifier: DataChangedNotifier) {
        self.notifier = Some(notifier);
    }

    fn update(&mut self) {
        let changed: Vec<PathBuf> = self.changed.lock().drain().collect();
        let Some(notifier) = self.notifier.as_ref() else {
            return;
        };

        for path in changed {
            let Some(object) = self.watched.get(&path).and_then(Weak::upgrade) else {
                continue;
            };
            debug!(path = %object.hash(), "Resource data changed");
            notifier.notify(object);
        }
    }
}
