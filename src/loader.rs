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

//! Background resource loading.
//!
//! Workers read, allocate and construct objects, then report back through a
//! completion channel the tick thread drains in [`Loader::update`]. Workers
//! never touch manager or storage state.

use crate::error::{ResourceError, Result};
use crate::flags::ResourceFlags;
use crate::object::ResourceObject;
use crate::source::FileLoader;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug_span, error, warn};

/// Completed load jobs drained in one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub completed: usize,
    pub failed: usize,
}

struct LoadOutcome {
    object: Arc<ResourceObject>,
    loaded: bool,
}

pub struct Loader {
    file_loader: Arc<dyn FileLoader>,
    jobs: Option<Sender<Arc<ResourceObject>>>,
    done_sender: Sender<LoadOutcome>,
    done: Receiver<LoadOutcome>,
    workers: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl Loader {
    /// Spawn `threads` workers. With zero threads every job runs inside
    /// [`submit`](Self::submit).
    pub fn new(file_loader: Arc<dyn FileLoader>, threads: usize) -> Result<Self> {
        let (done_sender, done) = unbounded();
        let mut loader = Self {
            file_loader,
            jobs: None,
            done_sender,
            done,
            workers: Vec::with_capacity(threads),
            in_flight: 0,
        };

        if threads > 0 {
            let (job_sender, jobs) = unbounded::<Arc<ResourceObject>>();
            for index in 0..threads {
                let jobs = jobs.clone();
                let done = loader.done_sender.clone();
                let file_loader = loader.file_loader.clone();
                let worker = thread::Builder::new()
                    .name(format!("resource-loader-{index}"))
                    .spawn(move || {
                        for object in jobs.iter() {
                            let loaded = load_object(file_loader.as_ref(), &object);
                            if done.send(LoadOutcome { object, loaded }).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| {
                        ResourceError::IoError(format!("Failed to spawn loader thread: {e}"))
                    })?;
                loader.workers.push(worker);
            }
            loader.jobs = Some(job_sender);
        }

        Ok(loader)
    }

    pub fn submit(&mut self, object: Arc<ResourceObject>) {
        object.set_in_flight(true);
        self.in_flight += 1;

        let object = match &self.jobs {
            Some(jobs) => match jobs.send(object) {
                Ok(()) => return,
                Err(rejected) => rejected.into_inner(),
            },
            None => object,
        };

        let loaded = load_object(self.file_loader.as_ref(), &object);
        // The receiver lives in `self`, so this cannot fail
        let _ = self.done_sender.send(LoadOutcome { object, loaded });
    }

    /// Drain completed jobs. Kinds with an external construct phase run it
    /// here, on the tick thread, with `context`.
    pub fn update(&mut self, context: Option<&dyn Any>) -> LoadReport {
        let mut report = LoadReport::default();
        while let Ok(LoadOutcome { object, loaded }) = self.done.try_recv() {
            self.in_flight -= 1;
            let mut loaded = loaded;
            if loaded && object.factory().requires_external_construct_phase() {
                loaded = object.begin_external_construct(context);
            }
            object.set_in_flight(false);

            if loaded {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Jobs submitted but not drained yet
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Stop accepting jobs and wait for the workers to finish theirs
    pub fn finish(&mut self) {
        self.jobs = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Resource loader thread panicked");
            }
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Read, allocate, load and construct one object
fn load_object(file_loader: &dyn FileLoader, object: &ResourceObject) -> bool {
    let _span = debug_span!("load", path = %object.hash()).entered();

    if !object.is_runtime() {
        if let Err(e) = read_payload(file_loader, object) {
            warn!(path = %object.hash(), error = %e, "Resource load failed");
            object.fail_load();
            return false;
        }
    }

    let persistent = object.build_info().flags.contains(ResourceFlags::PERSISTENT_DATA);
    if !object.begin_load(persistent) || !object.begin_construct() {
        return false;
    }
    if object.factory().requires_external_construct_phase() {
        return true;
    }
    object.begin_external_construct(None)
}

fn read_payload(file_loader: &dyn FileLoader, object: &ResourceObject) -> Result<()> {
    let hash = object.hash();
    let size = file_loader.file_size(hash)?;
    let len = usize::try_from(size).map_err(|_| ResourceError::AllocationFailed {
        path: hash.path().to_string(),
        size,
    })?;
    if !object.allocate(len) {
        return Err(ResourceError::AllocationFailed {
            path: hash.path().to_string(),
            size,
        });
    }
    object.write_data(|buffer| file_loader.read_file(hash, buffer))
}
