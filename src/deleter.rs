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

//! Background resource teardown.
//!
//! Workers run the teardown hook and hand the content back to its factory.
//! Kinds with [`DeleteMode::Sync`] are returned to the tick thread instead and
//! released in [`Deleter::update`].

use crate::error::{ResourceError, Result};
use crate::factory::DeleteMode;
use crate::object::ResourceObject;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug_span, error, trace};

enum Deleted {
    /// Fully released on the worker
    Released(Arc<ResourceObject>),
    /// Torn down, factory release pending on the tick thread
    ReleaseOnTick(Arc<ResourceObject>),
}

pub struct Deleter {
    jobs: Option<Sender<Arc<ResourceObject>>>,
    done_sender: Sender<Deleted>,
    done: Receiver<Deleted>,
    workers: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl Deleter {
    /// Spawn `threads` workers. With zero threads every job runs inside
    /// [`submit`](Self::submit).
    pub fn new(threads: usize) -> Result<Self> {
        let (done_sender, done) = unbounded();
        let mut deleter = Self {
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
                let done = deleter.done_sender.clone();
                let worker = thread::Builder::new()
                    .name(format!("resource-deleter-{index}"))
                    .spawn(move || {
                        for object in jobs.iter() {
                            if done.send(delete_object(object)).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| {
                        ResourceError::IoError(format!("Failed to spawn deleter thread: {e}"))
                    })?;
                deleter.workers.push(worker);
            }
            deleter.jobs = Some(job_sender);
        }

        Ok(deleter)
    }

    /// Queue an unreferenced object for teardown
    pub fn submit(&mut self, object: Arc<ResourceObject>) {
        self.in_flight += 1;
        let object = match &self.jobs {
            Some(jobs) => match jobs.send(object) {
                Ok(()) => return,
                Err(rejected) => rejected.into_inner(),
            },
            None => object,
        };
        let _ = self.done_sender.send(delete_object(object));
    }

    /// Finish sync-mode releases and count completed deletions
    pub fn update(&mut self) -> usize {
        let mut deleted = 0;
        while let Ok(outcome) = self.done.try_recv() {
            self.in_flight -= 1;
            deleted += 1;
            match outcome {
                Deleted::Released(object) => trace!(path = %object.hash(), "Resource deleted"),
                Deleted::ReleaseOnTick(object) => release_content(&object),
            }
        }
        deleted
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Stop accepting jobs and wait for the workers to finish theirs
    pub fn finish(&mut self) {
        self.jobs = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Resource deleter thread panicked");
            }
        }
    }
}

impl Drop for Deleter {
    fn drop(&mut self) {
        self.finish();
        self.update();
    }
}

fn delete_object(object: Arc<ResourceObject>) -> Deleted {
    let _span = debug_span!("delete", path = %object.hash()).entered();
    object.begin_delete();
    match object.factory().delete_mode() {
        DeleteMode::Async => {
            release_content(&object);
            Deleted::Released(object)
        }
        DeleteMode::Sync => Deleted::ReleaseOnTick(object),
    }
}

fn release_content(object: &ResourceObject) {
    if let Some(content) = object.take_content() {
        trace!(path = %object.hash(), "Releasing resource content");
        object.factory().release_object(content);
    }
}
