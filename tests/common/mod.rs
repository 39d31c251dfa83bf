#![allow(dead_code)]

use parking_lot::Mutex;
use resource_lifecycle::prelude::*;
use resource_lifecycle::ModificationClock;
use std::any::Any;
use std::io;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime};

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// UTF-8 text content. Empty text and the literal `invalid` fail construction.
pub struct Text(pub String);

impl ResourceContent for Text {
    fn on_construct(&mut self, data: &[u8], _build_flags: BuildFlags) -> bool {
        match std::str::from_utf8(data) {
            Ok(text) if !text.is_empty() && text != "invalid" => {
                self.0 = text.to_string();
                true
            }
            _ => false,
        }
    }

    fn on_external_construct(&mut self, context: Option<&dyn Any>) -> bool {
        match context.and_then(|context| context.downcast_ref::<String>()) {
            Some(suffix) => {
                self.0.push_str(suffix);
                true
            }
            None => true,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RecordingHooks {
    name: String,
    log: EventLog,
}

impl InstanceHooks for RecordingHooks {
    fn on_construct(&mut self, _resource: &ResourceObject) {
        self.log.lock().push(format!("{}:construct", self.name));
    }

    fn on_dependencies_fulfilled(&mut self, _resource: &ResourceObject) {
        self.log.lock().push(format!("{}:fulfilled", self.name));
    }

    fn on_reset(&mut self) {
        self.log.lock().push(format!("{}:reset", self.name));
    }
}

/// Factory recording every instance event and released content
pub struct TextFactory {
    pub log: EventLog,
    pub released: Mutex<Vec<String>>,
    pub released_on: Mutex<Vec<ThreadId>>,
    pub instances_released: Mutex<usize>,
    pub delete_mode: DeleteMode,
    pub external: bool,
}

impl TextFactory {
    pub fn new() -> Self {
        Self {
            log: EventLog::default(),
            released: Mutex::new(Vec::new()),
            released_on: Mutex::new(Vec::new()),
            instances_released: Mutex::new(0),
            delete_mode: DeleteMode::Async,
            external: false,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.log.lock().iter().position(|logged| logged == event)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

impl Factory for TextFactory {
    fn type_name(&self) -> &'static str {
        "Text"
    }

    fn request_instance(&self, hash: &ResourceHash) -> Box<dyn InstanceHooks> {
        Box::new(RecordingHooks {
            name: hash.path().to_string(),
            log: self.log.clone(),
        })
    }

    fn release_instance(&self, _hooks: Box<dyn InstanceHooks>) {
        *self.instances_released.lock() += 1;
    }

    fn request_object(&self) -> Box<dyn ResourceContent> {
        Box::new(Text(String::new()))
    }

    fn release_object(&self, content: Box<dyn ResourceContent>) {
        self.released_on.lock().push(thread::current().id());
        if let Some(text) = content.as_any().downcast_ref::<Text>() {
            self.released.lock().push(text.0.clone());
        }
    }

    fn requires_external_construct_phase(&self) -> bool {
        self.external
    }

    fn delete_mode(&self) -> DeleteMode {
        self.delete_mode
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub manager: Manager,
    pub handle: ManagerHandle,
    pub files: Arc<MemoryFileLoader>,
    pub factory: Arc<TextFactory>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::inline().with_hot_reload(true))
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_factory(config, TextFactory::new())
    }

    pub fn with_factory(config: ManagerConfig, factory: TextFactory) -> Self {
        init_tracing();
        let files = Arc::new(MemoryFileLoader::new());
        let manager = Manager::new(config, files.clone()).unwrap();
        let factory = Arc::new(factory);
        manager.register_factory::<Text>(factory.clone()).unwrap();
        let handle = manager.handle();
        Self {
            manager,
            handle,
            files,
            factory,
        }
    }

    pub fn file(&self, path: &str, text: &str) {
        self.files.insert(path, text.as_bytes().to_vec());
    }

    pub fn request(&self, path: &str) -> Instance<Text> {
        self.handle.request::<Text>(path, BuildInfo::default()).unwrap()
    }

    /// Tick until `done` holds, at most `limit` times
    pub fn tick_until(&mut self, limit: usize, mut done: impl FnMut(&Manager) -> bool) -> bool {
        for _ in 0..limit {
            if done(&self.manager) {
                return true;
            }
            self.manager.update();
            thread::sleep(Duration::from_micros(200));
        }
        done(&self.manager)
    }

    pub fn settle(&mut self) -> bool {
        self.tick_until(1000, |manager| manager.is_settled())
    }
}

pub fn text(instance: &Instance<Text>) -> Option<String> {
    instance.read(|text| text.0.clone())
}

/// Hand-driven clock for the polling watcher
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Option<SystemTime>>,
    modified: Mutex<Vec<(u64, SystemTime)>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = Some(now.unwrap_or(SystemTime::UNIX_EPOCH) + by);
    }

    pub fn touch(&self, path: &str) {
        let now = self.now();
        let digest = ResourceHash::new(path).digest();
        let mut modified = self.modified.lock();
        modified.retain(|(file, _)| *file != digest);
        modified.push((digest, now));
    }
}

impl ModificationClock for ManualClock {
    fn now(&self) -> SystemTime {
        self.now.lock().unwrap_or(SystemTime::UNIX_EPOCH)
    }

    fn file_modified(&self, hash: &ResourceHash) -> io::Result<SystemTime> {
        self.modified
            .lock()
            .iter()
            .find(|(file, _)| *file == hash.digest())
            .map(|(_, modified)| *modified)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}
