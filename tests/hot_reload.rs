mod common;

use common::{init_tracing, text, Harness, ManualClock, Text, TextFactory};
use resource_lifecycle::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn loaded(path: &str, contents: &str) -> (Harness, Instance<Text>) {
    let mut h = Harness::new();
    h.file(path, contents);
    let instance = h.request(path);
    h.manager.update();
    assert!(instance.is_ready());
    (h, instance)
}

#[test]
fn test_data_change_replaces_resource() {
    let (mut h, instance) = loaded("config/app", "v1");
    let old = instance.resource().unwrap();

    h.file("config/app", "v2");
    assert!(h.manager.on_resource_data_changed(&old));
    assert!(old.is_pending_modification());
    assert!(!instance.is_ready());
    // Still readable while the change is queued
    assert_eq!(text(&instance).as_deref(), Some("v1"));

    assert!(h.tick_until(10, |_| text(&instance).as_deref() == Some("v2")));
    assert!(instance.is_ready());
    assert!(h.settle());

    let new = instance.resource().unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(h.manager.storage().contains(&new));
    assert_eq!(h.manager.storage().len(), 1);
    assert_eq!(new.references(), 1);
    assert_eq!(old.references(), 0);
    assert!(old.replacing_resource().is_none());
    assert_eq!(h.factory.released(), vec!["v1".to_string()]);
    assert!(h.factory.position("config/app:reset").is_some());

    let stats = h.manager.stats();
    assert_eq!(stats.replacements_started, 1);
    assert_eq!(stats.replacements_committed, 1);
}

#[test]
fn test_notifier_works_from_any_thread() {
    let (mut h, instance) = loaded("config/net", "port=80");
    let old = instance.resource().unwrap();
    h.file("config/net", "port=8080");

    let notifier = h.manager.data_changed_notifier();
    let sent = thread::spawn(move || notifier.notify(old)).join().unwrap();
    assert!(sent);

    assert!(h.tick_until(10, |_| text(&instance).as_deref() == Some("port=8080")));
}

#[test]
fn test_duplicate_notification_is_ignored() {
    let (mut h, instance) = loaded("config/ui", "dark");
    let old = instance.resource().unwrap();
    h.file("config/ui", "light");

    assert!(h.manager.on_resource_data_changed(&old));
    assert!(!h.manager.on_resource_data_changed(&old));
    assert_eq!(h.manager.pending_replacements(), 1);

    assert!(h.tick_until(10, |_| text(&instance).as_deref() == Some("light")));
    assert!(h.settle());
    let stats = h.manager.stats();
    assert_eq!(stats.duplicate_change_notifications, 1);
    assert_eq!(stats.replacements_started, 1);

    // The superseded object is gone from the cache
    assert!(!h.manager.on_resource_data_changed(&old));
}

#[test]
fn test_reload_opt_out_and_runtime_are_ignored() {
    let mut h = Harness::new();
    h.file("shader/final", "pass");
    let pinned = h
        .handle
        .request::<Text>("shader/final", BuildInfo::with_flags(ResourceFlags::DISABLE_RELOAD))
        .unwrap();
    let generated = h
        .handle
        .request_runtime::<Text>("mesh/procedural", BuildInfo::default(), "quad")
        .unwrap();
    h.manager.update();

    assert!(!h.manager.on_resource_data_changed(&pinned.resource().unwrap()));
    assert!(!h.manager.on_resource_data_changed(&generated.resource().unwrap()));
    assert_eq!(h.manager.pending_replacements(), 0);
}

#[test]
fn test_failed_reload_keeps_previous_resource() {
    let (mut h, instance) = loaded("level/one", "spawn");
    let old = instance.resource().unwrap();

    h.file("level/one", "invalid");
    assert!(h.manager.on_resource_data_changed(&old));
    assert!(h.tick_until(10, |manager| manager.stats().replacements_aborted == 1));
    assert!(h.tick_until(10, |_| instance.is_ready()));

    assert!(Arc::ptr_eq(&instance.resource().unwrap(), &old));
    assert!(h.manager.storage().contains(&old));
    assert!(!old.is_pending_modification());
    assert!(old.replacing_resource().is_none());
    assert_eq!(old.references(), 1);
    assert_eq!(text(&instance).as_deref(), Some("spawn"));

    assert!(h.settle());
    // Only the failed replacement was torn down
    assert_eq!(h.factory.released(), vec![String::new()]);
    assert_eq!(h.manager.stats().replacements_committed, 0);
}

#[test]
fn test_reload_repairs_failed_resource() {
    let (mut h, broken) = {
        let mut h = Harness::new();
        h.file("level/two", "invalid");
        let instance = h.request("level/two");
        h.manager.update();
        (h, instance)
    };
    assert!(broken.is_failed());

    h.file("level/two", "fixed");
    assert!(h.manager.on_resource_data_changed(&broken.resource().unwrap()));
    assert!(h.tick_until(10, |_| broken.is_ready()));
    assert!(!broken.is_failed());
    assert_eq!(text(&broken).as_deref(), Some("fixed"));
}

#[test]
fn test_borrow_defers_replacement() {
    let (mut h, instance) = loaded("texture/grass", "green");
    let old = instance.resource().unwrap();
    h.file("texture/grass", "yellow");

    let guard = instance.borrow().unwrap();
    assert_eq!(instance.borrow_count(), 1);
    assert!(h.manager.on_resource_data_changed(&old));
    for _ in 0..3 {
        h.manager.update();
    }
    assert_eq!(h.manager.pending_replacements(), 1);
    assert_eq!(guard.read(|text| text.0.clone()).as_deref(), Some("green"));
    assert!(Arc::ptr_eq(guard.resource(), &old));

    drop(guard);
    assert_eq!(instance.borrow_count(), 0);
    assert!(h.tick_until(10, |_| text(&instance).as_deref() == Some("yellow")));
}

#[test]
fn test_dependents_reconstruct_after_reload() {
    let mut h = Harness::new();
    h.file("scene/harbor", "harbor");
    h.file("mesh/ship", "sloop");
    let scene = h.request("scene/harbor");
    let ship = h.request("mesh/ship");
    scene.add_dependency(&ship).unwrap();
    h.manager.update();
    assert!(scene.is_ready());

    h.file("mesh/ship", "galleon");
    assert!(h.manager.on_resource_data_changed(&ship.resource().unwrap()));
    assert!(h.tick_until(10, |_| {
        scene.is_ready() && text(&ship).as_deref() == Some("galleon")
    }));

    let events = h.factory.events();
    let last = |event: &str| events.iter().rposition(|logged| logged == event).unwrap();
    assert!(events.iter().any(|event| event == "scene/harbor:reset"));
    assert!(events.iter().any(|event| event == "mesh/ship:reset"));
    assert!(last("mesh/ship:fulfilled") < last("scene/harbor:fulfilled"));
    assert!(last("scene/harbor:reset") < last("scene/harbor:fulfilled"));
}

#[test]
fn test_polling_watcher_triggers_reload() {
    let (mut h, instance) = loaded("config/audio", "volume=3");
    let clock = Arc::new(ManualClock::default());
    clock.touch("config/audio");

    let mut watcher = PollingWatcher::new(Box::new(clock.clone()));
    watcher.set_check_interval(Duration::ZERO);
    h.manager.set_watcher(Box::new(watcher));
    h.manager.update();
    assert_eq!(h.manager.stats().replacements_started, 0);

    h.file("config/audio", "volume=9");
    clock.advance(Duration::from_secs(1));
    clock.touch("config/audio");
    assert!(h.tick_until(10, |_| text(&instance).as_deref() == Some("volume=9")));
    assert_eq!(h.manager.stats().replacements_committed, 1);
}

#[test]
fn test_notifications_wait_while_hot_reload_disabled() {
    let mut h = Harness::with_config(ManagerConfig::inline().with_hot_reload(false));
    h.file("config/keys", "wasd");
    let instance = h.request("config/keys");
    h.manager.update();

    h.file("config/keys", "hjkl");
    assert!(h.manager.data_changed_notifier().notify(instance.resource().unwrap()));
    for _ in 0..3 {
        h.manager.update();
    }
    assert_eq!(h.manager.pending_replacements(), 0);
    assert_eq!(h.manager.stats().replacements_started, 0);
    assert_eq!(text(&instance).as_deref(), Some("wasd"));
}

fn threaded(path: &str, contents: &str) -> (Harness, Instance<Text>) {
    let mut h = Harness::with_config(ManagerConfig {
        loader_threads: 1,
        ..ManagerConfig::inline().with_hot_reload(true)
    });
    h.file(path, contents);
    let instance = h.request(path);
    assert!(h.tick_until(1000, |_| instance.is_ready()));
    (h, instance)
}

#[test]
fn test_release_while_replacement_loads() {
    let (mut h, instance) = threaded("sound/loop", "v1");
    let old = instance.resource().unwrap();

    h.file("sound/loop", "v2");
    assert!(h.manager.on_resource_data_changed(&old));
    h.manager.update();
    assert_eq!(h.manager.stats().replacements_started, 1);
    drop(instance);

    assert!(h.settle());
    assert!(h.manager.storage().is_empty());
    assert_eq!(h.manager.instance_count(), 0);
    assert!(old.replacing_resource().is_none());

    let mut released = h.factory.released();
    released.sort();
    assert_eq!(released, vec!["v1".to_string(), "v2".to_string()]);
    let stats = h.manager.stats();
    assert_eq!(stats.replacements_committed, 1);
    assert_eq!(stats.deletions, 2);
}

#[test]
fn test_release_while_failing_replacement_loads() {
    let (mut h, instance) = threaded("sound/hum", "v1");
    let old = instance.resource().unwrap();

    h.file("sound/hum", "invalid");
    assert!(h.manager.on_resource_data_changed(&old));
    h.manager.update();
    assert_eq!(h.manager.stats().replacements_started, 1);
    drop(instance);

    assert!(h.settle());
    assert!(h.manager.storage().is_empty());
    assert_eq!(h.manager.instance_count(), 0);
    assert!(!old.is_pending_modification());

    let mut released = h.factory.released();
    released.sort();
    assert_eq!(released, vec![String::new(), "v1".to_string()]);
    let stats = h.manager.stats();
    assert_eq!(stats.replacements_aborted, 1);
    assert_eq!(stats.replacements_committed, 0);
    assert_eq!(stats.deletions, 2);
}

#[test]
fn test_file_events_trigger_reload() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("shader")).unwrap();
    std::fs::write(dir.path().join("shader/sky"), "v1").unwrap();

    let mut manager = Manager::new(
        ManagerConfig::inline().with_hot_reload(true),
        Arc::new(DirectoryFileLoader::new(dir.path())),
    )
    .unwrap();
    let factory = Arc::new(TextFactory::new());
    manager.register_factory::<Text>(factory.clone()).unwrap();
    manager.set_watcher(Box::new(NotifyWatcher::new(dir.path()).unwrap()));

    let instance = manager
        .handle()
        .request::<Text>("shader/sky", BuildInfo::default())
        .unwrap();
    manager.update();
    assert_eq!(text(&instance).as_deref(), Some("v1"));

    std::fs::write(dir.path().join("shader/sky"), "v2").unwrap();
    let mut reloaded = false;
    for _ in 0..500 {
        manager.update();
        if text(&instance).as_deref() == Some("v2") {
            reloaded = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(reloaded);
    assert!(manager.stats().replacements_committed >= 1);
    assert_eq!(*factory.instances_released.lock(), 0);
}
