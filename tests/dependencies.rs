mod common;

use common::{text, Harness, Text};
use parking_lot::Mutex;
use resource_lifecycle::prelude::*;
use std::any::Any;
use std::sync::Arc;

fn harness() -> Harness {
    let h = Harness::new();
    h.file("scene/castle", "castle");
    h.file("mesh/tower", "tower");
    h.file("mesh/gate", "gate");
    h
}

#[test]
fn test_dependent_constructs_after_dependencies() {
    let mut h = harness();
    let scene = h.request("scene/castle");
    let tower = h.request("mesh/tower");
    let gate = h.request("mesh/gate");
    scene.add_dependency(&tower).unwrap();
    scene.add_dependency(&gate).unwrap();

    h.manager.update();
    assert!(scene.is_ready());
    assert!(tower.is_ready());
    assert!(gate.is_ready());

    let scene_done = h.factory.position("scene/castle:fulfilled").unwrap();
    assert!(h.factory.position("mesh/tower:fulfilled").unwrap() < scene_done);
    assert!(h.factory.position("mesh/gate:fulfilled").unwrap() < scene_done);
    assert!(h.factory.position("scene/castle:construct").unwrap() < scene_done);
}

#[test]
fn test_late_dependency_is_refused() {
    let mut h = harness();
    let scene = h.request("scene/castle");
    h.manager.update();

    let tower = h.request("mesh/tower");
    assert!(matches!(
        scene.add_dependency(&tower),
        Err(ResourceError::DependencyAfterConstruction)
    ));

    // The refused dependency stays free for another dependent
    h.file("scene/keep", "keep");
    let keep = h.request("scene/keep");
    keep.add_dependency(&tower).unwrap();
    h.manager.update();
    assert!(keep.is_ready());
}

#[test]
fn test_constructed_dependency_does_not_block() {
    let mut h = harness();
    let tower = h.request("mesh/tower");
    h.manager.update();
    assert!(tower.is_ready());

    let scene = h.request("scene/castle");
    scene.add_dependency(&tower).unwrap();
    h.manager.update();
    assert!(scene.is_ready());
}

#[test]
fn test_dependency_rules() {
    let h = harness();
    let scene = h.request("scene/castle");
    let tower = h.request("mesh/tower");

    assert!(matches!(
        scene.add_dependency(&scene),
        Err(ResourceError::SelfDependency)
    ));
    scene.add_dependency(&tower).unwrap();
    // Declaring the same edge again is harmless
    scene.add_dependency(&tower).unwrap();

    let other = harness();
    let foreign = other.request("mesh/gate");
    assert!(matches!(
        scene.add_dependency(&foreign),
        Err(ResourceError::InvalidInstance)
    ));
}

#[test]
#[should_panic(expected = "already has dependent")]
fn test_second_dependent_panics() {
    let h = harness();
    let scene = h.request("scene/castle");
    let tower = h.request("mesh/tower");
    let gate = h.request("mesh/gate");
    scene.add_dependency(&tower).unwrap();
    let _ = gate.add_dependency(&tower);
}

#[test]
fn test_released_dependency_unblocks_dependent() {
    let mut h = harness();
    let scene = h.request("scene/castle");
    let tower = h.request("mesh/tower");
    scene.add_dependency(&tower).unwrap();
    drop(tower);

    h.manager.update();
    assert!(scene.is_ready());
    assert!(h.factory.position("mesh/tower:construct").is_none());
}

#[test]
fn test_failed_dependency_blocks_until_released() {
    let mut h = harness();
    h.file("mesh/rubble", "invalid");
    let scene = h.request("scene/castle");
    let rubble = h.request("mesh/rubble");
    scene.add_dependency(&rubble).unwrap();

    h.manager.update();
    assert!(rubble.is_failed());
    assert!(!scene.is_ready());
    assert!(scene.status().contains(InstanceStatus::CONSTRUCTION_BEGUN));

    drop(rubble);
    h.manager.update();
    assert!(scene.is_ready());
}

#[test]
fn test_shared_object_with_independent_instances() {
    let mut h = harness();
    let scene = h.request("scene/castle");
    let tower = h.request("mesh/tower");
    let spare = h.request("mesh/tower");
    scene.add_dependency(&tower).unwrap();
    h.manager.update();

    assert!(Arc::ptr_eq(&tower.resource().unwrap(), &spare.resource().unwrap()));
    assert!(spare.is_ready());
    assert_eq!(text(&scene).as_deref(), Some("castle"));

    // The spare instance is free to take a dependent of its own
    h.file("scene/wall", "wall");
    let wall = h.handle.request::<Text>("scene/wall", BuildInfo::default()).unwrap();
    wall.add_dependency(&spare).unwrap();
    h.manager.update();
    assert!(wall.is_ready());
}

/// Scene whose instances request their part from the construction hook
struct Scene;

impl ResourceContent for Scene {
    fn on_construct(&mut self, _data: &[u8], _build_flags: BuildFlags) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Parts = Arc<Mutex<Vec<Instance<Text>>>>;

struct PartRequestingHooks {
    handle: ManagerHandle,
    part: String,
    parts: Parts,
}

impl InstanceHooks for PartRequestingHooks {
    fn on_construct(&mut self, _resource: &ResourceObject) {
        let part = self
            .handle
            .request::<Text>(self.part.as_str(), BuildInfo::default())
            .unwrap();
        self.parts.lock().push(part);
    }
}

struct SceneFactory {
    handle: ManagerHandle,
    parts: Parts,
}

impl Factory for SceneFactory {
    fn type_name(&self) -> &'static str {
        "Scene"
    }

    fn request_instance(&self, hash: &ResourceHash) -> Box<dyn InstanceHooks> {
        Box::new(PartRequestingHooks {
            handle: self.handle.clone(),
            part: format!("{}/part", hash.path()),
            parts: self.parts.clone(),
        })
    }

    fn request_object(&self) -> Box<dyn ResourceContent> {
        Box::new(Scene)
    }
}

#[test]
fn test_hooks_can_request_instances() {
    let mut h = harness();
    let parts = Parts::default();
    h.manager
        .register_factory::<Scene>(Arc::new(SceneFactory {
            handle: h.handle.clone(),
            parts: parts.clone(),
        }))
        .unwrap();
    h.file("level/one", "one");
    h.file("level/one/part", "part");

    let scene = h
        .handle
        .request::<Scene>("level/one", BuildInfo::default())
        .unwrap();
    h.manager.update();
    assert!(scene.is_ready());
    assert_eq!(parts.lock().len(), 1);

    h.manager.update();
    {
        let parts = parts.lock();
        assert!(parts[0].is_ready());
        assert_eq!(text(&parts[0]).as_deref(), Some("part"));
    }

    drop(scene);
    parts.lock().clear();
    assert!(h.settle());
    assert!(h.manager.storage().is_empty());
    assert_eq!(h.manager.instance_count(), 0);
}
