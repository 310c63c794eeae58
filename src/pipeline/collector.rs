//! Render-call collection
//!
//! Walks every visible prefab, culls against the camera and splits the
//! surviving draws into opaque and blended sequences sorted back to front.

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::backend::TextureHandle;
use crate::resources::{BoundingBox, Material, Mesh};
use crate::scene::{Camera, Scene};

/// One draw request produced by collection
#[derive(Debug, Clone)]
pub struct RenderCall {
    pub model: Mat4,
    pub mesh: Arc<Mesh>,
    pub material: Arc<Material>,
    pub world_bounds: BoundingBox,
    /// Distance from the bounds center to the camera eye; 0 without a camera
    pub distance_to_camera: f32,
    /// Cubemap of the nearest reflection probe
    pub reflection: Option<TextureHandle>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderCalls {
    pub opaque: Vec<RenderCall>,
    pub blended: Vec<RenderCall>,
    /// Candidates rejected by the frustum test
    pub culled: usize,
}

impl RenderCalls {
    pub fn len(&self) -> usize {
        self.opaque.len() + self.blended.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.blended.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderCall> {
        self.opaque.iter().chain(self.blended.iter())
    }
}

/// Collect the draws of `scene` as seen by `camera`.
///
/// `camera == None` disables culling and sorting. While `shadow_pass` is set,
/// blended materials stay in the opaque sequence so the shadow stage sees
/// (and can reject) them in one place.
pub fn collect(scene: &Scene, camera: Option<&Camera>, shadow_pass: bool) -> RenderCalls {
    let mut calls = RenderCalls::default();
    let frustum = camera.map(Camera::frustum);

    for prefab in scene.prefabs().filter(|p| p.visible) {
        prefab.root.walk(prefab.transform, &mut |candidate| {
            if let Some(frustum) = &frustum {
                if !frustum.intersects_box(&candidate.world_bounds) {
                    calls.culled += 1;
                    return;
                }
            }
            let call = RenderCall {
                model: candidate.model,
                mesh: Arc::clone(candidate.mesh),
                material: Arc::clone(candidate.material),
                world_bounds: candidate.world_bounds,
                distance_to_camera: camera
                    .map_or(0.0, |c| candidate.world_bounds.center.distance(c.position)),
                reflection: None,
            };
            if call.material.is_blended() && !shadow_pass {
                calls.blended.push(call);
            } else {
                calls.opaque.push(call);
            }
        });
    }

    if camera.is_some() {
        sort_back_to_front(&mut calls.opaque);
        sort_back_to_front(&mut calls.blended);
    }

    let probes: Vec<(Vec3, Option<TextureHandle>)> = scene
        .reflection_probes()
        .map(|p| (p.position, p.cubemap))
        .collect();
    if !probes.is_empty() {
        for call in calls.opaque.iter_mut().chain(calls.blended.iter_mut()) {
            call.reflection = nearest_probe(&probes, call.world_bounds.center)
                .and_then(|i| probes[i].1);
        }
    }

    calls
}

/// Farthest first; equal distances keep collection order
pub fn sort_back_to_front(calls: &mut [RenderCall]) {
    calls.sort_by(|a, b| b.distance_to_camera.total_cmp(&a.distance_to_camera));
}

/// Index of the probe closest to `point`; the first one wins ties
pub fn nearest_probe<T>(probes: &[(Vec3, T)], point: Vec3) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, (position, _)) in probes.iter().enumerate() {
        let d = position.distance_squared(point);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReflectionProbe;
    use crate::scene::{Entity, Node, Prefab};

    fn cube_at(position: Vec3, material: &Arc<Material>) -> Node {
        Node::new("cube")
            .with_mesh(Arc::new(Mesh::cube()), Arc::clone(material))
            .with_translation(position)
    }

    fn test_scene() -> Scene {
        let opaque = Arc::new(Material::default());
        let glass = Arc::new(Material::glass());
        let root = Node::new("root")
            .with_child(cube_at(Vec3::new(0.0, 0.0, -5.0), &opaque))
            .with_child(cube_at(Vec3::new(0.0, 0.0, -20.0), &opaque))
            .with_child(cube_at(Vec3::new(0.0, 0.0, -10.0), &glass))
            .with_child(cube_at(Vec3::new(0.0, 0.0, 50.0), &opaque));
        let mut scene = Scene::new();
        scene
            .add_entity(Entity::prefab("prefab", Prefab::new(root)))
            .expect("prefab fits");
        scene
    }

    fn camera() -> Camera {
        Camera::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn test_partition_by_alpha_mode() {
        let calls = collect(&test_scene(), Some(&camera()), false);
        assert_eq!(calls.opaque.len(), 2);
        assert_eq!(calls.blended.len(), 1);
        assert_eq!(calls.culled, 1);
        assert!(calls.blended.iter().all(|c| c.material.is_blended()));
        assert!(calls.opaque.iter().all(|c| !c.material.is_blended()));
    }

    #[test]
    fn test_sorted_back_to_front() {
        let calls = collect(&test_scene(), Some(&camera()), false);
        for seq in [&calls.opaque, &calls.blended] {
            for pair in seq.windows(2) {
                assert!(pair[0].distance_to_camera >= pair[1].distance_to_camera);
            }
        }
        assert_eq!(calls.opaque[0].world_bounds.center.z, -20.0);
    }

    #[test]
    fn test_no_camera_keeps_everything() {
        let calls = collect(&test_scene(), None, false);
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.culled, 0);
        assert!(calls.iter().all(|c| c.distance_to_camera == 0.0));
    }

    #[test]
    fn test_shadow_pass_keeps_blended_in_opaque() {
        let calls = collect(&test_scene(), None, true);
        assert!(calls.blended.is_empty());
        assert_eq!(calls.opaque.len(), 4);
    }

    #[test]
    fn test_invisible_prefab_is_skipped() {
        let mut scene = Scene::new();
        let material = Arc::new(Material::default());
        let mut prefab = Prefab::new(cube_at(Vec3::ZERO, &material));
        prefab.visible = false;
        scene.add_entity(Entity::prefab("hidden", prefab)).expect("fits");
        assert!(collect(&scene, None, false).is_empty());
    }

    #[test]
    fn test_nearest_probe_first_wins_ties() {
        let probes = [
            (Vec3::new(-1.0, 0.0, 0.0), "a"),
            (Vec3::new(1.0, 0.0, 0.0), "b"),
            (Vec3::new(5.0, 0.0, 0.0), "c"),
        ];
        assert_eq!(nearest_probe(&probes, Vec3::ZERO), Some(0));
        assert_eq!(nearest_probe(&probes, Vec3::new(4.0, 0.0, 0.0)), Some(2));
        assert_eq!(nearest_probe::<()>(&[], Vec3::ZERO), None);
    }

    #[test]
    fn test_calls_get_nearest_probe_cubemap() {
        let mut scene = test_scene();
        let mut near = ReflectionProbe::new(Vec3::new(0.0, 0.0, -6.0), 16);
        near.cubemap = Some(TextureHandle(11));
        let mut far = ReflectionProbe::new(Vec3::new(0.0, 0.0, -30.0), 16);
        far.cubemap = Some(TextureHandle(22));
        scene.add_entity(Entity::reflection_probe("near", near)).expect("fits");
        scene.add_entity(Entity::reflection_probe("far", far)).expect("fits");

        let calls = collect(&scene, Some(&camera()), false);
        let closest = calls.opaque.last().expect("an opaque call");
        assert_eq!(closest.reflection, Some(TextureHandle(11)));
        assert_eq!(calls.opaque[0].reflection, Some(TextureHandle(22)));
    }
}
