//! JSON scene descriptors
//!
//! Mirrors the scene files produced by the authoring tools: a few global
//! properties plus a flat list of typed entities. Every field is optional
//! and falls back to the runtime default.

use std::collections::HashMap;

use glam::{Mat4, Quat, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::pipeline::{IrradianceVolume, ReflectionProbe};
use crate::scene::{Entity, Light, LightType, Node, Prefab, Scene, SceneError};

/// Resolves prefab file names to node trees (the asset store)
pub trait PrefabSource {
    fn prefab(&self, filename: &str) -> Option<Node>;
}

impl PrefabSource for HashMap<String, Node> {
    fn prefab(&self, filename: &str) -> Option<Node> {
        self.get(filename).cloned()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescriptor {
    pub background_color: Option<[f32; 3]>,
    pub ambient_light: Option<[f32; 3]>,
    pub camera_position: Option<[f32; 3]>,
    pub camera_target: Option<[f32; 3]>,
    pub camera_fov: Option<f32>,
    pub entities: Vec<EntityDescriptor>,
}

/// Light-specific entity fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightDescriptor {
    pub light_color: Option<[f32; 3]>,
    pub light_type: Option<String>,
    pub max_dist: Option<f32>,
    pub intensity: Option<f32>,
    pub cone_angle: Option<f32>,
    pub spot_exp: Option<f32>,
    pub area_size: Option<f32>,
    pub useful: Option<String>,
}

impl LightDescriptor {
    /// Only the literal `"no"` opts a light out; a missing field keeps it in.
    pub fn is_useful(&self) -> bool {
        self.useful.as_deref() != Some("no")
    }

    pub fn parsed_type(&self) -> LightType {
        match self.light_type.as_deref() {
            Some("directional") | Some("DIRECTIONAL") => LightType::Directional,
            Some("spot") | Some("SPOT") => LightType::Spot,
            _ => LightType::Point,
        }
    }

    /// Build a light placed by `transform`; `target` reorients it
    pub fn build(&self, name: &str, transform: Mat4, target: Option<Vec3>) -> Light {
        let color = self.light_color.map(Vec3::from).unwrap_or(Vec3::ONE);
        let mut light = Light::new(name, self.parsed_type(), color);
        if let Some(v) = self.max_dist {
            light.max_distance = v;
        }
        if let Some(v) = self.intensity {
            light.intensity = v;
        }
        if let Some(v) = self.cone_angle {
            light.cone_angle = v;
        }
        if let Some(v) = self.spot_exp {
            light.spot_exponent = v;
        }
        if let Some(v) = self.area_size {
            light.area_size = v;
        }
        light.useful = self.is_useful();
        light.transform = transform;
        match target {
            Some(target) => light.look_at(light.position(), target),
            None => light.orient_shadow_camera(),
        }
        light
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub position: Option<[f32; 3]>,
    /// Rotation about +Y in degrees
    pub angle: Option<f32>,
    /// Quaternion `[x, y, z, w]`
    pub rotation: Option<[f32; 4]>,
    pub target: Option<[f32; 3]>,
    pub scale: Option<[f32; 3]>,

    /// PREFAB
    pub filename: Option<String>,

    /// IRRADIANCE
    pub start: Option<[f32; 3]>,
    pub end: Option<[f32; 3]>,
    pub dims: Option<[u32; 3]>,

    /// REFLECTION_PROBE
    pub resolution: Option<u32>,

    #[serde(flatten)]
    pub light: LightDescriptor,
}

impl EntityDescriptor {
    /// Placement from position, angle, rotation and scale, in that order
    pub fn transform(&self) -> Mat4 {
        let mut model = Mat4::IDENTITY;
        if let Some(position) = self.position {
            model = Mat4::from_translation(Vec3::from(position));
        }
        if let Some(angle) = self.angle {
            model *= Mat4::from_rotation_y(angle.to_radians());
        }
        if let Some([x, y, z, w]) = self.rotation {
            model = Mat4::from_quat(Quat::from_xyzw(x, y, z, w).normalize()) * model;
        }
        if let Some(scale) = self.scale {
            model *= Mat4::from_scale(Vec3::from(scale));
        }
        model
    }

    /// `None` for unknown entity types
    pub fn build(&self, prefabs: &dyn PrefabSource) -> Option<Entity> {
        let name = self.name.clone().unwrap_or_default();
        let transform = self.transform();
        let target = self.target.map(Vec3::from);
        let visible = self.visible.unwrap_or(true);

        let entity = match self.kind.as_str() {
            "PREFAB" => {
                let filename = self.filename.as_deref().unwrap_or_default();
                let root = prefabs.prefab(filename).unwrap_or_else(|| {
                    log::warn!("Prefab '{}' not found, entity '{}' is empty", filename, name);
                    Node::new(filename)
                });
                let mut prefab = Prefab::new(root).with_transform(transform);
                prefab.visible = visible;
                Entity::prefab(&name, prefab)
            }
            "LIGHT" => {
                let mut light = self.light.build(&name, transform, target);
                light.set_visible(visible);
                Entity::light(light)
            }
            "IRRADIANCE" => {
                let start = self.start.map(Vec3::from).unwrap_or(Vec3::splat(-100.0));
                let end = self.end.map(Vec3::from).unwrap_or(Vec3::splat(100.0));
                let dims = self.dims.map(UVec3::from).unwrap_or(UVec3::splat(4));
                let mut volume = IrradianceVolume::new(start, end, dims);
                volume.active = visible;
                Entity::irradiance(&name, volume)
            }
            "REFLECTION_PROBE" => {
                let position = transform.w_axis.truncate();
                let mut probe =
                    ReflectionProbe::new(position, self.resolution.unwrap_or(ReflectionProbe::DEFAULT_RESOLUTION));
                probe.visible = visible;
                Entity::reflection_probe(&name, probe)
            }
            other => {
                log::warn!("Unknown entity type '{}', skipping '{}'", other, name);
                return None;
            }
        };
        Some(entity)
    }
}

impl Scene {
    /// Build a scene from its JSON description
    pub fn from_json(json: &str, prefabs: &dyn PrefabSource) -> Result<Scene, SceneError> {
        let desc: SceneDescriptor = serde_json::from_str(json)?;
        Scene::from_descriptor(&desc, prefabs)
    }

    pub fn from_descriptor(
        desc: &SceneDescriptor,
        prefabs: &dyn PrefabSource,
    ) -> Result<Scene, SceneError> {
        let mut scene = Scene::new();
        if let Some(c) = desc.background_color {
            scene.background_color = Vec3::from(c);
        }
        if let Some(c) = desc.ambient_light {
            scene.ambient_light = Vec3::from(c);
        }
        if let Some(p) = desc.camera_position {
            scene.camera.position = Vec3::from(p);
        }
        if let Some(t) = desc.camera_target {
            scene.camera.target = Vec3::from(t);
        }
        if let Some(fov) = desc.camera_fov {
            if let crate::scene::Projection::Perspective { fov_y, .. } = &mut scene.camera.projection {
                *fov_y = fov.to_radians();
            }
        }
        for entity in &desc.entities {
            if let Some(entity) = entity.build(prefabs) {
                log::debug!("+ entity: {}", entity.name);
                scene.add_entity(entity)?;
            }
        }
        Ok(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, true)]
    #[case(Some("no"), false)]
    #[case(Some("yes"), true)]
    #[case(Some("NO"), true)]
    #[case(Some(""), true)]
    fn test_useful_flag(#[case] value: Option<&str>, #[case] expected: bool) {
        let desc = LightDescriptor {
            useful: value.map(str::to_string),
            ..Default::default()
        };
        assert_eq!(desc.is_useful(), expected);
    }

    #[rstest]
    #[case("directional", LightType::Directional)]
    #[case("SPOT", LightType::Spot)]
    #[case("point", LightType::Point)]
    #[case("area", LightType::Point)]
    fn test_light_type_names(#[case] name: &str, #[case] expected: LightType) {
        let desc = LightDescriptor {
            light_type: Some(name.to_string()),
            ..Default::default()
        };
        assert_eq!(desc.parsed_type(), expected);
    }

    #[test]
    fn test_scene_from_json() {
        let json = r#"{
            "background_color": [0.1, 0.2, 0.3],
            "ambient_light": [0.05, 0.05, 0.05],
            "entities": [
                { "type": "PREFAB", "name": "box", "filename": "box.gltf", "position": [0, 1, 0] },
                { "type": "LIGHT", "name": "sun", "light_type": "directional",
                  "position": [0, 100, 0], "target": [0, 0, 0], "intensity": 2.0, "useful": "no" },
                { "type": "CAMERA_RIG", "name": "ignored" }
            ]
        }"#;
        let mut prefabs = HashMap::new();
        prefabs.insert("box.gltf".to_string(), Node::new("box"));

        let scene = Scene::from_json(json, &prefabs).expect("scene parses");
        assert_eq!(scene.background_color, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(scene.entities().len(), 2);

        let sun = scene.lights().next().expect("one light");
        assert_eq!(sun.light_type, LightType::Directional);
        assert_eq!(sun.intensity, 2.0);
        assert!(!sun.useful);
        assert!(sun.front().y < -0.99);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let prefabs: HashMap<String, Node> = HashMap::new();
        assert!(matches!(
            Scene::from_json("{ not json", &prefabs),
            Err(SceneError::Parse(_))
        ));
    }
}
