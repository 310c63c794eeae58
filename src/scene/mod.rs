//! Scene container
//!
//! A scene is a flat list of entities plus a few global properties. The
//! renderer receives it explicitly on every call; there is no global
//! "current scene".

mod camera;
mod config;
mod entity;
mod light;
mod node;

pub use camera::*;
pub use config::*;
pub use entity::*;
pub use light::*;
pub use node::*;

use glam::Vec3;
use thiserror::Error;

use crate::backend::TextureHandle;
use crate::pipeline::{IrradianceVolume, ReflectionProbe};

/// Upper bound on lights uploaded by the single-pass technique
pub const DEFAULT_MAX_LIGHTS: usize = 5;

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("Scene holds more than {max} lights")]
    TooManyLights { max: usize },
    #[error("Scene already has an irradiance volume")]
    DuplicateIrradianceVolume,
    #[error("Invalid scene description: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Index of an entity inside its scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub usize);

#[derive(Debug, Clone)]
pub struct Scene {
    pub background_color: Vec3,
    pub ambient_light: Vec3,
    pub camera: Camera,
    pub skybox: Option<TextureHandle>,
    entities: Vec<Entity>,
    max_lights: usize,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            background_color: Vec3::ZERO,
            ambient_light: Vec3::splat(0.1),
            camera: Camera::default(),
            skybox: None,
            entities: Vec::new(),
            max_lights: DEFAULT_MAX_LIGHTS,
        }
    }

    pub fn with_max_lights(mut self, max_lights: usize) -> Self {
        self.max_lights = max_lights;
        self
    }

    pub fn max_lights(&self) -> usize {
        self.max_lights
    }

    /// Add an entity, enforcing the light bound and a single irradiance volume
    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId, SceneError> {
        match &entity.kind {
            EntityKind::Light(_) if self.light_count() >= self.max_lights => {
                return Err(SceneError::TooManyLights {
                    max: self.max_lights,
                })
            }
            EntityKind::Irradiance(_) if self.irradiance().is_some() => {
                return Err(SceneError::DuplicateIrradianceVolume)
            }
            _ => {}
        }
        self.entities.push(entity);
        Ok(EntityId(self.entities.len() - 1))
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id.0)
    }

    pub fn find(&self, name: &str) -> Option<EntityId> {
        self.entities.iter().position(|e| e.name == name).map(EntityId)
    }

    pub fn prefabs(&self) -> impl Iterator<Item = &Prefab> {
        self.entities.iter().filter_map(|e| match &e.kind {
            EntityKind::Prefab(p) => Some(p),
            _ => None,
        })
    }

    pub fn lights(&self) -> impl Iterator<Item = &Light> {
        self.entities.iter().filter_map(Entity::as_light)
    }

    pub fn lights_mut(&mut self) -> impl Iterator<Item = &mut Light> {
        self.entities.iter_mut().filter_map(Entity::as_light_mut)
    }

    pub fn light_count(&self) -> usize {
        self.lights().count()
    }

    pub fn reflection_probes(&self) -> impl Iterator<Item = &ReflectionProbe> {
        self.entities.iter().filter_map(|e| match &e.kind {
            EntityKind::ReflectionProbe(p) => Some(p),
            _ => None,
        })
    }

    pub fn reflection_probes_mut(&mut self) -> impl Iterator<Item = &mut ReflectionProbe> {
        self.entities.iter_mut().filter_map(|e| match &mut e.kind {
            EntityKind::ReflectionProbe(p) => Some(p),
            _ => None,
        })
    }

    pub fn irradiance(&self) -> Option<&IrradianceVolume> {
        self.entities.iter().find_map(|e| match &e.kind {
            EntityKind::Irradiance(v) => Some(v),
            _ => None,
        })
    }

    pub fn irradiance_mut(&mut self) -> Option<&mut IrradianceVolume> {
        self.entities.iter_mut().find_map(|e| match &mut e.kind {
            EntityKind::Irradiance(v) => Some(v),
            _ => None,
        })
    }

    /// Apply each light's visibility flag to its effective color
    pub fn refresh_light_visibility(&mut self) {
        for light in self.lights_mut() {
            light.apply_visibility();
        }
    }
}
