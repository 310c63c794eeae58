//! Scene entities
//!
//! The set of entity kinds is closed; what each kind can take part in is
//! described by its [`Capabilities`] rather than by dynamic dispatch.

use bitflags::bitflags;
use glam::Mat4;

use crate::pipeline::{IrradianceVolume, ReflectionProbe};
use crate::scene::{Light, Node};

bitflags! {
    /// Frame stages an entity participates in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Produces render calls
        const DRAWABLE = 1 << 0;
        /// Contributes to the lighting passes
        const EMITS_LIGHT = 1 << 1;
        /// Owns a shadow map
        const CASTS_SHADOWS = 1 << 2;
        /// Owns a cubemap captured from its position
        const CAPTURES_REFLECTIONS = 1 << 3;
        /// Owns baked spherical-harmonics probes
        const BAKES_IRRADIANCE = 1 << 4;
    }
}

/// A placed prefab: a node tree positioned by `transform`
#[derive(Debug, Clone)]
pub struct Prefab {
    pub root: Node,
    pub transform: Mat4,
    pub visible: bool,
}

impl Prefab {
    pub fn new(root: Node) -> Self {
        Self {
            root,
            transform: Mat4::IDENTITY,
            visible: true,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Prefab(Prefab),
    Light(Light),
    ReflectionProbe(ReflectionProbe),
    Irradiance(IrradianceVolume),
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(name: &str, kind: EntityKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    pub fn prefab(name: &str, prefab: Prefab) -> Self {
        Self::new(name, EntityKind::Prefab(prefab))
    }

    pub fn light(light: Light) -> Self {
        let name = light.name.clone();
        Self::new(&name, EntityKind::Light(light))
    }

    pub fn reflection_probe(name: &str, probe: ReflectionProbe) -> Self {
        Self::new(name, EntityKind::ReflectionProbe(probe))
    }

    pub fn irradiance(name: &str, volume: IrradianceVolume) -> Self {
        Self::new(name, EntityKind::Irradiance(volume))
    }

    pub fn capabilities(&self) -> Capabilities {
        match &self.kind {
            EntityKind::Prefab(_) => Capabilities::DRAWABLE,
            EntityKind::Light(light) if light.light_type.casts_shadows() => {
                Capabilities::EMITS_LIGHT | Capabilities::CASTS_SHADOWS
            }
            EntityKind::Light(_) => Capabilities::EMITS_LIGHT,
            EntityKind::ReflectionProbe(_) => Capabilities::CAPTURES_REFLECTIONS,
            EntityKind::Irradiance(_) => Capabilities::BAKES_IRRADIANCE,
        }
    }

    pub fn as_light(&self) -> Option<&Light> {
        match &self.kind {
            EntityKind::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn as_light_mut(&mut self) -> Option<&mut Light> {
        match &mut self.kind {
            EntityKind::Light(light) => Some(light),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::LightType;
    use glam::Vec3;

    #[test]
    fn test_capabilities_by_kind() {
        let prefab = Entity::prefab("p", Prefab::new(Node::new("root")));
        assert_eq!(prefab.capabilities(), Capabilities::DRAWABLE);

        let point = Entity::light(Light::new("point", LightType::Point, Vec3::ONE));
        assert_eq!(point.capabilities(), Capabilities::EMITS_LIGHT);

        let spot = Entity::light(Light::new("spot", LightType::Spot, Vec3::ONE));
        assert!(spot.capabilities().contains(Capabilities::CASTS_SHADOWS));

        let probe = Entity::reflection_probe("r", ReflectionProbe::new(Vec3::ZERO, 64));
        assert_eq!(probe.capabilities(), Capabilities::CAPTURES_REFLECTIONS);
    }
}
