//! Material definitions
//!
//! Materials are owned by the asset store; the renderer reads the alpha
//! mode, cutoff, factors and up to four texture slots on every draw.

use glam::{Vec3, Vec4};

use crate::backend::{RenderDevice, TextureHandle};

/// How a material's alpha channel is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Alpha-tested against `alpha_cutoff`
    Mask,
    /// Alpha-blended, drawn back-to-front after opaque geometry
    Blend,
}

/// PBR material properties
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub two_sided: bool,

    pub albedo_texture: Option<TextureHandle>,
    pub normal_texture: Option<TextureHandle>,
    pub metallic_roughness_texture: Option<TextureHandle>,
    pub emissive_texture: Option<TextureHandle>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            two_sided: false,
            albedo_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            emissive_texture: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    pub fn with_two_sided(mut self, two_sided: bool) -> Self {
        self.two_sided = two_sided;
        self
    }

    pub fn with_albedo_texture(mut self, texture: TextureHandle) -> Self {
        self.albedo_texture = Some(texture);
        self
    }

    pub fn is_blended(&self) -> bool {
        self.alpha_mode == AlphaMode::Blend
    }

    /// Upload factors and bind whichever texture slots are present
    pub fn upload(&self, device: &mut dyn RenderDevice) {
        device.upload("u_color", self.base_color);
        device.upload("u_metallic", self.metallic);
        device.upload("u_roughness", self.roughness);
        device.upload("u_emissive_factor", self.emissive);
        device.upload(
            "u_alpha_cutoff",
            if self.alpha_mode == AlphaMode::Mask {
                self.alpha_cutoff
            } else {
                0.0
            },
        );

        let slots = [
            ("u_albedo_texture", self.albedo_texture),
            ("u_normal_texture", self.normal_texture),
            ("u_metallic_roughness_texture", self.metallic_roughness_texture),
            ("u_emissive_texture", self.emissive_texture),
        ];
        let mut mask: i32 = 0;
        for (bit, (name, texture)) in slots.into_iter().enumerate() {
            if let Some(texture) = texture {
                device.set_texture(name, texture);
                mask |= 1 << bit;
            }
        }
        device.upload("u_texture_mask", mask);
    }

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_base_color(color.extend(1.0))
            .with_metallic(0.0)
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn glass() -> Self {
        Self::new("glass")
            .with_base_color(Vec4::new(1.0, 1.0, 1.0, 0.3))
            .with_roughness(0.1)
            .with_alpha_mode(AlphaMode::Blend)
    }
}
