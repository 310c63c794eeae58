//! Light types for the scene

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::backend::{RenderDevice, RenderTargetHandle, TextureHandle};
use crate::pipeline::LightingModel;
use crate::scene::{Camera, Projection};

/// Resolution of the depth target owned by shadow-casting lights
pub const DEFAULT_SHADOW_RESOLUTION: u32 = 2048;

const SHADOW_NEAR: f32 = 0.1;
const SHADOW_FAR: f32 = 3000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightType {
    Point,
    Spot,
    Directional,
}

impl LightType {
    /// Value of the `u_light_type` uniform
    pub fn as_uniform(self) -> i32 {
        match self {
            LightType::Point => 0,
            LightType::Spot => 1,
            LightType::Directional => 2,
        }
    }

    pub fn casts_shadows(self) -> bool {
        self != LightType::Point
    }
}

/// Depth-only target plus the camera it is rendered from
#[derive(Debug, Clone)]
pub struct ShadowCaster {
    pub camera: Camera,
    pub resolution: u32,
    /// Allocated lazily by the shadow pass
    pub target: Option<RenderTargetHandle>,
}

#[derive(Debug, Clone)]
pub struct Light {
    pub name: String,
    pub light_type: LightType,
    pub transform: Mat4,
    color: Vec3,
    saved_color: Option<Vec3>,
    pub intensity: f32,
    pub max_distance: f32,
    /// Half-angle of the spot cone in degrees
    pub cone_angle: f32,
    pub spot_exponent: f32,
    /// Half-extent of the directional shadow volume
    pub area_size: f32,
    pub shadow_bias: f32,
    pub visible: bool,
    /// Contributes to irradiance bakes
    pub useful: bool,
    pub show_shadowmap: bool,
    pub shadow: Option<ShadowCaster>,
}

impl Light {
    pub fn new(name: &str, light_type: LightType, color: Vec3) -> Self {
        let mut light = Self {
            name: name.to_string(),
            light_type,
            transform: Mat4::IDENTITY,
            color,
            saved_color: None,
            intensity: 5.0,
            max_distance: 5000.0,
            cone_angle: 30.0,
            spot_exponent: 20.0,
            area_size: 1024.0,
            shadow_bias: 0.001,
            visible: true,
            useful: true,
            show_shadowmap: false,
            shadow: None,
        };
        if light_type == LightType::Directional {
            light.shadow_bias = 0.01;
        }
        light.setup_shadow(DEFAULT_SHADOW_RESOLUTION);
        light
    }

    pub fn point(name: &str, position: Vec3, color: Vec3) -> Self {
        let mut light = Self::new(name, LightType::Point, color);
        light.transform = Mat4::from_translation(position);
        light
    }

    pub fn spot(name: &str, position: Vec3, target: Vec3, color: Vec3) -> Self {
        let mut light = Self::new(name, LightType::Spot, color);
        light.look_at(position, target);
        light
    }

    pub fn directional(name: &str, position: Vec3, target: Vec3, color: Vec3) -> Self {
        let mut light = Self::new(name, LightType::Directional, color);
        light.look_at(position, target);
        light
    }

    /// (Re)create the shadow caster for spot and directional lights
    pub fn setup_shadow(&mut self, resolution: u32) {
        self.shadow = self.light_type.casts_shadows().then(|| ShadowCaster {
            camera: Camera::default(),
            resolution,
            target: None,
        });
        self.orient_shadow_camera();
    }

    /// Color as consumers see it: zero while the light is hidden
    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn set_color(&mut self, color: Vec3) {
        if self.saved_color.is_some() {
            self.saved_color = Some(color);
        } else {
            self.color = color;
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.apply_visibility();
    }

    /// Sync the effective color with `visible`.
    ///
    /// Hiding caches the color and zeroes it; showing restores the cache.
    /// Each transition happens at most once, so repeated calls are no-ops.
    pub fn apply_visibility(&mut self) {
        if !self.visible {
            if self.saved_color.is_none() {
                self.saved_color = Some(self.color);
                self.color = Vec3::ZERO;
            }
        } else if let Some(saved) = self.saved_color.take() {
            self.color = saved;
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }

    /// Direction the light points along (local +Z)
    pub fn front(&self) -> Vec3 {
        self.transform.z_axis.truncate().normalize_or_zero()
    }

    /// Place the light at `position` facing `target`
    pub fn look_at(&mut self, position: Vec3, target: Vec3) {
        let front = (target - position).normalize_or_zero();
        let front = if front == Vec3::ZERO { Vec3::NEG_Z } else { front };
        let up = stable_up(front);
        let right = up.cross(front).normalize();
        let up = front.cross(right);
        self.transform = Mat4::from_cols(
            right.extend(0.0),
            up.extend(0.0),
            front.extend(0.0),
            position.extend(1.0),
        );
        self.orient_shadow_camera();
    }

    /// Point the shadow camera along the light and refresh its projection
    pub fn orient_shadow_camera(&mut self) {
        let position = self.position();
        let front = self.front();
        let projection = match self.light_type {
            LightType::Spot => Projection::perspective(self.cone_angle * 2.0, 1.0, SHADOW_NEAR, SHADOW_FAR),
            LightType::Directional => {
                Projection::orthographic(self.area_size, self.area_size, SHADOW_NEAR, SHADOW_FAR)
            }
            LightType::Point => return,
        };
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.camera.look_at(position, position + front, stable_up(front));
            shadow.camera.projection = projection;
        }
    }

    pub fn shadow_camera(&self) -> Option<&Camera> {
        self.shadow.as_ref().map(|s| &s.camera)
    }

    pub fn shadow_view_projection(&self) -> Option<Mat4> {
        self.shadow_camera().map(|c| c.view_projection_matrix())
    }

    /// Upload the per-light uniform set; `shadow_map` is bound when present
    pub fn upload_uniforms(
        &self,
        device: &mut dyn RenderDevice,
        model: LightingModel,
        shadow_map: Option<TextureHandle>,
    ) {
        let intensity = match model {
            LightingModel::Phong => self.intensity / 4.0,
            LightingModel::Pbr => self.intensity,
        };
        device.upload("u_light_color", self.color);
        device.upload("u_light_pos", self.position());
        device.upload("u_light_type", self.light_type.as_uniform());
        device.upload("u_light_maxdist", self.max_distance);
        device.upload("u_light_direction", self.front());
        device.upload("u_cos_cutoff", self.cone_angle.to_radians().cos());
        device.upload("u_spot_exp", self.spot_exponent);
        device.upload("u_light_intensity", intensity);

        if !self.light_type.casts_shadows() {
            device.upload("u_has_shadow", false);
            return;
        }
        device.upload("u_shadow_bias", self.shadow_bias);
        match (shadow_map, self.shadow_view_projection()) {
            (Some(map), Some(view_projection)) => {
                device.upload("u_has_shadow", true);
                device.set_texture("u_shadowmap", map);
                device.upload("u_shadow_viewproj", view_projection);
            }
            _ => device.upload("u_has_shadow", false),
        }
    }
}

/// Up vector that is never parallel to `front`
fn stable_up(front: Vec3) -> Vec3 {
    if front.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, UniformValue};
    use approx::assert_relative_eq;

    #[test]
    fn test_hide_zeroes_color_once() {
        let mut light = Light::point("p", Vec3::ZERO, Vec3::new(1.0, 0.5, 0.25));
        light.set_visible(false);
        assert_eq!(light.color(), Vec3::ZERO);
        light.apply_visibility();
        light.set_visible(false);
        assert_eq!(light.color(), Vec3::ZERO);
        light.set_visible(true);
        assert_eq!(light.color(), Vec3::new(1.0, 0.5, 0.25));
        light.set_visible(true);
        assert_eq!(light.color(), Vec3::new(1.0, 0.5, 0.25));
    }

    #[test]
    fn test_set_color_while_hidden_applies_on_show() {
        let mut light = Light::point("p", Vec3::ZERO, Vec3::ONE);
        light.set_visible(false);
        light.set_color(Vec3::X);
        assert_eq!(light.color(), Vec3::ZERO);
        light.set_visible(true);
        assert_eq!(light.color(), Vec3::X);
    }

    #[test]
    fn test_defaults_per_type() {
        let spot = Light::new("s", LightType::Spot, Vec3::ONE);
        let dir = Light::new("d", LightType::Directional, Vec3::ONE);
        let point = Light::new("p", LightType::Point, Vec3::ONE);
        assert_eq!(spot.shadow_bias, 0.001);
        assert_eq!(dir.shadow_bias, 0.01);
        assert!(point.shadow.is_none());
        assert_eq!(spot.shadow.as_ref().map(|s| s.resolution), Some(2048));
        assert_eq!(spot.intensity, 5.0);
        assert_eq!(spot.cone_angle, 30.0);
    }

    #[test]
    fn test_spot_camera_uses_double_cone() {
        let light = Light::spot("s", Vec3::new(0.0, 10.0, 0.0), Vec3::new(5.0, 0.0, 0.0), Vec3::ONE);
        let camera = light.shadow_camera().cloned().unwrap_or_default();
        assert_eq!(camera.projection, Projection::perspective(60.0, 1.0, 0.1, 3000.0));
        assert_relative_eq!(camera.forward().dot(light.front()), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_directional_looking_down_has_valid_camera() {
        let light = Light::directional("sun", Vec3::new(0.0, 100.0, 0.0), Vec3::ZERO, Vec3::ONE);
        assert_relative_eq!(light.front().y, -1.0, epsilon = 1e-6);
        let view_projection = light.shadow_view_projection().unwrap_or(Mat4::NAN);
        assert!(view_projection.is_finite());
    }

    #[test]
    fn test_phong_quarters_intensity() {
        let light = Light::point("p", Vec3::ZERO, Vec3::ONE);
        let mut backend = DummyBackend::new(4, 4);
        light.upload_uniforms(&mut backend, LightingModel::Phong, None);
        light.upload_uniforms(&mut backend, LightingModel::Pbr, None);
        assert_eq!(
            backend.uniform_values("u_light_intensity"),
            vec![&UniformValue::Float(1.25), &UniformValue::Float(5.0)]
        );
    }
}
