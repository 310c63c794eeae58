//! Forward shading of render calls
//!
//! Used by the forward topology, by the blended pass of the deferred
//! topology, and by the probe captures.

use glam::{Mat4, Vec3};

use crate::backend::*;
use crate::pipeline::collector::RenderCall;
use crate::pipeline::shaders::SINGLE_PASS_LIGHTS;
use crate::pipeline::shadow_pass::shadow_map;
use crate::pipeline::{FrameContext, LightingModel, ProgramKind, RenderTechnique};
use crate::resources::{primitives, AlphaMode};
use crate::scene::{Camera, Light, Scene};

/// Lights and ambient term a forward draw shades with
#[derive(Debug, Clone)]
pub struct SceneLighting<'s> {
    pub lights: Vec<&'s Light>,
    pub ambient: Vec3,
    pub model: LightingModel,
    /// Bound on the arrays uploaded by the single-pass technique
    pub max_lights: usize,
}

impl<'s> SceneLighting<'s> {
    pub fn from_scene(scene: &'s Scene, model: LightingModel) -> Self {
        Self {
            lights: scene.lights().collect(),
            ambient: scene.ambient_light,
            model,
            max_lights: scene.max_lights(),
        }
    }

    /// Only lights flagged as useful, for irradiance captures
    pub fn useful_only(mut self) -> Self {
        self.lights.retain(|l| l.useful);
        self
    }
}

/// Fixed-function state for one call on top of `base`
pub fn material_state(call: &RenderCall, base: RasterState) -> RasterState {
    let mut state = base;
    if call.material.is_blended() {
        state.blend = Some(BlendState::alpha_blending());
    }
    if call.material.two_sided {
        state.cull_mode = CullMode::None;
    }
    state
}

fn upload_common(ctx: &mut FrameContext, call: &RenderCall, camera: &Camera) {
    ctx.upload_camera(camera);
    ctx.device.upload("u_model", call.model);
    call.material.upload(&mut *ctx.device);
    match call.reflection {
        Some(cubemap) => {
            ctx.device.set_texture("u_environment", cubemap);
            ctx.device.upload("u_has_environment", true);
        }
        None => ctx.device.upload("u_has_environment", false),
    }
}

/// Shade one call with `technique` into the bound target
pub fn render_call(
    ctx: &mut FrameContext,
    call: &RenderCall,
    camera: &Camera,
    technique: RenderTechnique,
    lighting: &SceneLighting,
) {
    if call.mesh.vertex_count() == 0 {
        return;
    }
    let state = material_state(call, RasterState::default());
    match technique {
        RenderTechnique::Texture => {
            if !ctx.use_program(ProgramKind::Texture, "forward") {
                return;
            }
            ctx.device.set_raster_state(state);
            upload_common(ctx, call, camera);
            ctx.draw_mesh(&call.mesh);
        }
        RenderTechnique::MultiPass => render_multi_pass(ctx, call, camera, state, lighting),
        RenderTechnique::SinglePass => {
            if !ctx.use_program(ProgramKind::SinglePass, "forward") {
                return;
            }
            ctx.device.set_raster_state(state);
            upload_common(ctx, call, camera);
            upload_light_arrays(ctx, lighting);
            ctx.draw_mesh(&call.mesh);
        }
    }
    ctx.device.restore_state();
}

/// One draw per light. The first light writes, later lights add on top.
fn render_multi_pass(
    ctx: &mut FrameContext,
    call: &RenderCall,
    camera: &Camera,
    state: RasterState,
    lighting: &SceneLighting,
) {
    if !ctx.use_program(ProgramKind::MultiPass, "forward") {
        return;
    }
    upload_common(ctx, call, camera);
    ctx.device.upload("u_ilum_mode", lighting.model.as_uniform());
    ctx.device.upload("u_light_ambient", lighting.ambient);

    let blended = call.material.alpha_mode == AlphaMode::Blend;
    let iterations = lighting.lights.len().max(1);
    for i in 0..iterations {
        let mut pass_state = state;
        pass_state.depth_compare = CompareFunction::LessEqual;
        pass_state.blend = match (i, blended) {
            (0, false) => None,
            (0, true) => Some(BlendState::alpha_blending()),
            _ => Some(BlendState::alpha_additive()),
        };
        ctx.device.set_raster_state(pass_state);
        ctx.device.upload("u_iteration", i as i32);

        match lighting.lights.get(i) {
            Some(light) => {
                let map = shadow_map(&*ctx.device, light);
                light.upload_uniforms(&mut *ctx.device, lighting.model, map);
            }
            // no lights: a single ambient-only pass
            None => {
                ctx.device.upload("u_light_color", Vec3::ZERO);
                ctx.device.upload("u_light_intensity", 0.0f32);
                ctx.device.upload("u_has_shadow", false);
            }
        }
        ctx.draw_mesh(&call.mesh);
    }
}

/// Upload every light as bounded arrays for the single-pass program
pub fn upload_light_arrays(ctx: &mut FrameContext, lighting: &SceneLighting) {
    let lights: Vec<&Light> = lighting
        .lights
        .iter()
        .copied()
        .take(lighting.max_lights.min(SINGLE_PASS_LIGHTS as usize))
        .collect();
    if lighting.lights.len() > lights.len() {
        log::debug!(
            "Single pass: {} lights over the limit of {} ignored",
            lighting.lights.len() - lights.len(),
            lighting.max_lights
        );
    }
    let intensity_scale = match lighting.model {
        LightingModel::Phong => 0.25,
        LightingModel::Pbr => 1.0,
    };

    let device = &mut *ctx.device;
    device.upload("u_light_ambient", lighting.ambient);
    device.upload("u_ilum_mode", lighting.model.as_uniform());
    device.upload("u_num_lights", lights.len() as i32);
    device.upload("u_light_pos", lights.iter().map(|l| l.position()).collect::<Vec<_>>());
    device.upload("u_light_color", lights.iter().map(|l| l.color()).collect::<Vec<_>>());
    device.upload(
        "u_light_direction",
        lights.iter().map(|l| l.front()).collect::<Vec<_>>(),
    );
    device.upload(
        "u_light_type",
        lights.iter().map(|l| l.light_type.as_uniform()).collect::<Vec<_>>(),
    );
    device.upload(
        "u_light_maxdist",
        lights.iter().map(|l| l.max_distance).collect::<Vec<_>>(),
    );
    device.upload(
        "u_cos_cutoff",
        lights
            .iter()
            .map(|l| l.cone_angle.to_radians().cos())
            .collect::<Vec<_>>(),
    );
    device.upload(
        "u_light_intensity",
        lights
            .iter()
            .map(|l| l.intensity * intensity_scale)
            .collect::<Vec<_>>(),
    );
    device.upload(
        "u_spot_exp",
        lights.iter().map(|l| l.spot_exponent).collect::<Vec<_>>(),
    );
}

/// Shade a sequence of calls in order
pub fn render_calls(
    ctx: &mut FrameContext,
    calls: &[RenderCall],
    camera: &Camera,
    technique: RenderTechnique,
    lighting: &SceneLighting,
) {
    for call in calls {
        render_call(ctx, call, camera, technique, lighting);
    }
}

/// Draw the environment cube around the camera; no-op without a skybox
pub fn render_skybox(ctx: &mut FrameContext, scene: &Scene, camera: &Camera) {
    let Some(skybox) = scene.skybox else {
        return;
    };
    if !ctx.use_program(ProgramKind::Skybox, "skybox") {
        return;
    }
    ctx.device.set_raster_state(RasterState {
        depth_test: false,
        depth_write: false,
        cull_mode: CullMode::None,
        ..Default::default()
    });
    ctx.upload_camera(camera);
    let far = camera.projection.far() * 0.5;
    ctx.device.upload(
        "u_model",
        Mat4::from_translation(camera.position) * Mat4::from_scale(Vec3::splat(far)),
    );
    ctx.device.set_texture("u_skybox", skybox);
    ctx.draw_mesh(&primitives().cube);
    ctx.device.restore_state();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineSettings, FrameStats};
    use crate::render_target::RenderTargetPool;
    use crate::resources::{BoundingBox, Material, Mesh};
    use crate::scene::LightType;
    use std::sync::Arc;

    fn call(material: Material) -> RenderCall {
        RenderCall {
            model: Mat4::IDENTITY,
            mesh: Arc::new(Mesh::cube()),
            material: Arc::new(material),
            world_bounds: BoundingBox::default(),
            distance_to_camera: 0.0,
            reflection: None,
        }
    }

    fn states(device: &DummyBackend) -> Vec<RasterState> {
        device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::SetState(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn run(
        device: &mut DummyBackend,
        call: &RenderCall,
        technique: RenderTechnique,
        lighting: &SceneLighting,
    ) -> FrameStats {
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::forward();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(device, &mut targets, &settings, &mut stats);
        render_call(&mut ctx, call, &Camera::default(), technique, lighting);
        stats
    }

    fn lighting<'a>(lights: Vec<&'a Light>) -> SceneLighting<'a> {
        SceneLighting {
            lights,
            ambient: Vec3::splat(0.1),
            model: LightingModel::Pbr,
            max_lights: 5,
        }
    }

    #[test]
    fn test_multi_pass_blends_after_first_light() {
        let a = Light::point("a", Vec3::ZERO, Vec3::ONE);
        let b = Light::point("b", Vec3::ONE, Vec3::ONE);
        let mut device = DummyBackend::new(8, 8).with_programs(["multi_pass"]);
        let stats = run(&mut device, &call(Material::default()), RenderTechnique::MultiPass, &lighting(vec![&a, &b]));

        assert_eq!(stats.draws, 2);
        let states = states(&device);
        assert_eq!(states[0].blend, None);
        assert_eq!(states[0].depth_compare, CompareFunction::LessEqual);
        assert_eq!(states[1].blend, Some(BlendState::alpha_additive()));
        assert_eq!(device.raster_state(), RasterState::default());
    }

    #[test]
    fn test_multi_pass_blended_material_first_pass() {
        let a = Light::point("a", Vec3::ZERO, Vec3::ONE);
        let mut device = DummyBackend::new(8, 8).with_programs(["multi_pass"]);
        run(&mut device, &call(Material::glass()), RenderTechnique::MultiPass, &lighting(vec![&a]));
        assert_eq!(states(&device)[0].blend, Some(BlendState::alpha_blending()));
    }

    #[test]
    fn test_multi_pass_without_lights_draws_ambient_once() {
        let mut device = DummyBackend::new(8, 8).with_programs(["multi_pass"]);
        let stats = run(&mut device, &call(Material::default()), RenderTechnique::MultiPass, &lighting(vec![]));
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn test_two_sided_disables_culling() {
        let mut device = DummyBackend::new(8, 8).with_programs(["texture"]);
        let material = Material::default().with_two_sided(true);
        run(&mut device, &call(material), RenderTechnique::Texture, &lighting(vec![]));
        assert_eq!(states(&device)[0].cull_mode, CullMode::None);
    }

    #[test]
    fn test_missing_program_skips_draw() {
        let mut device = DummyBackend::new(8, 8);
        let stats = run(&mut device, &call(Material::default()), RenderTechnique::Texture, &lighting(vec![]));
        assert_eq!(device.draw_count(), 0);
        assert_eq!(stats.skipped_stages, vec!["forward"]);
    }

    #[test]
    fn test_single_pass_arrays_are_bounded() {
        let lights: Vec<Light> = (0..4)
            .map(|i| Light::new(&format!("l{i}"), LightType::Point, Vec3::ONE))
            .collect();
        let mut lit = lighting(lights.iter().collect());
        lit.max_lights = 3;
        let mut device = DummyBackend::new(8, 8).with_programs(["single_pass"]);
        run(&mut device, &call(Material::default()), RenderTechnique::SinglePass, &lit);
        assert_eq!(device.uniform_values("u_num_lights"), vec![&UniformValue::Int(3)]);
    }
}
