//! Deferred lighting pass
//!
//! Runs inside the bound scene target after the gbuffer depth has been
//! copied in. One fullscreen ambient draw, then one additive draw per
//! visible light: a fullscreen quad for directional lights, a sphere
//! covering the light's range for point and spot lights.

use glam::{Mat4, Vec3};

use crate::backend::*;
use crate::pipeline::gbuffer_pass::GBufferTextures;
use crate::pipeline::shadow_pass::shadow_map;
use crate::pipeline::{FrameContext, ProgramKind};
use crate::resources::primitives;
use crate::scene::{Camera, Light, LightType};

/// Optional screen-space inputs modulating the lighting
#[derive(Debug, Clone, Copy, Default)]
pub struct LightingInputs {
    pub ssao: Option<TextureHandle>,
    pub irradiance: Option<TextureHandle>,
}

#[derive(Debug, Default)]
pub struct LightingPass;

impl LightingPass {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "Deferred Lighting Pass"
    }

    pub fn execute(
        &self,
        ctx: &mut FrameContext,
        camera: &Camera,
        gbuffers: &GBufferTextures,
        lights: &[&Light],
        ambient: Vec3,
        inputs: LightingInputs,
    ) {
        self.render_ambient(ctx, gbuffers, ambient, inputs);
        for light in lights.iter().filter(|l| l.visible) {
            self.render_light(ctx, camera, gbuffers, light, inputs);
        }
        ctx.device.restore_state();
    }

    fn upload_inputs(&self, ctx: &mut FrameContext, gbuffers: &GBufferTextures, inputs: LightingInputs) {
        gbuffers.bind(&mut *ctx.device);
        match inputs.ssao {
            Some(ssao) => {
                ctx.device.set_texture("u_ssao", ssao);
                ctx.device.upload("u_apply_ssao", true);
            }
            None => ctx.device.upload("u_apply_ssao", false),
        }
        match inputs.irradiance {
            Some(irradiance) => {
                ctx.device.set_texture("u_irradiance", irradiance);
                ctx.device.upload("u_apply_irradiance", true);
            }
            None => ctx.device.upload("u_apply_irradiance", false),
        }
        let inverse_resolution = ctx.inverse_resolution();
        ctx.device.upload("u_iRes", inverse_resolution);
        ctx.device
            .upload("u_ilum_mode", ctx.settings.lighting.as_uniform());
    }

    fn render_ambient(
        &self,
        ctx: &mut FrameContext,
        gbuffers: &GBufferTextures,
        ambient: Vec3,
        inputs: LightingInputs,
    ) {
        if !ctx.use_program(ProgramKind::DeferredAmbient, "deferred ambient") {
            return;
        }
        ctx.device.set_raster_state(RasterState::fullscreen());
        self.upload_inputs(ctx, gbuffers, inputs);
        ctx.device.upload("u_light_ambient", ambient);
        ctx.draw_fullscreen();
    }

    fn render_light(
        &self,
        ctx: &mut FrameContext,
        camera: &Camera,
        gbuffers: &GBufferTextures,
        light: &Light,
        inputs: LightingInputs,
    ) {
        let volume = light.light_type != LightType::Directional;
        let program = if volume {
            ProgramKind::DeferredGeometry
        } else {
            ProgramKind::DeferredMultiPass
        };
        if !ctx.use_program(program, "deferred light") {
            return;
        }

        let mut state = RasterState::fullscreen().with_blend(BlendState::additive());
        if volume {
            // inside faces, so the camera may sit within the light's range
            state.cull_mode = CullMode::Back;
            state.front_face = FrontFace::Cw;
        }
        ctx.device.set_raster_state(state);
        self.upload_inputs(ctx, gbuffers, inputs);
        ctx.upload_camera(camera);
        let map = shadow_map(&*ctx.device, light);
        light.upload_uniforms(&mut *ctx.device, ctx.settings.lighting, map);

        if volume {
            ctx.device.upload("u_model", light_volume(light));
            ctx.draw_mesh(&primitives().sphere);
        } else {
            ctx.device.upload("u_model", Mat4::IDENTITY);
            ctx.draw_fullscreen();
        }
    }
}

/// Model matrix of the sphere bounding a light's range
pub fn light_volume(light: &Light) -> Mat4 {
    // the shared sphere has radius 0.5
    Mat4::from_translation(light.position()) * Mat4::from_scale(Vec3::splat(light.max_distance * 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FrameStats, PipelineSettings};
    use crate::render_target::RenderTargetPool;

    fn gbuffers() -> GBufferTextures {
        GBufferTextures {
            albedo: TextureHandle(1),
            normal: TextureHandle(2),
            omr: TextureHandle(3),
            emissive: TextureHandle(4),
            depth: TextureHandle(5),
        }
    }

    fn states_at_draws(device: &DummyBackend) -> Vec<RasterState> {
        let mut state = RasterState::default();
        let mut out = Vec::new();
        for command in device.commands() {
            match command {
                DeviceCommand::SetState(s) => state = *s,
                DeviceCommand::DrawMesh { .. } | DeviceCommand::DrawFullscreen => out.push(state),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn test_ambient_then_one_additive_draw_per_visible_light() {
        let sun = Light::directional("sun", Vec3::new(0.0, 10.0, 1.0), Vec3::ZERO, Vec3::ONE);
        let bulb = Light::point("bulb", Vec3::ONE, Vec3::ONE);
        let mut hidden = Light::point("hidden", Vec3::ONE, Vec3::ONE);
        hidden.set_visible(false);

        let mut device = DummyBackend::new(16, 16).with_programs([
            "deferred_ambient",
            "deferred_multi_pass",
            "deferred_geometry",
        ]);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        LightingPass::new().execute(
            &mut ctx,
            &Camera::default(),
            &gbuffers(),
            &[&sun, &bulb, &hidden],
            Vec3::splat(0.2),
            LightingInputs::default(),
        );

        assert_eq!(stats.draws, 3);
        assert_eq!(
            device.programs_used(),
            vec!["deferred_ambient", "deferred_multi_pass", "deferred_geometry"]
        );
        let states = states_at_draws(&device);
        assert_eq!(states[0].blend, None);
        assert_eq!(states[1].blend, Some(BlendState::additive()));
        assert_eq!(states[2].front_face, FrontFace::Cw);
        assert_eq!(device.raster_state(), RasterState::default());
    }

    #[test]
    fn test_volume_scales_with_range() {
        let mut light = Light::point("p", Vec3::new(1.0, 2.0, 3.0), Vec3::ONE);
        light.max_distance = 10.0;
        let m = light_volume(&light);
        assert_eq!(m.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.transform_vector3(Vec3::new(0.5, 0.0, 0.0)), Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_missing_light_program_keeps_ambient() {
        let bulb = Light::point("bulb", Vec3::ONE, Vec3::ONE);
        let mut device = DummyBackend::new(16, 16).with_programs(["deferred_ambient"]);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        LightingPass::new().execute(
            &mut ctx,
            &Camera::default(),
            &gbuffers(),
            &[&bulb],
            Vec3::ZERO,
            LightingInputs::default(),
        );
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.skipped_stages, vec!["deferred light"]);
    }
}
