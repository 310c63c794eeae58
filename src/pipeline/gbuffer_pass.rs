//! G-Buffer pass for deferred rendering
//!
//! Renders opaque geometry into four color buffers plus depth:
//! - 0: albedo (RGB) + alpha
//! - 1: world normal encoded to [0, 1]
//! - 2: occlusion, metallic, roughness
//! - 3: emissive

use glam::Vec4;

use crate::backend::*;
use crate::pipeline::collector::RenderCall;
use crate::pipeline::forward_pass::{material_state, render_skybox};
use crate::pipeline::{FrameContext, ProgramKind};
use crate::render_target::{TargetPurpose, TargetSpec};
use crate::scene::{Camera, Scene};

pub const GBUFFER_FORMATS: [TextureFormat; 4] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
];

/// Textures of the current gbuffer, fetched fresh each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferTextures {
    pub albedo: TextureHandle,
    pub normal: TextureHandle,
    pub omr: TextureHandle,
    pub emissive: TextureHandle,
    pub depth: TextureHandle,
}

impl GBufferTextures {
    pub fn fetch(ctx: &FrameContext) -> Option<Self> {
        Some(Self {
            albedo: ctx.color(TargetPurpose::GBuffers, 0)?,
            normal: ctx.color(TargetPurpose::GBuffers, 1)?,
            omr: ctx.color(TargetPurpose::GBuffers, 2)?,
            emissive: ctx.color(TargetPurpose::GBuffers, 3)?,
            depth: ctx.depth(TargetPurpose::GBuffers)?,
        })
    }

    /// Bind every buffer under the names the deferred programs read
    pub fn bind(&self, device: &mut dyn RenderDevice) {
        device.set_texture("u_albedo", self.albedo);
        device.set_texture("u_normal_texture", self.normal);
        device.set_texture("u_omr", self.omr);
        device.set_texture("u_emissive", self.emissive);
        device.set_texture("u_depth_texture", self.depth);
    }
}

pub fn gbuffer_spec() -> TargetSpec {
    TargetSpec::screen(&GBUFFER_FORMATS).with_depth()
}

#[derive(Debug, Default)]
pub struct GBufferPass;

impl GBufferPass {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    /// Fill the gbuffer with `opaque` calls and return its textures
    pub fn execute(
        &self,
        ctx: &mut FrameContext,
        scene: &Scene,
        camera: &Camera,
        opaque: &[RenderCall],
    ) -> BackendResult<Option<GBufferTextures>> {
        ctx.bind_target(TargetPurpose::GBuffers, &gbuffer_spec())?;
        ctx.device.clear(Some([0.0, 0.0, 0.0, 0.0]), true);
        render_skybox(ctx, scene, camera);
        for call in opaque {
            render_gbuffer_call(ctx, call, camera);
        }
        ctx.finish_stage(self.name());
        Ok(GBufferTextures::fetch(ctx))
    }
}

pub fn render_gbuffer_call(ctx: &mut FrameContext, call: &RenderCall, camera: &Camera) {
    if call.mesh.vertex_count() == 0 || !ctx.use_program(ProgramKind::GBuffers, "gbuffers") {
        return;
    }
    let mut state = material_state(call, RasterState::default());
    // the gbuffer holds one surface per pixel
    state.blend = None;
    ctx.device.set_raster_state(state);
    ctx.upload_camera(camera);
    ctx.device.upload("u_model", call.model);
    call.material.upload(&mut *ctx.device);
    ctx.draw_mesh(&call.mesh);
    ctx.device.restore_state();
}

/// Debug view: the four buffers in screen quadrants, depth in the last one
pub fn show_gbuffers(ctx: &mut FrameContext, gbuffers: &GBufferTextures, camera: &Camera) {
    let quadrants = [
        (gbuffers.albedo, Vec4::new(0.0, 0.0, 0.5, 0.5)),
        (gbuffers.normal, Vec4::new(0.5, 0.0, 0.5, 0.5)),
        (gbuffers.omr, Vec4::new(0.0, 0.5, 0.5, 0.5)),
    ];
    ctx.device.set_raster_state(RasterState::fullscreen());
    if ctx.use_program(ProgramKind::Quad, "show gbuffers") {
        for (texture, rect) in quadrants {
            ctx.device.upload("u_viewport_rect", rect);
            ctx.device.set_texture("u_texture", texture);
            ctx.draw_fullscreen();
        }
    }
    if ctx.use_program(ProgramKind::Depth, "show gbuffers") {
        ctx.device.upload("u_viewport_rect", Vec4::new(0.5, 0.5, 0.5, 0.5));
        ctx.device.upload(
            "u_camera_nearfar",
            glam::Vec2::new(camera.projection.near(), camera.projection.far()),
        );
        ctx.device.upload("u_linearize", true);
        ctx.device.set_texture("u_texture", gbuffers.depth);
        ctx.draw_fullscreen();
    }
    ctx.device.restore_state();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::collector::collect;
    use crate::pipeline::{FrameStats, PipelineSettings};
    use crate::render_target::RenderTargetPool;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Entity, Node, Prefab};
    use glam::Vec3;
    use std::sync::Arc;

    #[test]
    fn test_gbuffer_has_four_colors_and_depth() {
        let mut scene = Scene::new();
        let root = Node::new("box").with_mesh(Arc::new(Mesh::cube()), Arc::new(Material::default()));
        scene.add_entity(Entity::prefab("box", Prefab::new(root))).expect("fits");
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let calls = collect(&scene, Some(&camera), false);

        let mut device = DummyBackend::new(32, 16).with_programs(["g_buffers"]);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let gbuffers = GBufferPass::new()
            .execute(&mut ctx, &scene, &camera, &calls.opaque)
            .expect("gbuffer pass");

        assert!(gbuffers.is_some());
        assert_eq!(stats.draws, 1);
        assert_eq!(targets.size(TargetPurpose::GBuffers), Some((32, 16)));
        assert_eq!(device.bound(), None);
        assert!(device
            .commands()
            .contains(&DeviceCommand::Clear { color: Some([0.0; 4]), depth: true }));
    }
}
