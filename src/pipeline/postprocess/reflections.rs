//! Screen-space reflections composite
//!
//! Copies the source into its target, then adds the reflection of up to
//! four probe cubemaps nearest to the camera, looked up per pixel with the
//! gbuffer normal, roughness and depth. Without a gbuffer there is nothing
//! to reflect and the stage forwards its input.

use glam::Vec3;

use super::{begin_fullscreen, PostInputs, PostProcessStage, PostStageKind};
use crate::backend::*;
use crate::pipeline::reflection::nearest_probes;
use crate::pipeline::{FrameContext, PipelineSettings, ProgramKind};
use crate::render_target::TargetPurpose;

/// Cubemap slots the reflections program declares
pub const MAX_BLENDED_PROBES: usize = 4;

#[derive(Debug, Default)]
pub struct ReflectionsStage;

impl ReflectionsStage {
    pub fn new() -> Self {
        Self
    }
}

impl PostProcessStage for ReflectionsStage {
    fn name(&self) -> &'static str {
        "Reflections"
    }

    fn kind(&self) -> PostStageKind {
        PostStageKind::Reflections
    }

    fn enabled(&self, settings: &PipelineSettings) -> bool {
        settings.reflections.enabled
    }

    fn apply(
        &mut self,
        ctx: &mut FrameContext,
        inputs: &PostInputs,
        source: TextureHandle,
    ) -> BackendResult<Option<TextureHandle>> {
        let Some(gbuffers) = inputs.gbuffers else {
            return Ok(None);
        };
        let count = ctx
            .settings
            .reflections
            .max_blended_probes
            .min(MAX_BLENDED_PROBES);
        let probes = nearest_probes(inputs.scene, inputs.camera.position, count);
        if probes.is_empty() {
            return Ok(None);
        }
        if !ctx.has_program(ProgramKind::Reflections) {
            ctx.use_program(ProgramKind::Reflections, "reflections");
            return Ok(None);
        }

        begin_fullscreen(ctx, TargetPurpose::Reflections)?;
        ctx.device.blit(source);
        ctx.use_program(ProgramKind::Reflections, "reflections");
        ctx.device
            .set_raster_state(RasterState::fullscreen().with_blend(BlendState::additive()));
        gbuffers.bind(&mut *ctx.device);
        ctx.upload_camera(inputs.camera);
        let inverse_resolution = ctx.inverse_resolution();
        ctx.device.upload("u_iRes", inverse_resolution);
        ctx.device.upload("u_num_probes", probes.len() as i32);
        ctx.device.upload(
            "u_probe_pos",
            probes.iter().map(|(p, _)| *p).collect::<Vec<Vec3>>(),
        );
        for (i, (_, cubemap)) in probes.iter().enumerate() {
            ctx.device.set_texture(&format!("u_environment{i}"), *cubemap);
        }
        ctx.draw_fullscreen();
        ctx.finish_stage(self.name());
        Ok(ctx.color(TargetPurpose::Reflections, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::gbuffer_pass::GBufferTextures;
    use crate::pipeline::{FrameStats, ReflectionProbe};
    use crate::render_target::RenderTargetPool;
    use crate::scene::{Camera, Entity, Scene};

    fn gbuffers() -> GBufferTextures {
        GBufferTextures {
            albedo: TextureHandle(1),
            normal: TextureHandle(2),
            omr: TextureHandle(3),
            emissive: TextureHandle(4),
            depth: TextureHandle(5),
        }
    }

    fn scene_with_probes(count: usize) -> Scene {
        let mut scene = Scene::new();
        for i in 0..count {
            let mut probe = ReflectionProbe::new(Vec3::new(i as f32, 0.0, 0.0), 8);
            probe.cubemap = Some(TextureHandle(100 + i as u64));
            probe.captured = true;
            scene
                .add_entity(Entity::reflection_probe(&format!("p{i}"), probe))
                .expect("fits");
        }
        scene
    }

    #[test]
    fn test_blends_at_most_four_probes_additively() {
        let scene = scene_with_probes(6);
        let camera = Camera::default();
        let inputs = PostInputs {
            scene: &scene,
            camera: &camera,
            gbuffers: Some(gbuffers()),
            depth: None,
        };
        let mut device = DummyBackend::new(16, 16).with_programs(["reflections"]);
        let mut targets = RenderTargetPool::new();
        let mut settings = PipelineSettings::default();
        settings.reflections.max_blended_probes = 10;
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let output = ReflectionsStage::new()
            .apply(&mut ctx, &inputs, TextureHandle(9999))
            .expect("reflections");

        assert!(output.is_some());
        assert_eq!(device.uniform_values("u_num_probes"), vec![&UniformValue::Int(4)]);
        assert!(device
            .commands()
            .contains(&DeviceCommand::Blit { texture: TextureHandle(9999) }));
        assert!(device.commands().iter().any(|c| matches!(
            c,
            DeviceCommand::SetState(s) if s.blend == Some(BlendState::additive())
        )));
        assert_eq!(device.raster_state(), RasterState::default());
    }

    #[test]
    fn test_forwards_without_gbuffer_or_probes() {
        let camera = Camera::default();
        let mut device = DummyBackend::new(16, 16).with_programs(["reflections"]);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);

        let with_probes = scene_with_probes(2);
        let forward = PostInputs {
            scene: &with_probes,
            camera: &camera,
            gbuffers: None,
            depth: None,
        };
        let mut stage = ReflectionsStage::new();
        assert_eq!(stage.apply(&mut ctx, &forward, TextureHandle(9999)), Ok(None));

        let empty = Scene::new();
        let no_probes = PostInputs {
            scene: &empty,
            camera: &camera,
            gbuffers: Some(gbuffers()),
            depth: None,
        };
        assert_eq!(stage.apply(&mut ctx, &no_probes, TextureHandle(9999)), Ok(None));
        assert_eq!(stats.draws, 0);
    }
}
