//! Volumetric fog
//!
//! Ray-marches each visible light's contribution along the view ray up to
//! the scene depth and adds it on top of a copy of the source with
//! SRC_ALPHA / ONE blending.

use super::{begin_fullscreen, PostInputs, PostProcessStage, PostStageKind};
use crate::backend::*;
use crate::pipeline::shadow_pass::shadow_map;
use crate::pipeline::{FrameContext, PipelineSettings, ProgramKind};
use crate::render_target::TargetPurpose;

#[derive(Debug, Default)]
pub struct FogStage;

impl FogStage {
    pub fn new() -> Self {
        Self
    }
}

impl PostProcessStage for FogStage {
    fn name(&self) -> &'static str {
        "Fog"
    }

    fn kind(&self) -> PostStageKind {
        PostStageKind::Fog
    }

    fn enabled(&self, settings: &PipelineSettings) -> bool {
        settings.fog.enabled
    }

    fn apply(
        &mut self,
        ctx: &mut FrameContext,
        inputs: &PostInputs,
        source: TextureHandle,
    ) -> BackendResult<Option<TextureHandle>> {
        let Some(depth) = inputs.depth else {
            return Ok(None);
        };
        if !ctx.has_program(ProgramKind::Fog) {
            ctx.use_program(ProgramKind::Fog, "fog");
            return Ok(None);
        }
        let settings = ctx.settings.fog.clone();
        let lighting = ctx.settings.lighting;

        begin_fullscreen(ctx, TargetPurpose::Fog)?;
        ctx.device.blit(source);
        ctx.use_program(ProgramKind::Fog, "fog");
        ctx.device
            .set_raster_state(RasterState::fullscreen().with_blend(BlendState::alpha_additive()));
        ctx.upload_camera(inputs.camera);
        ctx.device.set_texture("u_depth_texture", depth);
        let inverse_resolution = ctx.inverse_resolution();
        ctx.device.upload("u_iRes", inverse_resolution);
        ctx.device.upload("u_density", settings.density);
        ctx.device.upload("u_samples", settings.samples as i32);
        ctx.device.upload("u_max_distance", settings.max_distance);
        for light in inputs.scene.lights().filter(|l| l.visible) {
            let map = shadow_map(&*ctx.device, light);
            light.upload_uniforms(&mut *ctx.device, lighting, map);
            ctx.draw_fullscreen();
        }
        ctx.finish_stage(self.name());
        Ok(ctx.color(TargetPurpose::Fog, 0))
    }
}
