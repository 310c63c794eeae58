//! FXAA antialiasing
//!
//! Single fullscreen pass detecting luma edges on the final color.

use super::{begin_fullscreen, PostInputs, PostProcessStage, PostStageKind};
use crate::backend::*;
use crate::pipeline::{FrameContext, PipelineSettings, ProgramKind};
use crate::render_target::TargetPurpose;

#[derive(Debug, Default)]
pub struct FxaaStage;

impl FxaaStage {
    pub fn new() -> Self {
        Self
    }
}

impl PostProcessStage for FxaaStage {
    fn name(&self) -> &'static str {
        "FXAA"
    }

    fn kind(&self) -> PostStageKind {
        PostStageKind::Antialias
    }

    fn enabled(&self, settings: &PipelineSettings) -> bool {
        settings.antialias.enabled
    }

    fn apply(
        &mut self,
        ctx: &mut FrameContext,
        _inputs: &PostInputs,
        source: TextureHandle,
    ) -> BackendResult<Option<TextureHandle>> {
        if !ctx.has_program(ProgramKind::Fxaa) {
            ctx.use_program(ProgramKind::Fxaa, "antialias");
            return Ok(None);
        }
        let settings = ctx.settings.antialias.clone();

        begin_fullscreen(ctx, TargetPurpose::Antialias)?;
        ctx.use_program(ProgramKind::Fxaa, "antialias");
        ctx.device.set_texture("u_texture", source);
        let inverse_resolution = ctx.inverse_resolution();
        ctx.device.upload("u_iRes", inverse_resolution);
        ctx.device.upload("u_edge_threshold", settings.edge_threshold);
        ctx.device
            .upload("u_edge_threshold_min", settings.edge_threshold_min);
        ctx.draw_fullscreen();
        ctx.finish_stage(self.name());
        Ok(ctx.color(TargetPurpose::Antialias, 0))
    }
}
