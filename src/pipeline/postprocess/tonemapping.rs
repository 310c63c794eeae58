//! Tonemapping post-processing effect
//!
//! Reinhard operator driven by an average and a white luminance, followed
//! by gamma correction.

use super::{begin_fullscreen, PostInputs, PostProcessStage, PostStageKind};
use crate::backend::*;
use crate::pipeline::{FrameContext, PipelineSettings, ProgramKind};
use crate::render_target::TargetPurpose;

#[derive(Debug, Default)]
pub struct TonemappingStage;

impl TonemappingStage {
    pub fn new() -> Self {
        Self
    }
}

impl PostProcessStage for TonemappingStage {
    fn name(&self) -> &'static str {
        "Tonemapping"
    }

    fn kind(&self) -> PostStageKind {
        PostStageKind::Tonemap
    }

    fn enabled(&self, settings: &PipelineSettings) -> bool {
        settings.tonemap.enabled
    }

    fn apply(
        &mut self,
        ctx: &mut FrameContext,
        _inputs: &PostInputs,
        source: TextureHandle,
    ) -> BackendResult<Option<TextureHandle>> {
        if !ctx.has_program(ProgramKind::Tonemapper) {
            ctx.use_program(ProgramKind::Tonemapper, "tonemap");
            return Ok(None);
        }
        let settings = ctx.settings.tonemap.clone();

        begin_fullscreen(ctx, TargetPurpose::Tonemap)?;
        ctx.use_program(ProgramKind::Tonemapper, "tonemap");
        ctx.device.set_texture("u_texture", source);
        ctx.device.upload("u_average_lum", settings.average_luminance);
        ctx.device.upload(
            "u_lumwhite2",
            settings.white_luminance * settings.white_luminance,
        );
        ctx.device.upload("u_scale", settings.scale);
        ctx.device.upload("u_gamma", settings.gamma);
        ctx.device.upload("u_apply", true);
        ctx.draw_fullscreen();
        ctx.finish_stage(self.name());
        Ok(ctx.color(TargetPurpose::Tonemap, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FrameStats;
    use crate::render_target::RenderTargetPool;
    use crate::scene::{Camera, Scene};

    #[test]
    fn test_uploads_operator_parameters() {
        let scene = Scene::new();
        let camera = Camera::default();
        let inputs = PostInputs {
            scene: &scene,
            camera: &camera,
            gbuffers: None,
            depth: None,
        };
        let mut device = DummyBackend::new(16, 16).with_programs(["tonemapper"]);
        let mut targets = RenderTargetPool::new();
        let mut settings = PipelineSettings::default();
        settings.tonemap.white_luminance = 2.0;
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let output = TonemappingStage::new()
            .apply(&mut ctx, &inputs, TextureHandle(9999))
            .expect("tonemap");

        assert!(output.is_some());
        assert_eq!(device.uniform_values("u_lumwhite2"), vec![&UniformValue::Float(4.0)]);
        assert_eq!(device.uniform_values("u_average_lum"), vec![&UniformValue::Float(0.78)]);
        assert_eq!(device.uniform_values("u_gamma"), vec![&UniformValue::Float(2.2)]);
        assert_eq!(device.bound(), None);
    }
}
