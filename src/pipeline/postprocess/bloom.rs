//! Bloom post-processing effect
//!
//! Bright pixels are extracted into a half-resolution target, blurred with
//! separable passes ping-ponging between two targets, then added back on
//! top of the source.

use glam::Vec2;

use super::{begin_fullscreen, PostInputs, PostProcessStage, PostStageKind, POST_FORMAT};
use crate::backend::*;
use crate::pipeline::{FrameContext, PipelineSettings, ProgramKind};
use crate::render_target::{TargetPurpose, TargetSpec, TextureSize};

const BLOOM_SCALE: f32 = 0.5;

fn half_res_spec() -> TargetSpec {
    TargetSpec::screen(&[POST_FORMAT]).with_size(TextureSize::Relative {
        width_scale: BLOOM_SCALE,
        height_scale: BLOOM_SCALE,
    })
}

#[derive(Debug, Default)]
pub struct BloomStage;

impl BloomStage {
    pub fn new() -> Self {
        Self
    }

    fn blur(
        &self,
        ctx: &mut FrameContext,
        from: TargetPurpose,
        to: TargetPurpose,
        direction: Vec2,
    ) -> BackendResult<()> {
        let input = ctx.color(from, 0);
        ctx.bind_target(to, &half_res_spec())?;
        let (w, h) = ctx.targets.size(to).unwrap_or((1, 1));
        ctx.device.set_raster_state(RasterState::fullscreen());
        ctx.use_program(ProgramKind::BloomBlur, "bloom");
        if let Some(input) = input {
            ctx.device.set_texture("u_texture", input);
        }
        ctx.device.upload("u_direction", direction);
        ctx.device
            .upload("u_iRes", Vec2::new(1.0 / w as f32, 1.0 / h as f32));
        ctx.draw_fullscreen();
        ctx.finish_stage("bloom blur");
        Ok(())
    }
}

impl PostProcessStage for BloomStage {
    fn name(&self) -> &'static str {
        "Bloom"
    }

    fn kind(&self) -> PostStageKind {
        PostStageKind::Bloom
    }

    fn enabled(&self, settings: &PipelineSettings) -> bool {
        settings.bloom.enabled
    }

    fn apply(
        &mut self,
        ctx: &mut FrameContext,
        _inputs: &PostInputs,
        source: TextureHandle,
    ) -> BackendResult<Option<TextureHandle>> {
        let programs = [
            ProgramKind::BloomExtract,
            ProgramKind::BloomBlur,
            ProgramKind::BloomComposite,
        ];
        let missing = programs.into_iter().find(|p| !ctx.has_program(*p));
        if let Some(missing) = missing {
            ctx.use_program(missing, "bloom");
            return Ok(None);
        }
        let settings = ctx.settings.bloom.clone();

        ctx.bind_target(TargetPurpose::BloomBright, &half_res_spec())?;
        ctx.device.set_raster_state(RasterState::fullscreen());
        ctx.use_program(ProgramKind::BloomExtract, "bloom");
        ctx.device.set_texture("u_texture", source);
        ctx.device.upload("u_threshold", settings.threshold);
        ctx.draw_fullscreen();
        ctx.finish_stage("bloom extract");

        for _ in 0..settings.iterations.max(1) {
            self.blur(ctx, TargetPurpose::BloomBright, TargetPurpose::BloomBlur, Vec2::X)?;
            self.blur(ctx, TargetPurpose::BloomBlur, TargetPurpose::BloomBright, Vec2::Y)?;
        }
        let Some(blurred) = ctx.color(TargetPurpose::BloomBright, 0) else {
            return Ok(None);
        };

        begin_fullscreen(ctx, TargetPurpose::Bloom)?;
        ctx.use_program(ProgramKind::BloomComposite, "bloom");
        ctx.device.set_texture("u_texture", source);
        ctx.device.set_texture("u_bloom", blurred);
        ctx.device.upload("u_intensity", settings.intensity);
        ctx.draw_fullscreen();
        ctx.finish_stage(self.name());
        Ok(ctx.color(TargetPurpose::Bloom, 0))
    }
}
