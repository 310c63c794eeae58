//! Post-processing chain
//!
//! Stages run in a fixed order, each reading the previous stage's output
//! and writing its own target. A disabled stage, or one whose program is
//! missing, forwards its input unchanged.

mod bloom;
mod fog;
mod fxaa;
mod reflections;
mod tonemapping;

pub use bloom::BloomStage;
pub use fog::FogStage;
pub use fxaa::FxaaStage;
pub use reflections::ReflectionsStage;
pub use tonemapping::TonemappingStage;

use crate::backend::*;
use crate::pipeline::gbuffer_pass::GBufferTextures;
use crate::pipeline::{FrameContext, PipelineSettings, PipelineTopology};
use crate::render_target::{TargetPurpose, TargetSpec};
use crate::scene::{Camera, Scene};

/// Format of every intermediate post target
pub const POST_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostStageKind {
    Bloom,
    Reflections,
    Tonemap,
    Fog,
    Antialias,
}

const DEFERRED_ORDER: [PostStageKind; 5] = [
    PostStageKind::Bloom,
    PostStageKind::Reflections,
    PostStageKind::Tonemap,
    PostStageKind::Fog,
    PostStageKind::Antialias,
];

// fog runs on linear HDR color here
const FORWARD_ORDER: [PostStageKind; 5] = [
    PostStageKind::Bloom,
    PostStageKind::Reflections,
    PostStageKind::Fog,
    PostStageKind::Tonemap,
    PostStageKind::Antialias,
];

/// Frame data the stages may read besides the previous output
pub struct PostInputs<'a> {
    pub scene: &'a Scene,
    pub camera: &'a Camera,
    /// Present in the deferred topology only
    pub gbuffers: Option<GBufferTextures>,
    /// Scene depth
    pub depth: Option<TextureHandle>,
}

pub trait PostProcessStage {
    fn name(&self) -> &'static str;

    fn kind(&self) -> PostStageKind;

    fn enabled(&self, settings: &PipelineSettings) -> bool;

    /// Process `source` into the stage's own target. `None` means the stage
    /// could not run and its input should be forwarded.
    fn apply(
        &mut self,
        ctx: &mut FrameContext,
        inputs: &PostInputs,
        source: TextureHandle,
    ) -> BackendResult<Option<TextureHandle>>;
}

/// Bind the viewport-sized post target for `purpose` with fullscreen state
pub(crate) fn begin_fullscreen(ctx: &mut FrameContext, purpose: TargetPurpose) -> BackendResult<()> {
    ctx.bind_target(purpose, &TargetSpec::screen(&[POST_FORMAT]))?;
    ctx.device.set_raster_state(RasterState::fullscreen());
    Ok(())
}

pub struct PostChain {
    stages: Vec<Box<dyn PostProcessStage>>,
    applied: Vec<PostStageKind>,
}

impl Default for PostChain {
    fn default() -> Self {
        Self::new()
    }
}

impl PostChain {
    pub fn new() -> Self {
        Self {
            stages: vec![
                Box::new(BloomStage::new()),
                Box::new(ReflectionsStage::new()),
                Box::new(TonemappingStage::new()),
                Box::new(FogStage::new()),
                Box::new(FxaaStage::new()),
            ],
            applied: Vec::new(),
        }
    }

    /// Stage order for a topology
    pub fn stages(topology: PipelineTopology) -> &'static [PostStageKind] {
        match topology {
            PipelineTopology::Deferred => &DEFERRED_ORDER,
            PipelineTopology::Forward => &FORWARD_ORDER,
        }
    }

    /// Stages that produced a new image during the last run, in order
    pub fn applied(&self) -> &[PostStageKind] {
        &self.applied
    }

    /// Run every stage on `source`; returns the final image
    pub fn run(
        &mut self,
        ctx: &mut FrameContext,
        inputs: &PostInputs,
        source: TextureHandle,
    ) -> BackendResult<TextureHandle> {
        self.applied.clear();
        let mut current = source;
        for kind in Self::stages(ctx.settings.topology) {
            let Some(stage) = self.stages.iter_mut().find(|s| s.kind() == *kind) else {
                continue;
            };
            if !stage.enabled(ctx.settings) {
                continue;
            }
            match stage.apply(ctx, inputs, current)? {
                Some(output) => {
                    log::trace!("{}: applied", stage.name());
                    current = output;
                    self.applied.push(*kind);
                }
                None => log::trace!("{}: passthrough", stage.name()),
            }
            ctx.check_errors(stage.name());
        }
        Ok(current)
    }
}
