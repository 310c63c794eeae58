//! Per-frame state shared by the stages

use glam::Vec2;

use crate::backend::*;
use crate::pipeline::{PipelineSettings, ProgramKind};
use crate::render_target::{RenderTargetPool, TargetPurpose, TargetSpec};
use crate::resources::Mesh;
use crate::scene::Camera;

/// Counters gathered while rendering one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub opaque_calls: usize,
    pub blended_calls: usize,
    pub culled_calls: usize,
    pub draws: usize,
    pub shadow_maps: usize,
    pub probes_baked: usize,
    pub reflection_captures: usize,
    /// Stages skipped because their program is missing
    pub skipped_stages: Vec<&'static str>,
    pub gpu_errors: usize,
}

/// Everything a stage may touch while it runs
pub struct FrameContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub targets: &'a mut RenderTargetPool,
    pub settings: &'a PipelineSettings,
    pub stats: &'a mut FrameStats,
}

impl<'a> FrameContext<'a> {
    pub fn new(
        device: &'a mut dyn RenderDevice,
        targets: &'a mut RenderTargetPool,
        settings: &'a PipelineSettings,
        stats: &'a mut FrameStats,
    ) -> Self {
        Self {
            device,
            targets,
            settings,
            stats,
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.device.viewport()
    }

    /// 1 / viewport size, the `u_iRes` uniform
    pub fn inverse_resolution(&self) -> Vec2 {
        let (w, h) = self.viewport();
        Vec2::new(1.0 / w.max(1) as f32, 1.0 / h.max(1) as f32)
    }

    /// Activate `kind`. Returns false, and records `stage` as skipped, when
    /// the program is not registered.
    pub fn use_program(&mut self, kind: ProgramKind, stage: &'static str) -> bool {
        match self.device.find_program(kind.name()) {
            Some(program) => {
                self.device.use_program(program);
                true
            }
            None => {
                log::debug!("{}: program '{}' not found, skipping", stage, kind.name());
                if !self.stats.skipped_stages.contains(&stage) {
                    self.stats.skipped_stages.push(stage);
                }
                false
            }
        }
    }

    pub fn has_program(&self, kind: ProgramKind) -> bool {
        self.device.find_program(kind.name()).is_some()
    }

    /// Draw `mesh` unless it has no vertices
    pub fn draw_mesh(&mut self, mesh: &Mesh) -> bool {
        if mesh.vertex_count() == 0 {
            return false;
        }
        self.device.draw_mesh(mesh);
        self.stats.draws += 1;
        true
    }

    pub fn draw_fullscreen(&mut self) {
        self.device.draw_fullscreen();
        self.stats.draws += 1;
    }

    /// Allocate (if needed) and bind the target for `purpose`
    pub fn bind_target(
        &mut self,
        purpose: TargetPurpose,
        spec: &TargetSpec,
    ) -> BackendResult<RenderTargetHandle> {
        let target = self.targets.ensure(&mut *self.device, purpose, spec)?;
        self.device.bind(TargetBinding::Target(target))?;
        Ok(target)
    }

    pub fn color(&self, purpose: TargetPurpose, index: usize) -> Option<TextureHandle> {
        self.targets.color(&*self.device, purpose, index)
    }

    pub fn depth(&self, purpose: TargetPurpose) -> Option<TextureHandle> {
        self.targets.depth(&*self.device, purpose)
    }

    /// Close a stage: unbind whatever is bound, restore the known-good raster
    /// state and report GPU errors raised while it ran
    pub fn finish_stage(&mut self, stage: &str) {
        if self.device.bound().is_some() {
            self.device.unbind();
        }
        self.device.restore_state();
        self.check_errors(stage);
    }

    pub fn check_errors(&mut self, stage: &str) {
        while let Some(error) = self.device.take_error() {
            log::warn!("GPU error after {}: {}", stage, error);
            self.stats.gpu_errors += 1;
        }
    }

    /// Camera matrices every geometry program reads
    pub fn upload_camera(&mut self, camera: &Camera) {
        let view_projection = camera.view_projection_matrix();
        self.device.upload("u_viewprojection", view_projection);
        self.device
            .upload("u_inverse_viewprojection", view_projection.inverse());
        self.device.upload("u_camera_position", camera.position);
        self.device.upload(
            "u_camera_nearfar",
            Vec2::new(camera.projection.near(), camera.projection.far()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_recorded_once() {
        let mut device = DummyBackend::new(16, 16);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);

        assert!(!ctx.use_program(ProgramKind::Ssao, "ssao"));
        assert!(!ctx.use_program(ProgramKind::Ssao, "ssao"));
        assert_eq!(stats.skipped_stages, vec!["ssao"]);
    }

    #[test]
    fn test_empty_mesh_is_not_drawn() {
        let mut device = DummyBackend::new(16, 16);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);

        assert!(!ctx.draw_mesh(&Mesh::new("empty")));
        assert!(ctx.draw_mesh(&Mesh::cube()));
        assert_eq!(stats.draws, 1);
        assert_eq!(device.draw_count(), 1);
    }

    #[test]
    fn test_finish_stage_restores_state_and_counts_errors() {
        let mut device = DummyBackend::new(16, 16);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        device.inject_error(BackendError::Validation("bad".into()));
        {
            let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
            ctx.device
                .set_raster_state(RasterState::fullscreen().with_blend(BlendState::additive()));
            ctx.finish_stage("test");
        }
        assert_eq!(device.raster_state(), RasterState::default());
        assert_eq!(stats.gpu_errors, 1);
    }
}
