//! Screen-space ambient occlusion
//!
//! The sample kernel is generated once and reused every frame; it is only
//! rebuilt when the sample count setting changes.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::*;
use crate::pipeline::gbuffer_pass::GBufferTextures;
use crate::pipeline::shaders::SSAO_KERNEL_SLOTS;
use crate::pipeline::{FrameContext, ProgramKind};
use crate::render_target::{TargetPurpose, TargetSpec};
use crate::scene::Camera;

const KERNEL_SEED: u64 = 0x55a0;

/// Points inside the unit sphere (or its +Z half).
///
/// Direction is uniform over the sphere, the radius is cube-root distributed
/// over [0.1, 1] so samples cluster near the center without rejection.
pub fn generate_kernel(count: usize, radius: f32, hemisphere: bool, rng: &mut impl Rng) -> Vec<Vec3> {
    (0..count)
        .map(|_| {
            let theta = rng.gen::<f32>() * std::f32::consts::TAU;
            let phi = (2.0 * rng.gen::<f32>() - 1.0).acos();
            let r = (rng.gen::<f32>() * 0.9 + 0.1).cbrt() * radius;
            let mut p = Vec3::new(
                r * phi.sin() * theta.cos(),
                r * phi.sin() * theta.sin(),
                r * phi.cos(),
            );
            if hemisphere && p.z < 0.0 {
                p.z = -p.z;
            }
            p
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SsaoPass {
    kernel: Vec<Vec3>,
}

impl SsaoPass {
    pub fn new(samples: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(KERNEL_SEED);
        Self {
            kernel: generate_kernel(samples, 1.0, true, &mut rng),
        }
    }

    pub fn name(&self) -> &str {
        "SSAO"
    }

    pub fn kernel(&self) -> &[Vec3] {
        &self.kernel
    }

    /// Write the occlusion buffer from gbuffer depth and normals.
    /// `None` when the program is missing.
    pub fn execute(
        &mut self,
        ctx: &mut FrameContext,
        camera: &Camera,
        gbuffers: &GBufferTextures,
    ) -> BackendResult<Option<TextureHandle>> {
        let settings = ctx.settings.ssao.clone();
        let samples = (settings.samples as usize).min(SSAO_KERNEL_SLOTS as usize);
        if samples != self.kernel.len() {
            *self = Self::new(samples);
        }
        if !ctx.has_program(ProgramKind::Ssao) {
            ctx.use_program(ProgramKind::Ssao, "ssao");
            return Ok(None);
        }

        ctx.bind_target(
            TargetPurpose::Ssao,
            &TargetSpec::screen(&[TextureFormat::Rgba8Unorm]),
        )?;
        ctx.device.clear(Some([1.0, 1.0, 1.0, 1.0]), false);
        ctx.use_program(ProgramKind::Ssao, "ssao");
        ctx.device.set_raster_state(RasterState::fullscreen());
        ctx.device.set_texture("u_depth_texture", gbuffers.depth);
        ctx.device.set_texture("u_normal_texture", gbuffers.normal);
        ctx.upload_camera(camera);
        ctx.device.upload("u_points", self.kernel.clone());
        ctx.device.upload("u_num_points", self.kernel.len() as i32);
        ctx.device.upload("u_bias", settings.bias);
        ctx.device.upload("u_radius", settings.radius);
        ctx.device.upload("u_max_distance", settings.max_distance);
        let inverse_resolution = ctx.inverse_resolution();
        ctx.device.upload("u_iRes", inverse_resolution);
        ctx.draw_fullscreen();
        ctx.finish_stage(self.name());

        Ok(ctx.color(TargetPurpose::Ssao, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FrameStats, PipelineSettings};
    use crate::render_target::RenderTargetPool;
    use approx::assert_relative_eq;

    #[test]
    fn test_kernel_in_hemisphere_shell() {
        let mut rng = StdRng::seed_from_u64(7);
        let kernel = generate_kernel(256, 2.0, true, &mut rng);
        assert_eq!(kernel.len(), 256);
        let min_radius = 0.1f32.cbrt() * 2.0;
        for p in &kernel {
            assert!(p.z >= 0.0);
            assert!(p.length() <= 2.0 + 1e-5);
            assert!(p.length() >= min_radius - 1e-5);
        }
    }

    #[test]
    fn test_full_sphere_kernel_has_both_halves() {
        let mut rng = StdRng::seed_from_u64(7);
        let kernel = generate_kernel(128, 1.0, false, &mut rng);
        assert!(kernel.iter().any(|p| p.z < 0.0));
        assert!(kernel.iter().any(|p| p.z > 0.0));
    }

    #[test]
    fn test_kernel_is_stable_across_instances() {
        let a = SsaoPass::new(64);
        let b = SsaoPass::new(64);
        assert_eq!(a.kernel(), b.kernel());
        assert_relative_eq!(a.kernel()[0].x, b.kernel()[0].x);
    }

    #[test]
    fn test_execute_uploads_settings() {
        let mut device = DummyBackend::new(40, 20).with_programs(["ssao"]);
        let mut targets = RenderTargetPool::new();
        let mut settings = PipelineSettings::default();
        settings.ssao.enabled = true;
        settings.ssao.samples = 16;
        let mut stats = FrameStats::default();
        let gbuffers = GBufferTextures {
            albedo: TextureHandle(100),
            normal: TextureHandle(101),
            omr: TextureHandle(102),
            emissive: TextureHandle(103),
            depth: TextureHandle(104),
        };
        let mut pass = SsaoPass::new(64);
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let output = pass
            .execute(&mut ctx, &Camera::default(), &gbuffers)
            .expect("ssao pass");

        assert!(output.is_some());
        assert_eq!(pass.kernel().len(), 16);
        assert_eq!(device.uniform_values("u_bias"), vec![&UniformValue::Float(0.015)]);
        assert_eq!(
            device.uniform_values("u_iRes"),
            vec![&UniformValue::Vec2(glam::Vec2::new(1.0 / 40.0, 1.0 / 20.0))]
        );
        assert_eq!(device.raster_state(), RasterState::default());
    }

    #[test]
    fn test_missing_program_produces_nothing() {
        let mut device = DummyBackend::new(8, 8);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let gbuffers = GBufferTextures {
            albedo: TextureHandle(1),
            normal: TextureHandle(2),
            omr: TextureHandle(3),
            emissive: TextureHandle(4),
            depth: TextureHandle(5),
        };
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let output = SsaoPass::new(8).execute(&mut ctx, &Camera::default(), &gbuffers);
        assert_eq!(output, Ok(None));
        assert!(targets.is_empty());
    }
}
