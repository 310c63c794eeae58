//! Scene Renderer - forward and deferred scene rendering over a small device abstraction
//!
//! The renderer draws a [`Scene`](scene::Scene) through a [`RenderDevice`]
//! implementation:
//! - **wgpu**: headless GPU device rendering into offscreen textures
//! - **dummy**: records every command, used by tests and tooling
//!
//! # Features
//! - Render-call collection with frustum culling and back-to-front sorting
//! - Forward (multi-pass or single-pass) and deferred topologies
//! - Shadow maps, SSAO, spherical harmonics irradiance probes with an
//!   on-disk cache, reflection probes
//! - Post chain: bloom, screen-space reflections, volumetric fog,
//!   tonemapping and FXAA

pub mod backend;
pub mod pipeline;
pub mod render_target;
pub mod resources;
pub mod scene;

use std::path::PathBuf;

pub use backend::{BackendError, BackendResult, DummyBackend, RenderDevice};
#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuBackend;
pub use pipeline::{FrameStats, PipelineSettings, Renderer};

use pipeline::ReflectionProbe;
use scene::{Scene, DEFAULT_MAX_LIGHTS, DEFAULT_SHADOW_RESOLUTION};

/// Backend selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// wgpu headless device
    #[default]
    Wgpu,
    /// Command recorder without a GPU
    Dummy,
}

/// Configuration for creating a device and its renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Screen target width
    pub width: u32,
    /// Screen target height
    pub height: u32,
    /// Which backend to use
    pub backend: BackendType,
    /// Stage toggles and parameters
    pub settings: PipelineSettings,
    /// Where baked irradiance volumes are saved and loaded
    pub irradiance_cache: Option<PathBuf>,
    /// Light bound of scenes created through [`RendererConfig::new_scene`]
    pub max_lights: usize,
    /// Shadow map side for spot and directional lights
    pub shadow_resolution: u32,
    /// Cubemap face side for reflection probes not captured yet
    pub reflection_resolution: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            backend: BackendType::Wgpu,
            settings: PipelineSettings::default(),
            irradiance_cache: None,
            max_lights: DEFAULT_MAX_LIGHTS,
            shadow_resolution: DEFAULT_SHADOW_RESOLUTION,
            reflection_resolution: ReflectionProbe::DEFAULT_RESOLUTION,
        }
    }
}

impl RendererConfig {
    pub fn new_scene(&self) -> Scene {
        Scene::new().with_max_lights(self.max_lights)
    }

    /// Apply the configured shadow and probe resolutions to `scene`.
    /// Probes that already own a cubemap keep their size.
    pub fn prepare_scene(&self, scene: &mut Scene) {
        for light in scene.lights_mut() {
            let current = light.shadow.as_ref().map(|s| s.resolution);
            if light.light_type.casts_shadows() && current != Some(self.shadow_resolution) {
                light.setup_shadow(self.shadow_resolution);
            }
        }
        for probe in scene.reflection_probes_mut() {
            if probe.cubemap.is_none() {
                probe.resolution = self.reflection_resolution.max(1);
            }
        }
    }

    pub fn build_renderer(&self) -> Renderer {
        let renderer = Renderer::new(self.settings.clone());
        match &self.irradiance_cache {
            Some(path) => renderer.with_irradiance_cache(path.clone()),
            None => renderer,
        }
    }
}

/// Create the configured device with every built-in program registered
pub fn create_device(config: &RendererConfig) -> BackendResult<Box<dyn RenderDevice>> {
    let mut device: Box<dyn RenderDevice> = match config.backend {
        #[cfg(feature = "wgpu-backend")]
        BackendType::Wgpu => Box::new(WgpuBackend::new(config.width, config.height)?),
        #[cfg(not(feature = "wgpu-backend"))]
        BackendType::Wgpu => {
            return Err(BackendError::InitializationFailed(
                "built without the wgpu-backend feature".into(),
            ))
        }
        BackendType::Dummy => Box::new(DummyBackend::new(config.width, config.height)),
    };
    pipeline::register_builtin_programs(device.as_mut());
    log::info!(
        "Created {} device at {}x{}",
        device.name(),
        config.width,
        config.height
    );
    Ok(device)
}
