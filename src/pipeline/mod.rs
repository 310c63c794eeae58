//! Scene rendering pipeline
//!
//! A frame is produced in this order:
//! 1. Shadow maps for every visible shadow caster
//! 2. Irradiance probe bake and reflection probe captures, when requested
//! 3. Either the forward path (shade each call directly) or the deferred
//!    path (gbuffers, SSAO, irradiance, lighting, then blended calls)
//! 4. The post chain: bloom, screen-space reflections, fog, tonemapping
//!    and antialiasing, ordered per topology
//! 5. The copy of the final image to the screen plus debug overlays
//!
//! [`Renderer`] owns the stages and the offscreen targets; every stage
//! borrows the device through a [`FrameContext`].

pub mod collector;
pub mod context;
pub mod forward_pass;
pub mod gbuffer_pass;
pub mod irradiance;
pub mod irradiance_pass;
pub mod lighting_pass;
pub mod postprocess;
pub mod programs;
pub mod reflection;
pub mod renderer;
pub mod settings;
pub mod sh;
pub mod shaders;
pub mod shadow_pass;
pub mod ssao_pass;

pub use collector::{collect, RenderCall, RenderCalls};
pub use context::{FrameContext, FrameStats};
pub use irradiance::{IrradianceError, IrradianceVolume};
pub use irradiance_pass::{BakeOutcome, IrradianceBaker};
pub use postprocess::{PostChain, PostStageKind};
pub use programs::ProgramKind;
pub use reflection::{ReflectionCapture, ReflectionProbe};
pub use renderer::Renderer;
pub use settings::*;
pub use sh::ShCoefficients;
pub use shaders::register_builtin_programs;
