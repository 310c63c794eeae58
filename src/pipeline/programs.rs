//! Named shading programs the stages look up
//!
//! Programs are provided by the caller (or the built-in WGSL set). A stage
//! whose program is not registered is skipped for the frame.

/// Every program the pipeline knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Unlit base color, also the alpha-tested shadow program
    Texture,
    /// Depth-only shadow program
    Flat,
    MultiPass,
    SinglePass,
    GBuffers,
    DeferredAmbient,
    /// Fullscreen deferred light (directional)
    DeferredMultiPass,
    /// Light volume deferred light (point, spot)
    DeferredGeometry,
    Ssao,
    Irradiance,
    Reflections,
    Fog,
    BloomExtract,
    BloomBlur,
    BloomComposite,
    Tonemapper,
    Fxaa,
    Skybox,
    /// Debug sphere shaded by SH coefficients
    Probe,
    /// Debug sphere mirroring a reflection cubemap
    ReflectionProbe,
    /// Linearized depth for debug views
    Depth,
    /// Texture copied into a sub-rectangle of the target
    Quad,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 22] = [
        ProgramKind::Texture,
        ProgramKind::Flat,
        ProgramKind::MultiPass,
        ProgramKind::SinglePass,
        ProgramKind::GBuffers,
        ProgramKind::DeferredAmbient,
        ProgramKind::DeferredMultiPass,
        ProgramKind::DeferredGeometry,
        ProgramKind::Ssao,
        ProgramKind::Irradiance,
        ProgramKind::Reflections,
        ProgramKind::Fog,
        ProgramKind::BloomExtract,
        ProgramKind::BloomBlur,
        ProgramKind::BloomComposite,
        ProgramKind::Tonemapper,
        ProgramKind::Fxaa,
        ProgramKind::Skybox,
        ProgramKind::Probe,
        ProgramKind::ReflectionProbe,
        ProgramKind::Depth,
        ProgramKind::Quad,
    ];

    /// Registered name of the program
    pub fn name(self) -> &'static str {
        match self {
            ProgramKind::Texture => "texture",
            ProgramKind::Flat => "flat",
            ProgramKind::MultiPass => "multi_pass",
            ProgramKind::SinglePass => "single_pass",
            ProgramKind::GBuffers => "g_buffers",
            ProgramKind::DeferredAmbient => "deferred_ambient",
            ProgramKind::DeferredMultiPass => "deferred_multi_pass",
            ProgramKind::DeferredGeometry => "deferred_geometry",
            ProgramKind::Ssao => "ssao",
            ProgramKind::Irradiance => "irradiance",
            ProgramKind::Reflections => "reflections",
            ProgramKind::Fog => "fog",
            ProgramKind::BloomExtract => "bloom_extract",
            ProgramKind::BloomBlur => "bloom_blur",
            ProgramKind::BloomComposite => "bloom_composite",
            ProgramKind::Tonemapper => "tonemapper",
            ProgramKind::Fxaa => "fxaa",
            ProgramKind::Skybox => "skybox",
            ProgramKind::Probe => "probe",
            ProgramKind::ReflectionProbe => "reflection_probe",
            ProgramKind::Depth => "depth",
            ProgramKind::Quad => "quad",
        }
    }

    pub fn all_names() -> impl Iterator<Item = &'static str> {
        Self::ALL.iter().map(|kind| kind.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = ProgramKind::all_names().collect();
        assert_eq!(names.len(), ProgramKind::ALL.len());
    }
}
