//! Pipeline mode state
//!
//! Read by every stage every frame and mutated only from outside the
//! renderer (debug menu or scene configuration). Every struct deserializes
//! with defaults for missing fields.

use serde::{Deserialize, Serialize};

/// How geometry is shaded in the forward path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderTechnique {
    /// Unlit, base color only
    Texture,
    /// One draw per light, accumulated with blending
    #[default]
    MultiPass,
    /// One draw with every light uploaded as arrays
    SinglePass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineTopology {
    Forward,
    #[default]
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingModel {
    Phong,
    #[default]
    Pbr,
}

impl LightingModel {
    /// Value of the `u_ilum_mode` uniform
    pub fn as_uniform(self) -> i32 {
        match self {
            LightingModel::Phong => 0,
            LightingModel::Pbr => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoSettings {
    pub enabled: bool,
    pub samples: u32,
    pub bias: f32,
    pub radius: f32,
    pub max_distance: f32,
    /// Draw the occlusion buffer over the final image
    pub show: bool,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            samples: 64,
            bias: 0.015,
            radius: 10.0,
            max_distance: 0.13,
            show: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub enabled: bool,
    /// Luminance above which pixels bleed
    pub threshold: f32,
    /// Horizontal + vertical blur pairs
    pub iterations: u32,
    pub intensity: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 1.0,
            iterations: 4,
            intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FogSettings {
    pub enabled: bool,
    pub density: f32,
    /// Ray-march steps per pixel
    pub samples: u32,
    pub max_distance: f32,
}

impl Default for FogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            density: 0.01,
            samples: 64,
            max_distance: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TonemapSettings {
    pub enabled: bool,
    pub average_luminance: f32,
    pub white_luminance: f32,
    pub scale: f32,
    pub gamma: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            average_luminance: 0.78,
            white_luminance: 1.0,
            scale: 1.0,
            gamma: 2.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrradianceSettings {
    pub enabled: bool,
    /// Blend the 8 surrounding probes instead of taking the nearest
    pub trilinear: bool,
    pub show_probes: bool,
    pub probe_size: f32,
    /// Side of the square float target each probe face is captured into
    pub capture_size: u32,
    /// Probes baked per frame by the incremental bake; 0 bakes everything at once
    pub probes_per_frame: usize,
}

impl Default for IrradianceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            trilinear: true,
            show_probes: false,
            probe_size: 3.0,
            capture_size: 64,
            probes_per_frame: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionSettings {
    pub enabled: bool,
    pub show_probes: bool,
    pub probe_size: f32,
    /// Nearest probes blended by the screen-space pass
    pub max_blended_probes: usize,
    /// Recapture every frame instead of once
    pub realtime: bool,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            show_probes: false,
            probe_size: 5.0,
            max_blended_probes: 4,
            realtime: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntialiasSettings {
    pub enabled: bool,
    pub edge_threshold: f32,
    pub edge_threshold_min: f32,
}

impl Default for AntialiasSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            edge_threshold: 0.125,
            edge_threshold_min: 0.0312,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub technique: RenderTechnique,
    pub topology: PipelineTopology,
    pub lighting: LightingModel,
    pub cast_shadows: bool,
    pub show_gbuffers: bool,
    pub ssao: SsaoSettings,
    pub bloom: BloomSettings,
    pub fog: FogSettings,
    pub tonemap: TonemapSettings,
    pub irradiance: IrradianceSettings,
    pub reflections: ReflectionSettings,
    pub antialias: AntialiasSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            technique: RenderTechnique::MultiPass,
            topology: PipelineTopology::Deferred,
            lighting: LightingModel::Pbr,
            cast_shadows: true,
            show_gbuffers: false,
            ssao: SsaoSettings::default(),
            bloom: BloomSettings::default(),
            fog: FogSettings::default(),
            tonemap: TonemapSettings::default(),
            irradiance: IrradianceSettings::default(),
            reflections: ReflectionSettings::default(),
            antialias: AntialiasSettings::default(),
        }
    }
}

impl PipelineSettings {
    pub fn forward() -> Self {
        Self {
            topology: PipelineTopology::Forward,
            ..Default::default()
        }
    }

    pub fn deferred() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.topology, PipelineTopology::Deferred);
        assert_eq!(settings.technique, RenderTechnique::MultiPass);
        assert!(settings.cast_shadows);
        assert!(settings.tonemap.enabled);
        assert_eq!(settings.tonemap.average_luminance, 0.78);
        assert_eq!(settings.ssao.samples, 64);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "topology": "forward", "ssao": { "enabled": true }, "lighting": "phong" }"#;
        let settings = PipelineSettings::from_json(json).expect("valid settings");
        assert_eq!(settings.topology, PipelineTopology::Forward);
        assert_eq!(settings.lighting, LightingModel::Phong);
        assert!(settings.ssao.enabled);
        assert_eq!(settings.ssao.radius, 10.0);
        assert!(settings.tonemap.enabled);
    }

    #[test]
    fn test_json_roundtrip_preserves_settings() {
        let mut settings = PipelineSettings::forward();
        settings.bloom.enabled = true;
        settings.fog.density = 0.5;
        let json = settings.to_json().expect("serializes");
        assert_eq!(PipelineSettings::from_json(&json).expect("parses"), settings);
    }
}
