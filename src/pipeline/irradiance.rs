//! Irradiance volume
//!
//! A regular lattice of SH probes spanning an axis-aligned box. Probe `i`
//! sits at lattice coordinate (x, y, z) with `i = x + y*X + z*X*Y`.
//!
//! The bake is persisted as a fixed-size header followed by the raw probe
//! records, written and read back by the same build.

use std::fs;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};
use thiserror::Error;

use crate::backend::*;
use crate::pipeline::sh::{ShCoefficients, SH_COEFFICIENTS};

#[derive(Error, Debug)]
pub enum IrradianceError {
    #[error("Irradiance cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Irradiance cache truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Irradiance cache header is invalid: {0}")]
    InvalidHeader(String),
}

/// One baked probe
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Probe {
    pub position: Vec3,
    /// Lattice coordinate as floats
    pub local: Vec3,
    pub index: i32,
    pub sh: ShCoefficients,
}

/// Persisted header describing the lattice
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VolumeHeader {
    pub start: Vec3,
    pub end: Vec3,
    pub delta: Vec3,
    pub dims: Vec3,
    pub probe_count: i32,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<VolumeHeader>();
pub const PROBE_SIZE: usize = std::mem::size_of::<Probe>();

#[derive(Debug, Clone)]
pub struct IrradianceVolume {
    pub start: Vec3,
    pub end: Vec3,
    pub dims: UVec3,
    pub delta: Vec3,
    pub probes: Vec<Probe>,
    /// Sampled by the lighting passes when set
    pub active: bool,
    /// 9 x probe-count float texture holding the coefficients
    pub lookup: Option<TextureHandle>,
    /// Probes baked so far; the bake resumes from here
    pub baked: usize,
}

fn lattice_delta(start: Vec3, end: Vec3, dims: UVec3) -> Vec3 {
    let steps = (dims.as_vec3() - Vec3::ONE).max(Vec3::ONE);
    (end - start) / steps
}

impl IrradianceVolume {
    /// Place probes on the lattice; every axis holds at least one probe
    pub fn new(start: Vec3, end: Vec3, dims: UVec3) -> Self {
        let dims = dims.max(UVec3::ONE);
        let mut volume = Self {
            start,
            end,
            dims,
            delta: lattice_delta(start, end, dims),
            probes: Vec::new(),
            active: true,
            lookup: None,
            baked: 0,
        };
        volume.place_probes();
        volume
    }

    fn place_probes(&mut self) {
        let count = self.probe_count();
        self.probes = (0..count)
            .map(|i| {
                let local = self.lattice(i).as_vec3();
                Probe {
                    position: self.start + local * self.delta,
                    local,
                    index: i as i32,
                    sh: ShCoefficients::default(),
                }
            })
            .collect();
        self.baked = 0;
    }

    pub fn probe_count(&self) -> usize {
        (self.dims.x * self.dims.y * self.dims.z) as usize
    }

    pub fn probe_index(&self, x: u32, y: u32, z: u32) -> usize {
        (x + y * self.dims.x + z * self.dims.x * self.dims.y) as usize
    }

    /// Lattice coordinate of linear index `index`
    pub fn lattice(&self, index: usize) -> UVec3 {
        let index = index as u32;
        let plane = self.dims.x * self.dims.y;
        UVec3::new(
            index % self.dims.x,
            (index / self.dims.x) % self.dims.y,
            index / plane,
        )
    }

    pub fn is_baked(&self) -> bool {
        self.baked >= self.probes.len()
    }

    pub fn header(&self) -> VolumeHeader {
        VolumeHeader {
            start: self.start,
            end: self.end,
            delta: self.delta,
            dims: self.dims.as_vec3(),
            probe_count: self.probes.len() as i32,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.probes.len() * PROBE_SIZE);
        bytes.extend_from_slice(bytemuck::bytes_of(&self.header()));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.probes));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IrradianceError> {
        if bytes.len() < HEADER_SIZE {
            return Err(IrradianceError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let header: VolumeHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        if header.probe_count < 0 {
            return Err(IrradianceError::InvalidHeader(format!(
                "negative probe count {}",
                header.probe_count
            )));
        }
        if header.dims.cmplt(Vec3::ONE).any() || !header.dims.is_finite() {
            return Err(IrradianceError::InvalidHeader(format!(
                "bad dimensions {}",
                header.dims
            )));
        }
        let dims = header.dims.as_uvec3();
        let count = header.probe_count as usize;
        let cells = (dims.x as usize)
            .checked_mul(dims.y as usize)
            .and_then(|n| n.checked_mul(dims.z as usize));
        if cells != Some(count) {
            return Err(IrradianceError::InvalidHeader(format!(
                "{} probes do not fill a {}x{}x{} grid",
                count, dims.x, dims.y, dims.z
            )));
        }
        let expected = count
            .checked_mul(PROBE_SIZE)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or_else(|| {
                IrradianceError::InvalidHeader(format!("probe count {count} is too large"))
            })?;
        if bytes.len() < expected {
            return Err(IrradianceError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let probes = bytes[HEADER_SIZE..expected]
            .chunks_exact(PROBE_SIZE)
            .map(bytemuck::pod_read_unaligned::<Probe>)
            .collect::<Vec<_>>();
        Ok(Self {
            start: header.start,
            end: header.end,
            dims,
            delta: header.delta,
            baked: probes.len(),
            probes,
            active: true,
            lookup: None,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IrradianceError> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes())?;
        log::info!(
            "Saved {} irradiance probes to {}",
            self.probes.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IrradianceError> {
        let path = path.as_ref();
        let volume = Self::from_bytes(&fs::read(path)?)?;
        log::info!(
            "Loaded {} irradiance probes from {}",
            volume.probes.len(),
            path.display()
        );
        Ok(volume)
    }

    /// Whether a loaded bake describes the same lattice as `self`
    pub fn same_layout(&self, other: &IrradianceVolume) -> bool {
        self.dims == other.dims
            && self.start.abs_diff_eq(other.start, 1e-4)
            && self.end.abs_diff_eq(other.end, 1e-4)
    }

    /// Lookup texture contents: one row per probe, one RGBA texel per coefficient
    pub fn lookup_pixels(&self) -> Vec<f32> {
        let mut pixels = Vec::with_capacity(self.probes.len() * SH_COEFFICIENTS * 4);
        for probe in &self.probes {
            for c in &probe.sh.coeffs {
                pixels.extend_from_slice(&[c.x, c.y, c.z, 1.0]);
            }
        }
        pixels
    }

    /// (Re)create the lookup texture from the current coefficients
    pub fn upload_lookup(&mut self, device: &mut dyn RenderDevice) -> BackendResult<TextureHandle> {
        if let Some(old) = self.lookup.take() {
            device.destroy_texture(old);
        }
        let desc = TextureDescriptor::new_2d(
            "irradiance lookup",
            SH_COEFFICIENTS as u32,
            self.probes.len().max(1) as u32,
            TextureFormat::Rgba32Float,
        );
        let texture = device.create_texture(&desc)?;
        let mut pixels = self.lookup_pixels();
        if pixels.is_empty() {
            pixels.resize(SH_COEFFICIENTS * 4, 0.0);
        }
        device.write_texture(texture, bytemuck::cast_slice(&pixels))?;
        self.lookup = Some(texture);
        Ok(texture)
    }

    /// Lattice uniforms read by the irradiance program
    pub fn upload_uniforms(&self, device: &mut dyn RenderDevice) {
        device.upload("u_irr_start", self.start);
        device.upload("u_irr_end", self.end);
        device.upload("u_irr_delta", self.delta);
        device.upload("u_irr_dims", self.dims.as_vec3());
        device.upload("u_num_probes", self.probes.len() as i32);
        if let Some(lookup) = self.lookup {
            device.set_texture("u_probes_texture", lookup);
        }
    }

    /// Lattice coordinate of a world position, clamped to the grid
    pub fn local_position(&self, position: Vec3) -> Vec3 {
        let max = (self.dims - UVec3::ONE).as_vec3();
        let delta = Vec3::select(self.delta.cmpeq(Vec3::ZERO), Vec3::ONE, self.delta);
        ((position - self.start) / delta).clamp(Vec3::ZERO, max)
    }

    /// CPU counterpart of the screen-space irradiance program
    pub fn sample(&self, position: Vec3, normal: Vec3, trilinear: bool) -> Vec3 {
        if self.probes.is_empty() {
            return Vec3::ZERO;
        }
        let local = self.local_position(position);
        if !trilinear {
            let nearest = local.round().as_uvec3();
            let index = self.probe_index(nearest.x, nearest.y, nearest.z);
            return self.probes[index].sh.irradiance(normal);
        }

        let max = self.dims - UVec3::ONE;
        let base = local.floor().as_uvec3().min(max);
        let t = local - base.as_vec3();
        let mut sh = ShCoefficients::default();
        for corner in 0..8u32 {
            let offset = UVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let weight = Vec3::select(offset.cmpeq(UVec3::ONE), t, Vec3::ONE - t);
            let weight = weight.x * weight.y * weight.z;
            if weight == 0.0 {
                continue;
            }
            let p = (base + offset).min(max);
            sh.add_scaled(&self.probes[self.probe_index(p.x, p.y, p.z)].sh, weight);
        }
        sh.irradiance(normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn constant_sh(value: f32) -> ShCoefficients {
        let mut sh = ShCoefficients::default();
        // irradiance of a constant environment L is pi * L
        sh.coeffs[0] = Vec3::splat(value * 2.0 * std::f32::consts::PI.sqrt());
        sh
    }

    #[test]
    fn test_probe_record_sizes() {
        assert_eq!(HEADER_SIZE, 52);
        assert_eq!(PROBE_SIZE, 136);
    }

    #[rstest]
    #[case(UVec3::new(2, 3, 4))]
    #[case(UVec3::new(1, 1, 1))]
    #[case(UVec3::new(5, 1, 3))]
    fn test_probe_index_is_unique_and_in_range(#[case] dims: UVec3) {
        let volume = IrradianceVolume::new(Vec3::ZERO, Vec3::splat(10.0), dims);
        let count = volume.probe_count();
        let mut seen = vec![false; count];
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let i = volume.probe_index(x, y, z);
                    assert_eq!(i as u32, x + y * dims.x + z * dims.x * dims.y);
                    assert!(i < count);
                    assert!(!seen[i]);
                    seen[i] = true;
                    assert_eq!(volume.lattice(i), UVec3::new(x, y, z));
                }
            }
        }
    }

    #[test]
    fn test_probes_span_the_box() {
        let volume = IrradianceVolume::new(
            Vec3::new(-10.0, 0.0, -10.0),
            Vec3::new(10.0, 20.0, 10.0),
            UVec3::new(3, 2, 5),
        );
        assert_eq!(volume.probes.len(), 30);
        assert_eq!(volume.probes[0].position, Vec3::new(-10.0, 0.0, -10.0));
        assert_eq!(volume.probes[29].position, Vec3::new(10.0, 20.0, 10.0));
        assert_eq!(volume.delta, Vec3::new(10.0, 20.0, 5.0));
    }

    #[test]
    fn test_round_trip_through_file() {
        let mut volume = IrradianceVolume::new(Vec3::ZERO, Vec3::splat(4.0), UVec3::new(2, 2, 2));
        for (i, probe) in volume.probes.iter_mut().enumerate() {
            probe.sh.coeffs[i % 9] = Vec3::new(i as f32, 0.5, -0.25);
        }
        volume.baked = volume.probes.len();

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("irradiance.bin");
        volume.save(&path).expect("save");
        let loaded = IrradianceVolume::load(&path).expect("load");

        assert_eq!(loaded.header(), volume.header());
        assert!(loaded.is_baked());
        for (a, b) in loaded.probes.iter().zip(&volume.probes) {
            for (ca, cb) in a.sh.coeffs.iter().zip(&b.sh.coeffs) {
                assert!(ca.abs_diff_eq(*cb, 1e-5));
            }
        }
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let volume = IrradianceVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::new(2, 1, 1));
        let bytes = volume.to_bytes();
        assert!(matches!(
            IrradianceVolume::from_bytes(&bytes[..bytes.len() - 1]),
            Err(IrradianceError::Truncated { .. })
        ));
        assert!(matches!(
            IrradianceVolume::from_bytes(&bytes[..10]),
            Err(IrradianceError::Truncated { .. })
        ));
    }

    #[test]
    fn test_inconsistent_header_is_rejected() {
        let volume = IrradianceVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::new(2, 1, 1));
        let mut header = volume.header();
        header.probe_count = 5;
        let mut bytes = bytemuck::bytes_of(&header).to_vec();
        bytes.extend_from_slice(&volume.to_bytes()[HEADER_SIZE..]);
        assert!(matches!(
            IrradianceVolume::from_bytes(&bytes),
            Err(IrradianceError::InvalidHeader(_))
        ));
    }

    #[rstest]
    #[case(Vec3::splat(1e5), 2)]
    #[case(Vec3::splat(1e10), 8)]
    #[case(Vec3::new(65536.0, 65536.0, 1.0), i32::MAX)]
    fn test_oversized_grid_is_rejected(#[case] dims: Vec3, #[case] probe_count: i32) {
        let volume = IrradianceVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::new(2, 1, 1));
        let mut header = volume.header();
        header.dims = dims;
        header.probe_count = probe_count;
        let mut bytes = bytemuck::bytes_of(&header).to_vec();
        bytes.extend_from_slice(&volume.to_bytes()[HEADER_SIZE..]);
        assert!(matches!(
            IrradianceVolume::from_bytes(&bytes),
            Err(IrradianceError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            IrradianceVolume::load(dir.path().join("missing.bin")),
            Err(IrradianceError::Io(_))
        ));
    }

    #[test]
    fn test_trilinear_sample_blends_neighbours() {
        let mut volume = IrradianceVolume::new(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), UVec3::new(2, 1, 1));
        volume.probes[0].sh = constant_sh(0.0);
        volume.probes[1].sh = constant_sh(1.0);

        let halfway = volume.sample(Vec3::new(1.0, 0.0, 0.0), Vec3::Y, true);
        assert_relative_eq!(halfway.x, 0.5 * std::f32::consts::PI, epsilon = 1e-4);
        let nearest = volume.sample(Vec3::new(1.4, 0.0, 0.0), Vec3::Y, false);
        assert_relative_eq!(nearest.x, std::f32::consts::PI, epsilon = 1e-4);
        // outside the box clamps to the edge probe
        let outside = volume.sample(Vec3::new(-5.0, 3.0, 0.0), Vec3::Y, true);
        assert_relative_eq!(outside.x, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_lookup_texture_layout() {
        let mut volume = IrradianceVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::new(3, 1, 1));
        volume.probes[1].sh.coeffs[2] = Vec3::new(7.0, 8.0, 9.0);
        let pixels = volume.lookup_pixels();
        assert_eq!(pixels.len(), 3 * 9 * 4);
        let offset = (9 + 2) * 4;
        assert_eq!(&pixels[offset..offset + 4], &[7.0, 8.0, 9.0, 1.0]);

        let mut device = DummyBackend::new(8, 8);
        let first = volume.upload_lookup(&mut device).expect("upload");
        let second = volume.upload_lookup(&mut device).expect("upload");
        assert_ne!(first, second);
        assert_eq!(volume.lookup, Some(second));
    }
}
