//! Second-order spherical harmonics
//!
//! Nine RGB coefficients per probe. Projection integrates six cube-face
//! captures weighted by each texel's solid angle.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use image::Rgba32FImage;

use crate::scene::CUBE_FACES;

pub const SH_COEFFICIENTS: usize = 9;

/// Cosine-lobe convolution per band: pi, 2pi/3, pi/4
const BAND_WEIGHTS: [f32; 3] = [
    std::f32::consts::PI,
    2.0 * std::f32::consts::PI / 3.0,
    std::f32::consts::PI / 4.0,
];

/// Real SH basis up to l = 2, evaluated for a unit direction
pub fn basis(dir: Vec3) -> [f32; SH_COEFFICIENTS] {
    let Vec3 { x, y, z } = dir;
    [
        0.282_095,
        0.488_603 * y,
        0.488_603 * z,
        0.488_603 * x,
        1.092_548 * x * y,
        1.092_548 * y * z,
        0.315_392 * (3.0 * z * z - 1.0),
        1.092_548 * x * z,
        0.546_274 * (x * x - y * y),
    ]
}

fn band(index: usize) -> usize {
    match index {
        0 => 0,
        1..=3 => 1,
        _ => 2,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ShCoefficients {
    pub coeffs: [Vec3; SH_COEFFICIENTS],
}

impl ShCoefficients {
    /// Radiance encoded along `dir`
    pub fn evaluate(&self, dir: Vec3) -> Vec3 {
        basis(dir.normalize_or_zero())
            .iter()
            .zip(&self.coeffs)
            .map(|(y, c)| *c * *y)
            .sum()
    }

    /// Diffuse irradiance arriving at a surface with normal `normal`
    pub fn irradiance(&self, normal: Vec3) -> Vec3 {
        basis(normal.normalize_or_zero())
            .iter()
            .zip(&self.coeffs)
            .enumerate()
            .map(|(i, (y, c))| *c * *y * BAND_WEIGHTS[band(i)])
            .sum()
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            coeffs: self.coeffs.map(|c| c * factor),
        }
    }

    pub fn add_scaled(&mut self, other: &Self, factor: f32) {
        for (a, b) in self.coeffs.iter_mut().zip(&other.coeffs) {
            *a += *b * factor;
        }
    }

    /// Coefficients as 27 floats, RGB per coefficient
    pub fn to_floats(&self) -> [f32; SH_COEFFICIENTS * 3] {
        let mut out = [0.0; SH_COEFFICIENTS * 3];
        for (i, c) in self.coeffs.iter().enumerate() {
            out[i * 3..i * 3 + 3].copy_from_slice(&c.to_array());
        }
        out
    }
}

/// World direction through texel (x, y) of cube face `face` of size `size`
pub fn texel_direction(face: usize, x: u32, y: u32, size: u32) -> Vec3 {
    let f = &CUBE_FACES[face];
    let right = f.front.cross(f.up);
    let n = size.max(1) as f32;
    let u = 2.0 * (x as f32 + 0.5) / n - 1.0;
    let v = 1.0 - 2.0 * (y as f32 + 0.5) / n;
    (f.front + right * u + f.up * v).normalize()
}

/// Differential solid angle of a texel at face coordinates (u, v)
fn texel_solid_angle(u: f32, v: f32, size: u32) -> f32 {
    let texel_area = 4.0 / (size.max(1) as f32).powi(2);
    texel_area / (1.0 + u * u + v * v).powf(1.5)
}

/// Project six face captures (ordered as `CUBE_FACES`) onto the SH basis.
///
/// Faces must be square and equally sized; extra or missing faces are ignored.
pub fn project_cubemap(faces: &[Rgba32FImage]) -> ShCoefficients {
    let mut sh = ShCoefficients::default();
    let mut total_weight = 0.0f32;

    for (face, image) in faces.iter().enumerate().take(CUBE_FACES.len()) {
        let size = image.width();
        let n = size.max(1) as f32;
        for (x, y, pixel) in image.enumerate_pixels() {
            let u = 2.0 * (x as f32 + 0.5) / n - 1.0;
            let v = 1.0 - 2.0 * (y as f32 + 0.5) / n;
            let weight = texel_solid_angle(u, v, size);
            let dir = texel_direction(face, x, y, size);
            let color = Vec3::new(pixel[0], pixel[1], pixel[2]);
            for (c, b) in sh.coeffs.iter_mut().zip(basis(dir)) {
                *c += color * (b * weight);
            }
            total_weight += weight;
        }
    }

    if total_weight > 0.0 {
        sh = sh.scaled(4.0 * std::f32::consts::PI / total_weight);
    }
    sh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgba;

    fn uniform_faces(color: [f32; 3], size: u32) -> Vec<Rgba32FImage> {
        (0..6)
            .map(|_| Rgba32FImage::from_pixel(size, size, Rgba([color[0], color[1], color[2], 1.0])))
            .collect()
    }

    #[test]
    fn test_uniform_environment_gives_pi_irradiance() {
        let sh = project_cubemap(&uniform_faces([1.0, 0.5, 0.0], 16));
        for normal in [Vec3::X, Vec3::NEG_Y, Vec3::new(1.0, 1.0, 1.0)] {
            let e = sh.irradiance(normal);
            assert_relative_eq!(e.x, std::f32::consts::PI, epsilon = 1e-3);
            assert_relative_eq!(e.y, std::f32::consts::PI * 0.5, epsilon = 1e-3);
            assert_relative_eq!(e.z, 0.0, epsilon = 1e-4);
        }
        assert_relative_eq!(sh.evaluate(Vec3::Z).x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_bright_face_dominates_its_direction() {
        let mut faces = uniform_faces([0.0, 0.0, 0.0], 8);
        // +Y face only
        faces[2] = Rgba32FImage::from_pixel(8, 8, Rgba([1.0, 1.0, 1.0, 1.0]));
        let sh = project_cubemap(&faces);
        assert!(sh.irradiance(Vec3::Y).x > sh.irradiance(Vec3::NEG_Y).x);
        assert!(sh.irradiance(Vec3::Y).x > sh.irradiance(Vec3::X).x);
    }

    #[test]
    fn test_face_centers_point_along_face_front() {
        for (i, face) in CUBE_FACES.iter().enumerate() {
            let dir = texel_direction(i, 0, 0, 1);
            assert_relative_eq!(dir.dot(face.front), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_float_layout() {
        let mut sh = ShCoefficients::default();
        sh.coeffs[1] = Vec3::new(1.0, 2.0, 3.0);
        let floats = sh.to_floats();
        assert_eq!(&floats[3..6], &[1.0, 2.0, 3.0]);
        assert_eq!(std::mem::size_of::<ShCoefficients>(), 108);
    }
}
