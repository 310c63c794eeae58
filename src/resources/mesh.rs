//! Mesh data structures and generation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::backend::types::Vertex;
use crate::resources::BoundingBox;
use glam::{Vec2, Vec3, Vec4};

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

/// A mesh with vertex and index data.
///
/// `id` identifies the GPU copy a backend uploads on first draw; meshes are
/// treated as immutable once drawn.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub id: u64,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
    bounds: BoundingBox,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            id: NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed),
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
            bounds: BoundingBox::default(),
        }
    }

    /// Build from raw data, computing the local bounding box
    pub fn from_data(name: &str, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let mut mesh = Mesh::new(name);
        mesh.vertices = vertices;
        mesh.indices = indices;
        mesh.update_bounds();
        mesh
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Local-space bounding box
    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }

    pub fn update_bounds(&mut self) {
        self.bounds = BoundingBox::from_points(self.vertices.iter().map(|v| v.position));
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Two triangles covering clip space, uv (0,0) at the top-left
    pub fn quad() -> Self {
        let corners = [
            (Vec3::new(-1.0, -1.0, 0.0), Vec2::new(0.0, 1.0)),
            (Vec3::new(1.0, -1.0, 0.0), Vec2::new(1.0, 1.0)),
            (Vec3::new(1.0, 1.0, 0.0), Vec2::new(1.0, 0.0)),
            (Vec3::new(-1.0, 1.0, 0.0), Vec2::new(0.0, 0.0)),
        ];
        let vertices = corners
            .into_iter()
            .map(|(position, uv)| Vertex {
                position,
                normal: Vec3::Z,
                uv,
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            })
            .collect();
        Mesh::from_data("quad", vertices, vec![0, 1, 2, 0, 2, 3])
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, right) in faces {
            let up = normal.cross(right);
            let base = vertices.len() as u32;
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (x, y) in corners {
                vertices.push(Vertex {
                    position: (normal + right * x + up * y) * 0.5,
                    normal,
                    uv: Vec2::new((x + 1.0) * 0.5, (1.0 - y) * 0.5),
                    tangent: right.extend(1.0),
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Mesh::from_data("cube", vertices, indices)
    }

    /// Create a UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        let mut vertices = Vec::new();
        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos()).normalize();
                vertices.push(Vertex {
                    position: Vec3::new(x * 0.5, y * 0.5, z * 0.5),
                    normal: Vec3::new(x, y, z).normalize_or_zero(),
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                    tangent: tangent.extend(1.0),
                });
            }
        }

        let mut indices = Vec::new();
        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        Mesh::from_data("sphere", vertices, indices)
    }

    /// Create a plane on the XZ axis
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.max(1);
        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        let mut vertices = Vec::new();
        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                vertices.push(Vertex {
                    position: Vec3::new(
                        -half_width + x as f32 * step_x,
                        0.0,
                        -half_depth + z as f32 * step_z,
                    ),
                    normal: Vec3::Y,
                    uv: Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        let mut indices = Vec::new();
        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        Mesh::from_data("plane", vertices, indices)
    }
}

/// Shared helper meshes used by fullscreen, light-volume and debug draws
#[derive(Debug)]
pub struct Primitives {
    pub quad: Mesh,
    pub cube: Mesh,
    /// Unit-diameter sphere
    pub sphere: Mesh,
}

/// Process-wide primitives, built on first use
pub fn primitives() -> &'static Primitives {
    static PRIMITIVES: OnceLock<Primitives> = OnceLock::new();
    PRIMITIVES.get_or_init(|| Primitives {
        quad: Mesh::quad(),
        cube: Mesh::cube(),
        sphere: Mesh::sphere(24, 16),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_bounds() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        let bounds = cube.bounding_box();
        assert!(bounds.center.length() < 1e-6);
        assert!((bounds.half_size - Vec3::splat(0.5)).length() < 1e-6);
    }

    #[test]
    fn test_cube_faces_point_outwards() {
        let cube = Mesh::cube();
        for v in &cube.vertices {
            assert!(v.position.dot(v.normal) > 0.0);
        }
    }

    #[test]
    fn test_meshes_get_distinct_ids() {
        let a = Mesh::quad();
        let b = Mesh::quad();
        assert_ne!(a.id, b.id);
        assert_eq!(a.clone().id, a.id);
    }

    #[test]
    fn test_sphere_radius() {
        let sphere = Mesh::sphere(16, 8);
        for v in &sphere.vertices {
            assert!((v.position.length() - 0.5).abs() < 1e-5);
        }
    }
}
