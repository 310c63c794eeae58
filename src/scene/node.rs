//! Prefab node hierarchy

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};

use crate::resources::{BoundingBox, Material, Mesh};

/// One node of a prefab tree. A node without mesh and material only carries a transform.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub visible: bool,
    /// Transform relative to the parent
    pub transform: Mat4,
    pub mesh: Option<Arc<Mesh>>,
    pub material: Option<Arc<Material>>,
    pub children: Vec<Node>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            name: String::new(),
            visible: true,
            transform: Mat4::IDENTITY,
            mesh: None,
            material: None,
            children: Vec::new(),
        }
    }
}

/// A node that has something to draw, with its world placement
#[derive(Debug, Clone, Copy)]
pub struct DrawCandidate<'a> {
    pub model: Mat4,
    pub mesh: &'a Arc<Mesh>,
    pub material: &'a Arc<Material>,
    pub world_bounds: BoundingBox,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_mesh(mut self, mesh: Arc<Mesh>, material: Arc<Material>) -> Self {
        self.mesh = Some(mesh);
        self.material = Some(material);
        self
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_translation(self, translation: Vec3) -> Self {
        self.with_transform(Mat4::from_translation(translation))
    }

    pub fn with_trs(self, translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        self.with_transform(Mat4::from_scale_rotation_translation(scale, rotation, translation))
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first walk yielding every drawable node under `parent`.
    /// Invisible nodes are skipped with their whole subtree.
    pub fn walk<'a>(&'a self, parent: Mat4, visit: &mut impl FnMut(DrawCandidate<'a>)) {
        if !self.visible {
            return;
        }
        let model = parent * self.transform;
        if let (Some(mesh), Some(material)) = (&self.mesh, &self.material) {
            visit(DrawCandidate {
                model,
                mesh,
                material,
                world_bounds: mesh.bounding_box().transformed(&model),
            });
        }
        for child in &self.children {
            child.walk(model, visit);
        }
    }

    pub fn candidates(&self, parent: Mat4) -> Vec<DrawCandidate<'_>> {
        let mut out = Vec::new();
        self.walk(parent, &mut |c| out.push(c));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawable(name: &str) -> Node {
        Node::new(name).with_mesh(Arc::new(Mesh::cube()), Arc::new(Material::default()))
    }

    #[test]
    fn test_transform_carrier_passes_transform_down() {
        let root = Node::new("root")
            .with_translation(Vec3::new(1.0, 0.0, 0.0))
            .with_child(drawable("child").with_translation(Vec3::new(0.0, 2.0, 0.0)));
        let found = root.candidates(Mat4::IDENTITY);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].world_bounds.center, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_invisible_subtree_is_skipped() {
        let mut hidden = drawable("hidden").with_child(drawable("grandchild"));
        hidden.visible = false;
        let root = drawable("root").with_child(hidden).with_child(drawable("shown"));
        let names: Vec<_> = root
            .candidates(Mat4::IDENTITY)
            .iter()
            .map(|c| c.mesh.name.clone())
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_mesh_without_material_is_not_drawable() {
        let mut node = Node::new("mesh only");
        node.mesh = Some(Arc::new(Mesh::cube()));
        assert!(node.candidates(Mat4::IDENTITY).is_empty());
    }
}
