//! Asset-side resources the renderer reads
//!
//! Meshes, materials and bounding boxes.

mod bounds;
mod material;
mod mesh;

pub use bounds::*;
pub use material::*;
pub use mesh::*;
