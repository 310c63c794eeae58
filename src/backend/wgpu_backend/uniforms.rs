//! CPU-side uniform block packing
//!
//! Programs declare their uniforms as an ordered list; the block is laid
//! out with WGSL uniform address space alignment so a matching `struct`
//! in the shader reads the same bytes.

use std::collections::HashMap;

use crate::backend::types::{UniformKind, UniformValue};

#[derive(Debug, Clone, Copy)]
struct Field {
    offset: u32,
    kind: UniformKind,
}

/// Packed uniform storage for one program
#[derive(Debug, Clone)]
pub struct UniformBlock {
    fields: HashMap<String, Field>,
    data: Vec<u8>,
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl UniformBlock {
    pub fn new(uniforms: &[(String, UniformKind)]) -> Self {
        let mut fields = HashMap::new();
        let mut offset = 0;
        for (name, kind) in uniforms {
            let (align, size) = kind.align_size();
            offset = align_to(offset, align);
            fields.insert(name.clone(), Field { offset, kind: *kind });
            offset += size;
        }
        let size = if uniforms.is_empty() { 0 } else { align_to(offset, 16) };
        Self {
            fields,
            data: vec![0; size as usize],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn offset_of(&self, name: &str) -> Option<u32> {
        self.fields.get(name).map(|f| f.offset)
    }

    /// Write `value` into the slot for `name`. Returns false when the
    /// program does not declare `name` or the value does not fit the slot.
    pub fn set(&mut self, name: &str, value: &UniformValue) -> bool {
        let Some(field) = self.fields.get(name).copied() else {
            return false;
        };
        let offset = field.offset as usize;
        match (field.kind, value) {
            (UniformKind::Float, UniformValue::Float(v)) => self.write(offset, &[*v]),
            (UniformKind::Int, UniformValue::Int(v)) => self.write_i32(offset, &[*v]),
            (UniformKind::Vec2, UniformValue::Vec2(v)) => self.write(offset, &v.to_array()),
            (UniformKind::Vec3, UniformValue::Vec3(v)) => self.write(offset, &v.to_array()),
            (UniformKind::Vec4, UniformValue::Vec4(v)) => self.write(offset, &v.to_array()),
            (UniformKind::Mat4, UniformValue::Mat4(m)) => self.write(offset, &m.to_cols_array()),
            (UniformKind::Array(n), value) => self.write_array(offset, n as usize, value),
            _ => false,
        }
    }

    fn write(&mut self, offset: usize, values: &[f32]) -> bool {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        true
    }

    fn write_i32(&mut self, offset: usize, values: &[i32]) -> bool {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        true
    }

    fn write_array(&mut self, offset: usize, capacity: usize, value: &UniformValue) -> bool {
        match value {
            UniformValue::FloatArray(values) => {
                for (i, v) in values.iter().take(capacity).enumerate() {
                    self.write(offset + i * 16, &[*v]);
                }
            }
            UniformValue::IntArray(values) => {
                for (i, v) in values.iter().take(capacity).enumerate() {
                    self.write_i32(offset + i * 16, &[*v]);
                }
            }
            UniformValue::Vec3Array(values) => {
                for (i, v) in values.iter().take(capacity).enumerate() {
                    self.write(offset + i * 16, &v.to_array());
                }
            }
            UniformValue::Vec4Array(values) => {
                for (i, v) in values.iter().take(capacity).enumerate() {
                    self.write(offset + i * 16, &v.to_array());
                }
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    fn block() -> UniformBlock {
        UniformBlock::new(&[
            ("u_intensity".to_string(), UniformKind::Float),
            ("u_color".to_string(), UniformKind::Vec3),
            ("u_type".to_string(), UniformKind::Int),
            ("u_model".to_string(), UniformKind::Mat4),
            ("u_points".to_string(), UniformKind::Array(4)),
        ])
    }

    #[test]
    fn test_layout_follows_wgsl_alignment() {
        let block = block();
        assert_eq!(block.offset_of("u_intensity"), Some(0));
        assert_eq!(block.offset_of("u_color"), Some(16));
        // an i32 may share the vec3's trailing four bytes
        assert_eq!(block.offset_of("u_type"), Some(28));
        assert_eq!(block.offset_of("u_model"), Some(32));
        assert_eq!(block.offset_of("u_points"), Some(96));
        assert_eq!(block.bytes().len(), 160);
    }

    #[test]
    fn test_set_writes_bytes_at_offset() {
        let mut block = block();
        assert!(block.set("u_color", &UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0))));
        let floats: &[f32] = bytemuck::cast_slice(&block.bytes()[16..28]);
        assert_eq!(floats, &[1.0, 2.0, 3.0]);

        assert!(block.set("u_model", &UniformValue::Mat4(Mat4::IDENTITY)));
        let m: &[f32] = bytemuck::cast_slice(&block.bytes()[32..96]);
        assert_eq!(m[0], 1.0);
        assert_eq!(m[5], 1.0);
    }

    #[test]
    fn test_unknown_or_mismatched_uniform_is_ignored() {
        let mut block = block();
        assert!(!block.set("u_missing", &UniformValue::Float(1.0)));
        assert!(!block.set("u_color", &UniformValue::Float(1.0)));
    }

    #[test]
    fn test_arrays_are_truncated_to_capacity() {
        let mut block = block();
        let values: Vec<f32> = (0..10).map(|i| i as f32).collect();
        assert!(block.set("u_points", &UniformValue::FloatArray(values)));
        let slots: &[f32] = bytemuck::cast_slice(&block.bytes()[96..160]);
        assert_eq!(slots[0], 0.0);
        assert_eq!(slots[4], 1.0);
        assert_eq!(slots[12], 3.0);
    }

    #[test]
    fn test_empty_block() {
        let block = UniformBlock::new(&[]);
        assert!(block.is_empty());
    }
}
