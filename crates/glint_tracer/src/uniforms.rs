//! The program's single uniform block.
//!
//! Every field is a `vec4<f32>` or `mat4x4<f32>` so offsets are plain
//! running sums of 16 and 64 bytes. Scalars are read as `.x`, 3-vectors as
//! `.xyz`.

use std::collections::HashMap;

use glam::{Mat4, Vec3, Vec4};
use glint_math::CornerRays;

use crate::error::{TracerError, TracerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Vec4,
    Mat4,
}

impl UniformKind {
    pub fn size(self) -> usize {
        match self {
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
        }
    }

    fn wgsl(self) -> &'static str {
        match self {
            UniformKind::Vec4 => "vec4<f32>",
            UniformKind::Mat4 => "mat4x4<f32>",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformField {
    pub name: String,
    pub kind: UniformKind,
    /// Byte offset within the block
    pub offset: usize,
}

/// Ordered field list of the uniform block.
#[derive(Debug, Clone, Default)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    lookup: HashMap<String, usize>,
    size: usize,
}

/// Per-frame fields present in every program, in declaration order.
pub const FRAME_UNIFORMS: [&str; 7] = [
    "eye",
    "ray00",
    "ray01",
    "ray10",
    "ray11",
    "textureWeight",
    "timeSinceStart",
];

impl UniformLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// A layout starting with the per-frame fields.
    pub fn with_frame_fields() -> Self {
        let mut layout = Self::new();
        for name in FRAME_UNIFORMS {
            layout.push(name, UniformKind::Vec4);
        }
        layout
    }

    /// Append a field; a repeated name keeps its first declaration.
    pub fn push(&mut self, name: impl Into<String>, kind: UniformKind) {
        let name = name.into();
        if self.lookup.contains_key(&name) {
            return;
        }
        self.lookup.insert(name.clone(), self.fields.len());
        self.fields.push(UniformField {
            name,
            kind,
            offset: self.size,
        });
        self.size += kind.size();
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.lookup.get(name).map(|&i| &self.fields[i])
    }

    pub fn offset(&self, name: &str) -> Option<usize> {
        self.field(name).map(|f| f.offset)
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    /// Block size in bytes, never zero.
    pub fn size(&self) -> usize {
        self.size.max(16)
    }

    pub fn wgsl_struct(&self) -> String {
        let mut out = String::from("struct Uniforms {\n");
        for field in &self.fields {
            out.push_str(&format!("    {}: {},\n", field.name, field.kind.wgsl()));
        }
        if self.fields.is_empty() {
            out.push_str("    unused: vec4<f32>,\n");
        }
        out.push('}');
        out
    }
}

/// CPU-side contents of the uniform block for one frame.
#[derive(Debug, Clone)]
pub struct UniformBlock<'a> {
    layout: &'a UniformLayout,
    data: Vec<f32>,
}

impl<'a> UniformBlock<'a> {
    pub fn new(layout: &'a UniformLayout) -> Self {
        Self {
            layout,
            data: vec![0.0; layout.size() / 4],
        }
    }

    fn slot(&mut self, name: &str, kind: UniformKind) -> TracerResult<&mut [f32]> {
        let field = self
            .layout
            .field(name)
            .filter(|f| f.kind == kind)
            .ok_or_else(|| TracerError::UnknownUniform(name.to_string()))?;
        let start = field.offset / 4;
        Ok(&mut self.data[start..start + kind.size() / 4])
    }

    pub fn set_vec4(&mut self, name: &str, v: Vec4) -> TracerResult<()> {
        self.slot(name, UniformKind::Vec4)?.copy_from_slice(&v.to_array());
        Ok(())
    }

    pub fn set_vec3(&mut self, name: &str, v: Vec3) -> TracerResult<()> {
        self.set_vec4(name, v.extend(0.0))
    }

    pub fn set_float(&mut self, name: &str, v: f32) -> TracerResult<()> {
        self.set_vec4(name, Vec4::new(v, 0.0, 0.0, 0.0))
    }

    /// Column-major, as WGSL expects.
    pub fn set_mat4(&mut self, name: &str, m: Mat4) -> TracerResult<()> {
        self.slot(name, UniformKind::Mat4)?.copy_from_slice(&m.to_cols_array());
        Ok(())
    }

    pub fn get_vec4(&self, name: &str) -> Option<Vec4> {
        let field = self.layout.field(name)?;
        let start = field.offset / 4;
        Some(Vec4::from_slice(&self.data[start..start + 4]))
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

/// Per-frame values shared by the whole program.
#[derive(Debug, Clone, Copy)]
pub struct FrameUniforms {
    pub rays: CornerRays,
    pub texture_weight: f32,
    pub time_since_start: f32,
}

impl FrameUniforms {
    pub fn write(&self, block: &mut UniformBlock<'_>) -> TracerResult<()> {
        block.set_vec3("eye", self.rays.eye)?;
        block.set_vec3("ray00", self.rays.ray00)?;
        block.set_vec3("ray01", self.rays.ray01)?;
        block.set_vec3("ray10", self.rays.ray10)?;
        block.set_vec3("ray11", self.rays.ray11)?;
        block.set_float("textureWeight", self.texture_weight)?;
        block.set_float("timeSinceStart", self.time_since_start)
    }
}
