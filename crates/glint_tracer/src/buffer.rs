//! GPU data buffers.
//!
//! The shading program has no generic buffer reads, so every flat array it
//! needs (mesh positions, triangle indices, BVH nodes) is packed into an
//! RGBA8 texture, one scalar per texel, and read back through a generated
//! `sampleTexBuf{id}` function.
//!
//! Encodings use three base-255 digits in `r`, `g`, `b` with `a = 255`:
//!
//! | kind    | digits of               | range                  |
//! |---------|-------------------------|------------------------|
//! | index   | `v`                     | `0 ..= 255³-1`         |
//! | int     | `v + INT_BIAS`          | about `±8.29e6`        |
//! | float   | `(v + FLOAT_BIAS)·65025`| `-127 .. 128`, step `1/65025` |

use glam::{UVec2, Vec3};

pub const FLOAT_BIAS: f64 = 127.0;
pub const INT_BIAS: f64 = 8_290_687.0;

/// Largest texel count one band may address.
pub const SAMPLE_BUDGET: u32 = 32768;

const DIGIT: f64 = 255.0;
const MAX_INDEX: f64 = DIGIT * DIGIT * DIGIT - 1.0;
const PADDING: [u8; 4] = [0, 0, 0, 255];

/// Element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Index,
    Int,
    Float,
    Vec2,
    Vec3,
}

impl ElementKind {
    /// Texels per logical element.
    pub fn arity(self) -> u32 {
        match self {
            ElementKind::Vec2 => 2,
            ElementKind::Vec3 => 3,
            _ => 1,
        }
    }

    pub fn wgsl_type(self) -> &'static str {
        match self {
            ElementKind::Index | ElementKind::Int => "i32",
            ElementKind::Float => "f32",
            ElementKind::Vec2 => "vec2<f32>",
            ElementKind::Vec3 => "vec3<f32>",
        }
    }

    pub fn zero_literal(self) -> &'static str {
        match self {
            ElementKind::Index | ElementKind::Int => "0",
            ElementKind::Float => "0.0",
            ElementKind::Vec2 => "vec2<f32>(0.0)",
            ElementKind::Vec3 => "vec3<f32>(0.0)",
        }
    }

    fn decoder(self) -> &'static str {
        match self {
            ElementKind::Index => "decodeIndex",
            ElementKind::Int => "decodeInt",
            _ => "decodeFloat",
        }
    }

    pub fn encode(self, v: f32) -> [u8; 4] {
        match self {
            ElementKind::Index => digits((v as f64).round().clamp(0.0, MAX_INDEX)),
            ElementKind::Int => digits(((v as f64).round() + INT_BIAS).clamp(0.0, MAX_INDEX)),
            _ => {
                let x = ((v as f64 + FLOAT_BIAS) * DIGIT * DIGIT).clamp(0.0, MAX_INDEX);
                digits(x.floor())
            }
        }
    }

    /// Host mirror of the generated decode functions.
    pub fn decode(self, texel: [u8; 4]) -> f32 {
        let [r, g, b, _] = texel.map(f64::from);
        match self {
            ElementKind::Index => (r + g * DIGIT + b * DIGIT * DIGIT) as f32,
            ElementKind::Int => (r + g * DIGIT + b * DIGIT * DIGIT - INT_BIAS) as f32,
            _ => (r / (DIGIT * DIGIT) + g / DIGIT + b - FLOAT_BIAS) as f32,
        }
    }
}

fn digits(x: f64) -> [u8; 4] {
    let x = x as u64;
    [
        (x % 255) as u8,
        (x / 255 % 255) as u8,
        (x / 65025 % 255) as u8,
        255,
    ]
}

/// 2D placement of a buffer's texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferLayout {
    pub width: u32,
    pub height: u32,
    /// Rows per band, 0 when the buffer is not banded.
    pub band_rows: u32,
}

impl BufferLayout {
    pub fn compute(len: usize, kind: ElementKind, group: u32) -> Self {
        if len == 0 {
            return Self::default();
        }
        let arity = kind.arity() as usize;
        let target = if len > 100 {
            ((len as f64).sqrt() * 6.0 / 5.0).floor() as usize
        } else {
            100
        };
        let target = (target / arity * arity).max(arity);
        let width = len.min(target) as u32;
        let height = len.div_ceil(width as usize) as u32;

        let record = kind.arity() * group;
        let rows = SAMPLE_BUDGET / record / width;
        let band_rows = if record != 1 && rows > 0 && len as u64 >= (rows * width) as u64 {
            rows
        } else {
            0
        };
        Self {
            width,
            height,
            band_rows,
        }
    }

    pub fn is_banded(&self) -> bool {
        self.band_rows > 0
    }

    pub fn texel_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Texel holding `component` of element `offset` in record `index`.
    pub fn texel(&self, kind: ElementKind, group: u32, index: u32, offset: u32, component: u32) -> UVec2 {
        let arity = kind.arity();
        let (index, dy) = if self.is_banded() {
            let band = self.band_rows * self.width;
            let c = index / band;
            (index - c * band, c * self.band_rows * arity * group)
        } else {
            (index, 0)
        };
        let linear = (index * group + offset) * arity + component;
        UVec2::new(linear % self.width, linear / self.width + dy)
    }
}

/// A flat numeric array exposed to the shading program as a texture.
#[derive(Debug, Clone)]
pub struct GpuBuffer {
    id: u32,
    label: String,
    kind: ElementKind,
    group: u32,
    values: Vec<f32>,
    layout: BufferLayout,
    texels: Vec<[u8; 4]>,
}

impl GpuBuffer {
    /// An empty buffer. `group` is the number of elements per record.
    pub fn new(id: u32, label: impl Into<String>, kind: ElementKind, group: u32) -> Self {
        Self {
            id,
            label: label.into(),
            kind,
            group: group.max(1),
            values: Vec::new(),
            layout: BufferLayout::default(),
            texels: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of whole records.
    pub fn records(&self) -> usize {
        self.values.len() / (self.kind.arity() * self.group) as usize
    }

    /// Replace the contents and recompute the layout.
    ///
    /// A fill containing NaN is dropped and the previous contents stay in
    /// place; the return value reports whether the fill was applied.
    pub fn fill_data(&mut self, values: &[f32]) -> bool {
        if values.iter().any(|v| v.is_nan()) {
            log::warn!(
                "Buffer '{}' ({}): fill of {} values contains NaN, keeping previous contents",
                self.label,
                self.id,
                values.len()
            );
            return false;
        }
        self.values = values.to_vec();
        self.layout = BufferLayout::compute(values.len(), self.kind, self.group);
        self.texels = values.iter().map(|&v| self.kind.encode(v)).collect();
        self.texels.resize(self.layout.texel_count(), PADDING);
        true
    }

    /// Re-encode another buffer's values under this buffer's own kind.
    pub fn copy_data(&mut self, other: &GpuBuffer) -> bool {
        self.fill_data(&other.values)
    }

    /// RGBA8 bytes, row-major, `layout.width` texels per row.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Decode element `offset` of record `index` from the encoded texels,
    /// exactly as the generated sampling function does. Scalars land in
    /// `x`, 2-vectors in `xy`.
    pub fn decode_host(&self, index: u32, offset: u32) -> Vec3 {
        let mut out = Vec3::ZERO;
        if self.is_empty() {
            return out;
        }
        for c in 0..self.kind.arity() {
            let at = self.layout.texel(self.kind, self.group, index, offset, c);
            let texel = self
                .texels
                .get((at.y * self.layout.width + at.x) as usize)
                .copied()
                .unwrap_or(PADDING);
            out[c as usize] = self.kind.decode(texel);
        }
        out
    }

    /// Decoded index element; negative or empty reads give 0.
    pub fn decode_index(&self, index: u32, offset: u32) -> u32 {
        self.decode_host(index, offset).x.max(0.0) as u32
    }

    pub fn texture_name(&self) -> String {
        format!("texBuf{}", self.id)
    }

    pub fn function_name(&self) -> String {
        format!("sampleTexBuf{}", self.id)
    }

    /// Texture declaration for a bind slot; `None` for an empty buffer.
    pub fn wgsl_binding(&self, slot: u32) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!(
            "@group(1) @binding({slot}) var {}: texture_2d<f32>;",
            self.texture_name()
        ))
    }

    /// `sampleTexBuf{id}(index, offset)` decoding one element.
    pub fn wgsl_function(&self) -> String {
        let name = self.function_name();
        let ty = self.kind.wgsl_type();
        if self.is_empty() {
            return format!(
                "fn {name}(index: i32, offset: i32) -> {ty} {{\n    return {};\n}}",
                self.kind.zero_literal()
            );
        }

        let BufferLayout {
            width,
            height,
            band_rows,
        } = self.layout;
        let arity = self.kind.arity();
        let mut body = String::new();
        if self.layout.is_banded() {
            let band = band_rows * width;
            body.push_str(&format!(
                "    let band = index / {band};\n    let dy = band * {};\n    let i = index - band * {band};\n",
                band_rows * arity * self.group
            ));
        } else {
            body.push_str("    let dy = 0;\n    let i = index;\n");
        }
        body.push_str(&format!("    let base = (i * {} + offset) * {arity};\n", self.group));

        let size = format!("vec2<i32>({width}, {height})");
        let texture = self.texture_name();
        let decoder = self.kind.decoder();
        let parts: Vec<String> = (0..arity)
            .map(|c| {
                let linear = if c == 0 { "base".to_string() } else { format!("base + {c}") };
                format!("{decoder}(bufTexel({texture}, {linear}, dy, {size}))")
            })
            .collect();
        let value = if arity == 1 {
            parts[0].clone()
        } else {
            format!("{ty}({})", parts.join(", "))
        };
        format!("fn {name}(index: i32, offset: i32) -> {ty} {{\n{body}    return {value};\n}}")
    }

    /// Call expression sampling this buffer.
    pub fn sample(&self, index: &str, offset: u32) -> String {
        format!("{}({index}, {offset})", self.function_name())
    }
}

/// Float tolerance of the fixed-point encoding, including host rounding.
pub const FLOAT_EPSILON: f32 = 1.0 / 65025.0 + 1.0e-5;

impl std::fmt::Display for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} #{}: {} {:?} x{} -> {}x{}{}",
            self.label,
            self.id,
            self.len(),
            self.kind,
            self.group,
            self.layout.width,
            self.layout.height,
            if self.layout.is_banded() { " banded" } else { "" }
        )
    }
}
