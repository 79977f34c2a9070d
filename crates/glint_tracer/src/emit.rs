//! Shader-text emission primitives.
//!
//! Everything the synthesizer writes goes through these helpers: literal
//! formatting, per-object identifier namespaces, id allocation and the
//! ordered program builder.

use glam::{Vec2, Vec3, Vec4};

/// Value the shading program uses for "no hit".
pub const INFINITY: f32 = 1.0e7;

/// Format a float so WGSL always parses it as floating point.
///
/// Integral values get a trailing `.0`, exponent forms get a mantissa
/// decimal point (`1.0e-6`). Non-finite values clamp to `±INFINITY`, NaN
/// becomes `0.0`.
pub fn float(v: f32) -> String {
    if v.is_nan() {
        return "0.0".to_string();
    }
    if v.is_infinite() {
        return float(INFINITY.copysign(v));
    }
    if v.fract() == 0.0 && v.abs() < 1.0e7 {
        return format!("{v:.1}");
    }
    let repr = format!("{v:?}");
    if repr.contains('.') {
        return repr;
    }
    match repr.find('e') {
        Some(e) => format!("{}.0{}", &repr[..e], &repr[e..]),
        None => format!("{repr}.0"),
    }
}

pub fn vec2(v: Vec2) -> String {
    format!("vec2<f32>({}, {})", float(v.x), float(v.y))
}

pub fn vec3(v: Vec3) -> String {
    format!("vec3<f32>({}, {}, {})", float(v.x), float(v.y), float(v.z))
}

pub fn vec4(v: Vec4) -> String {
    format!(
        "vec4<f32>({}, {}, {}, {})",
        float(v.x),
        float(v.y),
        float(v.z),
        float(v.w)
    )
}

/// Identifier namespace `<role><TypeTag><id>` for one scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub tag: &'static str,
    pub id: u32,
}

impl Namespace {
    pub fn new(tag: &'static str, id: u32) -> Self {
        Self { tag, id }
    }

    /// `name("transformInv")` -> `transformInvSphere3`
    pub fn name(&self, role: &str) -> String {
        format!("{role}{}{}", self.tag, self.id)
    }

    /// A field of the shared uniform block, e.g. `u.minSphere3`.
    pub fn uniform(&self, role: &str) -> String {
        format!("u.{}", self.name(role))
    }
}

/// Monotonic id source owned by a scene.
///
/// Objects and lights share one counter; buffers and images each have
/// their own. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    objects: u32,
    buffers: u32,
    images: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&mut self) -> u32 {
        self.objects += 1;
        self.objects
    }

    pub fn buffer(&mut self) -> u32 {
        self.buffers += 1;
        self.buffers
    }

    pub fn image(&mut self) -> u32 {
        self.images += 1;
        self.images
    }
}

/// Program fragments, in the order they appear in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Bindings,
    ObjectFunctions,
    Library,
    Shadow,
    Integrator,
    Entry,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Bindings,
        Section::ObjectFunctions,
        Section::Library,
        Section::Shadow,
        Section::Integrator,
        Section::Entry,
    ];

    pub fn banner(self) -> &'static str {
        match self {
            Section::Bindings => "// ---- bindings ----",
            Section::ObjectFunctions => "// ---- object functions ----",
            Section::Library => "// ---- library ----",
            Section::Shadow => "// ---- shadow ----",
            Section::Integrator => "// ---- integrator ----",
            Section::Entry => "// ---- entry ----",
        }
    }
}

/// Collects fragments in any order and joins them in `Section` order.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    fragments: [Vec<String>; 6],
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, section: Section, code: impl Into<String>) {
        let code = code.into();
        if !code.trim().is_empty() {
            self.fragments[section as usize].push(code);
        }
    }

    pub fn fragment_count(&self, section: Section) -> usize {
        self.fragments[section as usize].len()
    }

    pub fn finish(self) -> String {
        let mut out = String::new();
        for (section, fragments) in Section::ALL.iter().zip(self.fragments) {
            out.push_str(section.banner());
            out.push('\n');
            for fragment in fragments {
                out.push_str(fragment.trim_end());
                out.push_str("\n\n");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_always_has_decimal_point() {
        assert_eq!(float(1.0), "1.0");
        assert_eq!(float(-2.0), "-2.0");
        assert_eq!(float(0.0), "0.0");
        assert_eq!(float(0.25), "0.25");
        assert_eq!(float(1.0e-6), "1.0e-6");
        assert_eq!(float(2.5e-8), "2.5e-8");
        assert_eq!(float(3.0e20), "3.0e20");
        for v in [1.0, 7.0, 1.0e-6, 123456.0, 0.3, -4.0, 6360e3] {
            assert!(float(v).contains('.'), "{v} -> {}", float(v));
        }
    }

    #[test]
    fn test_float_non_finite() {
        assert_eq!(float(f32::NAN), "0.0");
        assert_eq!(float(f32::INFINITY), float(INFINITY));
        assert_eq!(float(f32::NEG_INFINITY), format!("-{}", float(INFINITY)));
    }

    #[test]
    fn test_vector_literals() {
        assert_eq!(vec3(Vec3::new(1.0, -0.5, 2.0)), "vec3<f32>(1.0, -0.5, 2.0)");
        assert_eq!(vec2(Vec2::ZERO), "vec2<f32>(0.0, 0.0)");
    }

    #[test]
    fn test_namespace_names() {
        let ns = Namespace::new("Sphere", 3);
        assert_eq!(ns.name("transformInv"), "transformInvSphere3");
        assert_eq!(ns.uniform("min"), "u.minSphere3");
        assert_ne!(ns.name("t"), Namespace::new("Sphere", 31).name("t"));
    }

    #[test]
    fn test_allocator_counters_are_independent() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.object(), 1);
        assert_eq!(ids.object(), 2);
        assert_eq!(ids.buffer(), 1);
        assert_eq!(ids.image(), 1);
        assert_eq!(ids.object(), 3);
    }

    #[test]
    fn test_sections_joined_in_order() {
        let mut program = ProgramBuilder::new();
        program.push(Section::Entry, "fn fs_main() {}");
        program.push(Section::Library, "fn lib() {}");
        program.push(Section::Bindings, "var<private> a: f32;");
        program.push(Section::Shadow, "   ");
        assert_eq!(program.fragment_count(Section::Shadow), 0);

        let text = program.finish();
        let bindings = text.find("var<private> a").unwrap();
        let library = text.find("fn lib").unwrap();
        let entry = text.find("fn fs_main").unwrap();
        assert!(bindings < library && library < entry);

        let banners: Vec<usize> = Section::ALL
            .iter()
            .map(|s| text.find(s.banner()).unwrap())
            .collect();
        assert!(banners.windows(2).all(|w| w[0] < w[1]));
    }
}
