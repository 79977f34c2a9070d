//! The scene: object, material and image registries plus the integrator
//! settings shared by every object.
//!
//! Objects are only created and removed through the factory methods here,
//! which thread one [`IdAllocator`] through construction. Two counters
//! track edits: `structure` changes whenever the compiled program would
//! differ, `revision` on every change at all. Drivers restart progressive
//! accumulation when `revision` moves and re-synthesize when `structure`
//! does.

use glam::{Mat4, Vec3};
use glint_core::{Mesh, TerrainMosaic, Texture, VoxelGrid};
use glint_math::{Camera, Ray};

use crate::background::Background;
use crate::buffer::GpuBuffer;
use crate::emit::{IdAllocator, Namespace};
use crate::error::{TracerError, TracerResult};
use crate::light::{intensity_normalization, BoundLight, Light, LightKind};
use crate::material::{Closure, ColorSource, ImageRegistry, Material, MaterialId, ShadeContext};
use crate::objects::{
    Composite, Cone, Cube, Cylinder, MeshShape, SdfShape, Shape, Sphere, TerrainImages, TerrainMap,
    Torus, TracerObject, Volume,
};
use crate::uniforms::{FrameUniforms, UniformBlock, UniformLayout};

pub struct Scene {
    ids: IdAllocator,
    objects: Vec<TracerObject>,
    materials: Vec<Material>,
    images: ImageRegistry,
    pub background: Background,
    pub camera: Camera,
    pub bounces: u32,
    /// Base of the per-bounce light normalization
    pub bounce_light: f32,
    /// Clamp mesh traversal budgets to `floor(log2(vertices) * 16)`
    pub max_depth_cap: bool,
    structure: u64,
    revision: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut scene = Self {
            ids: IdAllocator::new(),
            objects: Vec::new(),
            materials: Vec::new(),
            images: ImageRegistry::new(),
            background: Background::default(),
            camera: Camera::default(),
            bounces: 6,
            bounce_light: 0.5,
            max_depth_cap: false,
            structure: 0,
            revision: 0,
        };
        scene.add_material(Material::default());
        scene
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Record a change that needs a new program.
    pub fn touch_structure(&mut self) {
        self.structure += 1;
        self.touch();
    }

    pub fn structure(&self) -> u64 {
        self.structure
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Restart progressive accumulation without any edit.
    pub fn reset_samples(&mut self) {
        self.touch();
    }

    // ---- registries ----

    /// Register a material; one with the same name returns the existing id.
    pub fn add_material(&mut self, material: Material) -> MaterialId {
        if let Some(id) = self.materials.iter().position(|m| m.name == material.name) {
            return id;
        }
        self.materials.push(material);
        self.touch_structure();
        self.materials.len() - 1
    }

    pub fn material_id(&self, name: &str) -> TracerResult<MaterialId> {
        self.materials
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| TracerError::UnknownMaterial(name.to_string()))
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.touch_structure();
        self.materials.get_mut(id)
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn material_namespace(id: MaterialId) -> Namespace {
        Namespace::new("Material", id as u32 + 1)
    }

    pub fn add_image(&mut self, texture: Texture) -> u32 {
        let id = self.ids.image();
        self.images.insert(id, texture);
        self.touch_structure();
        id
    }

    pub fn images(&self) -> &ImageRegistry {
        &self.images
    }

    // ---- factories ----

    fn insert(&mut self, shape: Shape, material: Option<MaterialId>) -> u32 {
        let id = self.ids.object();
        self.objects.push(TracerObject::new(id, shape, material));
        self.touch_structure();
        id
    }

    pub fn add_sphere(&mut self, center: Vec3, radius: f32, material: MaterialId) -> u32 {
        self.insert(Shape::Sphere(Sphere::new(center, radius)), Some(material))
    }

    pub fn add_cylinder(&mut self, center: Vec3, radius: f32, half_height: f32, material: MaterialId) -> u32 {
        self.insert(Shape::Cylinder(Cylinder::new(center, radius, half_height)), Some(material))
    }

    pub fn add_cone(
        &mut self,
        center: Vec3,
        radius: f32,
        top_radius: f32,
        half_height: f32,
        material: MaterialId,
    ) -> u32 {
        self.insert(
            Shape::Cone(Cone::new(center, radius, top_radius, half_height)),
            Some(material),
        )
    }

    pub fn add_torus(&mut self, center: Vec3, major: f32, minor: f32, material: MaterialId) -> u32 {
        self.insert(Shape::Torus(Torus::new(center, major, minor)), Some(material))
    }

    pub fn add_cube(&mut self, min: Vec3, max: Vec3, material: MaterialId) -> u32 {
        self.insert(Shape::Cube(Cube::new(min, max)), Some(material))
    }

    pub fn add_composite(&mut self, composite: Composite, material: MaterialId) -> u32 {
        self.insert(Shape::Composite(composite), Some(material))
    }

    pub fn add_mesh(&mut self, mesh: Mesh, smooth: bool, cull: bool, material: MaterialId) -> u32 {
        self.insert(Shape::Mesh(MeshShape::new(mesh, smooth, cull)), Some(material))
    }

    pub fn add_sdf(&mut self, sdf: SdfShape, material: MaterialId) -> u32 {
        self.insert(Shape::Sdf(sdf), Some(material))
    }

    /// Register the mosaic's rasters and add a terrain colored from them
    /// unless `material` is given.
    pub fn add_terrain(
        &mut self,
        mosaic: TerrainMosaic,
        elevation: f32,
        scalar: f32,
        material: Option<MaterialId>,
    ) -> u32 {
        let images = TerrainImages {
            color: self.ids.image(),
            elevation: self.ids.image(),
            normal: self.ids.image(),
        };
        let terrain = TerrainMap::new(mosaic, images, elevation, scalar);
        for (id, texture) in terrain.textures() {
            self.images.insert(id, texture.clone());
        }
        let material = material.unwrap_or_else(|| {
            self.add_material(
                Material::new(format!("terrain{}", images.color), Closure::Diffuse, Vec3::ONE)
                    .with_color(ColorSource::Texture(images.color)),
            )
        });
        self.insert(Shape::Terrain(terrain), Some(material))
    }

    pub fn add_volume(&mut self, volume: Volume) -> u32 {
        self.insert(Shape::Volume(volume), None)
    }

    pub fn add_light(&mut self, light: Light) -> u32 {
        self.insert(Shape::Light(light), None)
    }

    pub fn remove(&mut self, id: u32) -> TracerResult<TracerObject> {
        let index = self
            .objects
            .iter()
            .position(|o| o.id() == id)
            .ok_or(TracerError::ObjectNotFound(id))?;
        self.touch_structure();
        Ok(self.objects.remove(index))
    }

    pub fn object(&self, id: u32) -> Option<&TracerObject> {
        self.objects.iter().find(|o| o.id() == id)
    }

    /// Mutable access for edits; restarts accumulation.
    pub fn object_mut(&mut self, id: u32) -> Option<&mut TracerObject> {
        self.touch();
        self.objects.iter_mut().find(|o| o.id() == id)
    }

    /// Objects in creation order.
    pub fn objects(&self) -> &[TracerObject] {
        &self.objects
    }

    /// Objects largest world box first, so big occluders are tested early.
    pub fn ordered_objects(&self) -> Vec<&TracerObject> {
        let mut ordered: Vec<&TracerObject> = self.objects.iter().collect();
        ordered.sort_by(|a, b| b.area().total_cmp(&a.area()));
        ordered
    }

    pub fn object_material(&self, object: &TracerObject) -> Option<&Material> {
        object.material.and_then(|id| self.materials.get(id))
    }

    /// Nearest object whose world box the ray enters in front of `origin`.
    pub fn pick(&self, origin: Vec3, dir: Vec3) -> Option<u32> {
        let ray = Ray::new(origin, dir);
        self.objects
            .iter()
            .filter(|o| !o.shape.is_light())
            .filter_map(|o| o.pick(&ray).map(|t| (t, o.id())))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }

    // ---- lights ----

    /// Lights in creation order with their drag previews applied.
    pub fn lights(&self) -> Vec<BoundLight> {
        self.objects
            .iter()
            .filter_map(|o| o.light().map(|l| BoundLight::new(o.namespace(), l)))
            .collect()
    }

    /// Intensity after bounce normalization, before atmospheric filtering.
    pub fn normalized_intensity(&self, light: &Light) -> Vec3 {
        light.intensity / intensity_normalization(self.bounces, self.bounce_light)
    }

    /// Sun transmittance applied to a light when the atmosphere is on.
    pub fn light_filter(&self, light: &Light) -> Vec3 {
        if !self.background.atmosphere {
            return Vec3::ONE;
        }
        let to_sun = match light.kind {
            LightKind::Directional => light.position,
            LightKind::Point => light.position - Vec3::new(0.0, self.background.ground_height, 0.0),
        };
        self.background.filter_light(to_sun)
    }

    pub fn effective_intensity(&self, light: &Light) -> Vec3 {
        light.effective_intensity(self.bounces, self.bounce_light, self.light_filter(light))
    }

    // ---- GPU resources ----

    /// Build hierarchies for meshes whose geometry changed.
    pub fn prepare(&mut self) {
        let cap = self.max_depth_cap;
        let mut rebuilt = false;
        for object in &mut self.objects {
            if let Shape::Mesh(mesh) = &mut object.shape {
                if mesh.is_dirty() || mesh.bvh().is_none() {
                    mesh.prepare(&mut self.ids, cap);
                    rebuilt = true;
                }
            }
        }
        if rebuilt {
            self.touch_structure();
        }
    }

    /// Every data buffer, in synthesis order, including empty ones.
    pub fn buffers(&self) -> Vec<&GpuBuffer> {
        self.ordered_objects()
            .into_iter()
            .filter_map(|o| match &o.shape {
                Shape::Mesh(mesh) => mesh.buffers(),
                _ => None,
            })
            .flat_map(|b| b.all())
            .collect()
    }

    /// Image ids referenced by bound materials, the background and terrain.
    pub fn used_images(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.background.images();
        for object in &self.objects {
            if let Some(material) = self.object_material(object) {
                ids.extend(material.images());
            }
            if let Shape::Terrain(t) = &object.shape {
                let images = t.images();
                ids.extend([images.color, images.elevation, images.normal]);
            }
        }
        ids.retain(|id| self.images.contains_key(id));
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Voxel-backed volumes as `(object id, grid)`.
    pub fn voxel_grids(&self) -> Vec<(u32, &VoxelGrid)> {
        self.ordered_objects()
            .into_iter()
            .filter_map(|o| match &o.shape {
                Shape::Volume(v) => v.grid().map(|g| (o.id(), g)),
                _ => None,
            })
            .collect()
    }

    pub fn shade_context<'a>(&self, object: &TracerObject, lights: &'a [BoundLight]) -> ShadeContext<'a> {
        ShadeContext {
            object: object.namespace(),
            material: Self::material_namespace(object.material.unwrap_or_default()),
            transformed: !matches!(object.shape, Shape::Terrain(_)),
            lights,
        }
    }

    // ---- uniforms ----

    pub fn uniform_layout(&self) -> UniformLayout {
        let mut layout = UniformLayout::with_frame_fields();
        for object in self.ordered_objects() {
            object.push_uniforms(&mut layout);
        }
        self.background.push_uniforms(&mut layout);
        layout
    }

    /// Fill the uniform block for one frame.
    pub fn write_uniforms(&self, layout: &UniformLayout, frame: &FrameUniforms) -> TracerResult<Vec<u8>> {
        let mut block = UniformBlock::new(layout);
        frame.write(&mut block)?;
        for object in self.ordered_objects() {
            object.write_uniforms(&mut block)?;
        }
        let lights = self.lights();
        for bound in &lights {
            bound
                .light
                .write_uniforms(&bound.ns, &mut block, self.effective_intensity(&bound.light))?;
        }
        let sun = lights
            .first()
            .map_or(Vec3::ZERO, |l| self.normalized_intensity(&l.light));
        self.background.write_uniforms(&mut block, sun)?;
        Ok(block.bytes().to_vec())
    }

    pub fn world_matrix(&self, id: u32) -> Option<Mat4> {
        self.object(id).map(|o| o.world_matrix())
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("objects", &self.objects)
            .field("materials", &self.materials.len())
            .field("images", &self.images.len())
            .field("bounces", &self.bounces)
            .finish()
    }
}
