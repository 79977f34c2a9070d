//! Render settings and declarative scene descriptions.
//!
//! A [`SceneConfig`] is plain JSON: camera, background, images, named
//! materials, lights and objects. Objects reference materials by name and
//! materials reference images by their 1-based position in `images`.

use std::fs;
use std::path::{Path, PathBuf};

use glam::Vec3;
use glint_core::terrain::{DirectoryTileSource, SyntheticLayer, SyntheticTileSource};
use glint_core::{Mesh, TerrainMosaic, Texture, TileSource, VoxelGrid};
use glint_math::Camera;
use serde::{Deserialize, Serialize};

use crate::background::Background;
use crate::error::{TracerError, TracerResult};
use crate::light::Light;
use crate::material::{Material, MaterialId};
use crate::objects::{Composite, Member, SdfShape, Volume};
use crate::scene::Scene;

/// Integrator and output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub bounces: u32,
    /// Base of the per-bounce light normalization
    pub bounce_light: f32,
    /// Progressive frames to accumulate
    pub frames: u32,
    pub seed: u64,
    /// Clamp the traversal budget to 256 steps
    pub max_depth_cap: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            bounces: 6,
            bounce_light: 0.5,
            frames: 64,
            seed: 0,
            max_depth_cap: false,
        }
    }
}

impl RenderConfig {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// Copy the integrator settings onto a scene.
    pub fn apply(&self, scene: &mut Scene) {
        scene.bounces = self.bounces;
        scene.bounce_light = self.bounce_light;
        scene.max_depth_cap = self.max_depth_cap;
        scene.camera.aspect = self.aspect();
        scene.touch_structure();
    }
}

/// Where terrain tiles come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TilesConfig {
    /// Procedural hills
    Synthetic,
    /// `{root}/{zoom}/{x}/{y}.{extension}` trees for elevation and imagery
    Directory {
        elevation: PathBuf,
        imagery: PathBuf,
        #[serde(default = "default_tile_extension")]
        extension: String,
    },
}

fn default_tile_extension() -> String {
    "png".to_string()
}

/// Geometry of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShapeConfig {
    Sphere {
        center: Vec3,
        radius: f32,
    },
    Cylinder {
        center: Vec3,
        radius: f32,
        half_height: f32,
    },
    Cone {
        center: Vec3,
        radius: f32,
        top_radius: f32,
        half_height: f32,
    },
    Torus {
        center: Vec3,
        major: f32,
        minor: f32,
    },
    Cube {
        min: Vec3,
        max: Vec3,
    },
    Composite {
        members: Vec<Member>,
    },
    Mesh {
        path: PathBuf,
        #[serde(default = "default_true")]
        smooth: bool,
        #[serde(default)]
        cull: bool,
    },
    Icosphere {
        subdivisions: u32,
        #[serde(default = "default_true")]
        smooth: bool,
    },
    /// Signed distance field; `code` is a WGSL expression in `pos`
    Sdf {
        code: String,
        #[serde(default)]
        global: String,
        size: Vec3,
    },
    /// Voxel blobs
    Volume {
        #[serde(default)]
        seed: u64,
        #[serde(default)]
        g: f32,
    },
    Terrain {
        tiles: TilesConfig,
        lat: f64,
        lon: f64,
        zoom: u32,
        #[serde(default = "default_mips")]
        mips: u32,
        #[serde(default = "default_elevation_scale")]
        elevation: f32,
        #[serde(default = "default_terrain_scalar")]
        scalar: f32,
    },
}

fn default_true() -> bool {
    true
}

fn default_mips() -> u32 {
    4
}

fn default_elevation_scale() -> f32 {
    1.0
}

fn default_terrain_scalar() -> f32 {
    1.0
}

/// One object with its material and an optional placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    #[serde(flatten)]
    pub shape: ShapeConfig,
    /// Material name; the default material when absent
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub translate: Option<Vec3>,
    /// Euler angles in degrees, applied x, y, z
    #[serde(default)]
    pub rotate: Option<Vec3>,
    #[serde(default)]
    pub scale: Option<Vec3>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub camera: Camera,
    pub background: Background,
    pub images: Vec<PathBuf>,
    pub materials: Vec<Material>,
    pub lights: Vec<Light>,
    pub objects: Vec<ObjectConfig>,
}

impl SceneConfig {
    pub fn from_json(json: &str) -> TracerResult<Self> {
        let mut config: SceneConfig = serde_json::from_str(json)?;
        config.background.restore_material();
        Ok(config)
    }

    pub fn to_json(&self) -> TracerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> TracerResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| TracerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loading scene from {}", path.display());
        Self::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> TracerResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|source| TracerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build a scene through the factory operations.
    pub fn build(&self) -> TracerResult<Scene> {
        let mut scene = Scene::new();
        scene.camera = self.camera;
        scene.background = self.background.clone();

        for path in &self.images {
            scene.add_image(Texture::load_or_placeholder(path));
        }
        for material in &self.materials {
            scene.add_material(material.clone());
        }
        for light in &self.lights {
            scene.add_light(*light);
        }
        for object in &self.objects {
            let material = match &object.material {
                Some(name) => scene.material_id(name)?,
                None => 0,
            };
            let id = add_shape(&mut scene, &object.shape, material, object.material.is_some())?;
            place(&mut scene, id, object)?;
        }
        log::info!(
            "Built scene: {} objects, {} materials",
            scene.objects().len(),
            scene.materials().len()
        );
        Ok(scene)
    }
}

fn add_shape(scene: &mut Scene, shape: &ShapeConfig, material: MaterialId, named: bool) -> TracerResult<u32> {
    let id = match shape {
        ShapeConfig::Sphere { center, radius } => scene.add_sphere(*center, *radius, material),
        ShapeConfig::Cylinder {
            center,
            radius,
            half_height,
        } => scene.add_cylinder(*center, *radius, *half_height, material),
        ShapeConfig::Cone {
            center,
            radius,
            top_radius,
            half_height,
        } => scene.add_cone(*center, *radius, *top_radius, *half_height, material),
        ShapeConfig::Torus { center, major, minor } => scene.add_torus(*center, *major, *minor, material),
        ShapeConfig::Cube { min, max } => scene.add_cube(*min, *max, material),
        ShapeConfig::Composite { members } => {
            if members.is_empty() {
                return Err(TracerError::Invalid("composite without members".into()));
            }
            let composite = Composite {
                members: members.clone(),
            };
            scene.add_composite(composite, material)
        }
        ShapeConfig::Mesh { path, smooth, cull } => {
            scene.add_mesh(Mesh::load_obj_or_placeholder(path), *smooth, *cull, material)
        }
        ShapeConfig::Icosphere { subdivisions, smooth } => {
            scene.add_mesh(Mesh::icosphere(*subdivisions), *smooth, false, material)
        }
        ShapeConfig::Sdf { code, global, size } => {
            scene.add_sdf(SdfShape::new(code.clone(), *size).with_global(global.clone()), material)
        }
        ShapeConfig::Volume { seed, g } => {
            let mut volume = Volume::voxel(VoxelGrid::blobs(*seed));
            volume.g = *g;
            scene.add_volume(volume)
        }
        ShapeConfig::Terrain {
            tiles,
            lat,
            lon,
            zoom,
            mips,
            elevation,
            scalar,
        } => {
            let mosaic = match tiles {
                TilesConfig::Synthetic => generate_mosaic(
                    &SyntheticTileSource::new(SyntheticLayer::Elevation),
                    &SyntheticTileSource::new(SyntheticLayer::Imagery),
                    (*lat, *lon, *zoom, *mips),
                )?,
                TilesConfig::Directory {
                    elevation,
                    imagery,
                    extension,
                } => generate_mosaic(
                    &DirectoryTileSource::new(elevation, extension.clone()),
                    &DirectoryTileSource::new(imagery, extension.clone()),
                    (*lat, *lon, *zoom, *mips),
                )?,
            };
            scene.add_terrain(mosaic, *elevation, *scalar, named.then_some(material))
        }
    };
    Ok(id)
}

fn generate_mosaic(
    elevation: &dyn TileSource,
    imagery: &dyn TileSource,
    (lat, lon, zoom, mips): (f64, f64, u32, u32),
) -> TracerResult<TerrainMosaic> {
    Ok(TerrainMosaic::generate(elevation, imagery, lat, lon, zoom, mips)?)
}

fn place(scene: &mut Scene, id: u32, object: &ObjectConfig) -> TracerResult<()> {
    if object.translate.is_none() && object.rotate.is_none() && object.scale.is_none() {
        return Ok(());
    }
    let target = scene.object_mut(id).ok_or(TracerError::ObjectNotFound(id))?;
    // Edits compose in the local frame, so the world-space translation goes first
    if let Some(delta) = object.translate {
        target.translate(delta);
    }
    if let Some(rotate) = object.rotate {
        target.rotate_x(rotate.x);
        target.rotate_y(rotate.y);
        target.rotate_z(rotate.z);
    }
    if let Some(scale) = object.scale {
        target.scale(scale);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundPreset;
    use crate::light::LightKind;
    use crate::material::Closure;
    use crate::objects::Shape;

    const SCENE: &str = r#"{
        "camera": { "position": [0.0, 0.5, 3.0], "exposure": 1.5 },
        "background": { "preset": "ground_plane" },
        "materials": [
            { "name": "gold", "closure": "mirror", "color": { "constant": [1.0, 0.8, 0.3] } }
        ],
        "lights": [
            { "kind": "point", "position": [0.0, 2.0, 0.0], "intensity": [0.5, 0.5, 0.5], "size": 0.1, "caustic": 0.0 }
        ],
        "objects": [
            { "kind": "sphere", "center": [0.0, 0.0, 0.0], "radius": 0.5, "material": "gold" },
            { "kind": "cube", "min": [-1.0, -1.0, -1.0], "max": [-0.5, -0.5, -0.5], "translate": [0.0, 0.25, 0.0] }
        ]
    }"#;

    #[test]
    fn test_render_config_defaults() {
        let config = RenderConfig::default();
        assert_eq!((config.width, config.height), (512, 512));
        assert_eq!(config.bounces, 6);
        assert!((config.bounce_light - 0.5).abs() < 1e-6);
        assert!(!config.max_depth_cap);

        let partial: RenderConfig = serde_json::from_str(r#"{ "bounces": 2 }"#).unwrap();
        assert_eq!(partial.bounces, 2);
        assert_eq!(partial.width, 512);
    }

    #[test]
    fn test_scene_from_json() {
        let config = SceneConfig::from_json(SCENE).unwrap();
        assert_eq!(config.background.preset, BackgroundPreset::GroundPlane);
        assert!((config.camera.exposure - 1.5).abs() < 1e-6);
        assert!((config.camera.fov_y - 55.0_f32.to_radians()).abs() < 1e-6);

        let scene = config.build().unwrap();
        assert_eq!(scene.objects().len(), 3);
        let lights = scene.lights();
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].light.kind, LightKind::Point);

        let sphere = scene
            .objects()
            .iter()
            .find(|o| matches!(o.shape, Shape::Sphere(_)))
            .unwrap();
        let material = scene.object_material(sphere).unwrap();
        assert_eq!(material.name, "gold");
        assert_eq!(material.closure, Closure::Mirror);

        let cube = scene
            .objects()
            .iter()
            .find(|o| matches!(o.shape, Shape::Cube(_)))
            .unwrap();
        assert_eq!(cube.material, Some(0));
        // box center -0.75 moved up by 0.25
        assert!((cube.world_matrix().w_axis.y + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_material_is_an_error() {
        let json = r#"{ "objects": [ { "kind": "sphere", "center": [0.0, 0.0, 0.0], "radius": 1.0, "material": "chrome" } ] }"#;
        let err = SceneConfig::from_json(json).unwrap().build().unwrap_err();
        assert!(matches!(err, TracerError::UnknownMaterial(name) if name == "chrome"));
    }

    #[test]
    fn test_json_round_trip_keeps_objects() {
        let config = SceneConfig::from_json(SCENE).unwrap();
        let again = SceneConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(again.objects, config.objects);
        assert_eq!(again.materials.len(), 1);
    }

    #[test]
    fn test_apply_render_config() {
        let mut scene = Scene::new();
        let structure = scene.structure();
        let config = RenderConfig {
            width: 640,
            height: 320,
            bounces: 3,
            ..Default::default()
        };
        config.apply(&mut scene);
        assert_eq!(scene.bounces, 3);
        assert!((scene.camera.aspect - 2.0).abs() < 1e-6);
        assert_ne!(scene.structure(), structure);
    }
}
