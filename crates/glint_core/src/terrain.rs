//! Heightfield terrain data: Terrarium elevation tiles, Web-Mercator tile
//! addressing, tile stitching, and the multi-level mosaics a terrain object
//! ray-marches against.
//!
//! A mosaic places `mips` square levels side by side. Level `i` covers
//! `2^i` times the ground extent of level 0, so a single texture row spans
//! near detail and far context.

use std::path::PathBuf;

use crate::texture::{Filter, Texture, TextureError};
use thiserror::Error;

/// Tile edge length in pixels.
pub const TILE_PIXELS: u32 = 256;

const EARTH_CIRCUMFERENCE: f64 = 40_075_016.686;
const MAX_LATITUDE: f64 = 85.0511;

#[derive(Error, Debug)]
pub enum TerrainError {
    #[error("Failed to fetch tile {zoom}/{x}/{y}: {source}")]
    Tile {
        zoom: u32,
        x: i64,
        y: i64,
        #[source]
        source: TextureError,
    },

    #[error("Terrain mosaic needs at least one level")]
    NoLevels,
}

/// Source of 256×256 map tiles addressed by zoom and tile coordinates.
pub trait TileSource {
    fn fetch(&self, zoom: u32, x: i64, y: i64) -> Result<Texture, TerrainError>;
}

/// Tiles stored on disk as `{root}/{zoom}/{x}/{y}.{extension}`.
pub struct DirectoryTileSource {
    pub root: PathBuf,
    pub extension: String,
}

impl DirectoryTileSource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }
}

impl TileSource for DirectoryTileSource {
    fn fetch(&self, zoom: u32, x: i64, y: i64) -> Result<Texture, TerrainError> {
        let path = self
            .root
            .join(zoom.to_string())
            .join(x.to_string())
            .join(format!("{y}.{}", self.extension));
        Texture::load(&path).map_err(|source| TerrainError::Tile { zoom, x, y, source })
    }
}

/// What a [`SyntheticTileSource`] renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticLayer {
    /// Terrarium-encoded elevation
    Elevation,
    /// Height-tinted imagery
    Imagery,
}

/// Procedural rolling hills, seamless across tiles and zoom levels.
pub struct SyntheticTileSource {
    pub layer: SyntheticLayer,
    /// Peak-to-trough relief in meters
    pub relief: f64,
    /// Hill wavelength in meters
    pub wavelength: f64,
}

impl SyntheticTileSource {
    pub fn new(layer: SyntheticLayer) -> Self {
        Self {
            layer,
            relief: 600.0,
            wavelength: 3000.0,
        }
    }

    /// Elevation in meters at a Web-Mercator position measured in meters.
    pub fn height_at(&self, wx: f64, wy: f64) -> f64 {
        let k = std::f64::consts::TAU / self.wavelength;
        let hills = (wx * k).sin() * (wy * k * 1.3).cos() + 0.5 * (wx * k * 2.7 + wy * k * 1.9).sin();
        1000.0 + self.relief * 0.5 * hills
    }
}

impl TileSource for SyntheticTileSource {
    fn fetch(&self, zoom: u32, x: i64, y: i64) -> Result<Texture, TerrainError> {
        let meters_per_pixel = EARTH_CIRCUMFERENCE / (2f64.powi(zoom as i32) * TILE_PIXELS as f64);
        Ok(Texture::from_fn(TILE_PIXELS, TILE_PIXELS, |px, py| {
            let wx = (x as f64 * TILE_PIXELS as f64 + px as f64) * meters_per_pixel;
            let wy = (y as f64 * TILE_PIXELS as f64 + py as f64) * meters_per_pixel;
            let h = self.height_at(wx, wy);
            match self.layer {
                SyntheticLayer::Elevation => encode_terrarium(h),
                SyntheticLayer::Imagery => {
                    let s = ((h - 1000.0) / self.relief + 0.5).clamp(0.0, 1.0);
                    [
                        (60.0 + 120.0 * s) as u8,
                        (110.0 + 60.0 * s) as u8,
                        (50.0 + 110.0 * s) as u8,
                        255,
                    ]
                }
            }
        }))
    }
}

/// Elevation in meters from a Terrarium-encoded pixel.
pub fn decode_terrarium(r: u8, g: u8, b: u8) -> f64 {
    r as f64 * 256.0 + g as f64 + b as f64 / 256.0 - 32768.0
}

pub fn encode_terrarium(meters: f64) -> [u8; 4] {
    let v = (meters + 32768.0).clamp(0.0, 65535.996);
    let whole = v.floor();
    [
        (whole / 256.0).floor() as u8,
        (whole % 256.0) as u8,
        ((v - whole) * 256.0).floor() as u8,
        255,
    ]
}

/// Ground width of one tile in meters at a latitude (degrees).
pub fn meters_per_tile(lat: f64, zoom: u32) -> f64 {
    EARTH_CIRCUMFERENCE * lat.to_radians().cos() / 2f64.powi(zoom as i32)
}

/// Global Web-Mercator pixel coordinates of a latitude/longitude.
pub fn lat_lon_to_pixel(lat: f64, lon: f64, zoom: u32) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let n = 2f64.powi(zoom as i32) * TILE_PIXELS as f64;
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * n;
    (x, y)
}

/// Stitch the tiles around (lat, lon) and crop a square centered on it.
///
/// The crop is `256 * 2^detail` pixels wide, taken at `zoom + detail`, so
/// it always spans one zoom-level tile. Tiles that fail to load are left
/// blank.
pub fn stitch(source: &dyn TileSource, lat: f64, lon: f64, zoom: u32, detail: u32) -> Texture {
    let image_size = TILE_PIXELS << detail;
    let padding = (2u32.pow(detail) as f64 / 2.0).ceil() as i64;
    let large = (1 + 2 * padding) as u32;
    let zoom = zoom + detail;

    let (px, py) = lat_lon_to_pixel(lat, lon, zoom);
    let tile_x = (px / TILE_PIXELS as f64).floor() as i64;
    let tile_y = (py / TILE_PIXELS as f64).floor() as i64;
    let offset_x = px.rem_euclid(TILE_PIXELS as f64);
    let offset_y = py.rem_euclid(TILE_PIXELS as f64);

    let mut big = Texture::blank(TILE_PIXELS * large, TILE_PIXELS * large);
    for dy in -padding..=padding {
        for dx in -padding..=padding {
            let (tx, ty) = (tile_x + dx, tile_y + dy);
            let tile = source.fetch(zoom, tx, ty).unwrap_or_else(|e| {
                log::warn!("{e}; using a blank tile");
                Texture::blank(TILE_PIXELS, TILE_PIXELS)
            });
            big.blit(
                &tile,
                (dx + padding) * TILE_PIXELS as i64,
                (dy + padding) * TILE_PIXELS as i64,
            );
        }
    }

    let half = image_size as f64 / 2.0;
    let crop_x = (offset_x + (TILE_PIXELS as i64 * padding) as f64 - half).floor() as i64;
    let crop_y = (offset_y + (TILE_PIXELS as i64 * padding) as f64 - half).floor() as i64;
    big.crop(crop_x, crop_y, image_size, image_size)
}

/// Decoded elevations (meters) of a Terrarium image, row-major.
pub fn decode_elevations(elevation: &Texture) -> Vec<f64> {
    elevation
        .pixels
        .iter()
        .map(|p| decode_terrarium(p[0], p[1], p[2]))
        .collect()
}

/// Tangent-space normal raster from central elevation differences.
///
/// `meters` is the ground width of the whole image. Normals are stored as
/// `(n + 1) / 2 * 255` with z up.
pub fn normal_raster(elevation: &Texture, meters: f64) -> Texture {
    let (w, h) = (elevation.width as usize, elevation.height as usize);
    let heights = decode_elevations(elevation);
    let spacing = meters / w.max(1) as f64;

    Texture::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let at = |x: usize, y: usize| heights[y * w + x];
        let (xl, xr) = (x.saturating_sub(1), (x + 1).min(w - 1));
        let (yd, yu) = (y.saturating_sub(1), (y + 1).min(h - 1));
        let dx = (at(xr, y) - at(xl, y)) / (xr - xl).max(1) as f64;
        let dy = (at(x, yu) - at(x, yd)) / (yu - yd).max(1) as f64;

        let n = [-dx, dy, spacing];
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        let channel = |v: f64| (((v / len) + 1.0) / 2.0 * 255.0).round() as u8;
        [channel(n[0]), channel(n[1]), channel(n[2]), 255]
    })
}

/// One zoom level of terrain data.
#[derive(Clone, Debug)]
pub struct TerrainLevel {
    pub elevation: Texture,
    pub color: Texture,
    pub normal: Texture,
    /// Ground width of the level in meters
    pub tile_size: f64,
    pub height_range: (f64, f64),
}

impl TerrainLevel {
    pub fn generate(
        elevation: &dyn TileSource,
        imagery: &dyn TileSource,
        lat: f64,
        lon: f64,
        zoom: u32,
        elevation_detail: u32,
        imagery_detail: u32,
    ) -> Self {
        let elev = stitch(elevation, lat, lon, zoom, elevation_detail);
        let color = stitch(imagery, lat, lon, zoom, imagery_detail);
        let tile_size = meters_per_tile(lat, zoom);
        let normal = normal_raster(&elev, tile_size);
        let heights = decode_elevations(&elev);
        let height_range = heights
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        log::debug!("Generated terrain level at zoom {zoom}");
        Self {
            elevation: elev,
            color,
            normal,
            tile_size,
            height_range,
        }
    }
}

/// Side-by-side mip levels ready for upload.
#[derive(Clone, Debug)]
pub struct TerrainMosaic {
    /// Terrarium elevation, sampled nearest so the channels decode exactly
    pub elevation: Texture,
    pub color: Texture,
    pub normal: Texture,
    /// Ground width of level 0 in meters
    pub tile_size: f64,
    pub mips: u32,
}

impl TerrainMosaic {
    pub fn from_levels(levels: &[TerrainLevel]) -> Result<Self, TerrainError> {
        let first = levels.first().ok_or(TerrainError::NoLevels)?;
        let row = |pick: fn(&TerrainLevel) -> &Texture, filter: Filter| {
            let size = pick(first).width;
            let mut out = Texture::blank(size * levels.len() as u32, size);
            for (i, level) in levels.iter().enumerate() {
                out.blit(pick(level), (i as u32 * size) as i64, 0);
            }
            out.with_filter(filter)
        };
        Ok(Self {
            elevation: row(|l| &l.elevation, Filter::Nearest),
            color: row(|l| &l.color, Filter::Linear),
            normal: row(|l| &l.normal, Filter::Linear),
            tile_size: first.tile_size,
            mips: levels.len() as u32,
        })
    }

    /// Generate `mips` levels, each one zoom step out from the last.
    pub fn generate(
        elevation: &dyn TileSource,
        imagery: &dyn TileSource,
        lat: f64,
        lon: f64,
        zoom: u32,
        mips: u32,
    ) -> Result<Self, TerrainError> {
        let levels: Vec<TerrainLevel> = (0..mips.min(zoom + 1))
            .map(|i| TerrainLevel::generate(elevation, imagery, lat, lon, zoom - i, 0, 0))
            .collect();
        let mosaic = Self::from_levels(&levels)?;
        log::info!(
            "Terrain mosaic ready: {} levels, {:.0} m tiles",
            mosaic.mips,
            mosaic.tile_size
        );
        Ok(mosaic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terrarium_round_trip() {
        for meters in [-120.5, 0.0, 1523.25, 8848.0] {
            let p = encode_terrarium(meters);
            assert!((decode_terrarium(p[0], p[1], p[2]) - meters).abs() < 1.0 / 256.0);
        }
        // Sea level is 32768 = 128 * 256
        assert_eq!(encode_terrarium(0.0), [128, 0, 0, 255]);
    }

    #[test]
    fn test_meters_per_tile() {
        assert!((meters_per_tile(0.0, 0) - EARTH_CIRCUMFERENCE).abs() < 0.01);
        assert!((meters_per_tile(60.0, 1) - EARTH_CIRCUMFERENCE / 4.0).abs() < 1.0);
    }

    #[test]
    fn test_lat_lon_to_pixel() {
        let (x, y) = lat_lon_to_pixel(0.0, 0.0, 0);
        assert!((x - 128.0).abs() < 0.001);
        assert!((y - 128.0).abs() < 0.001);

        // Latitude is clamped at the Mercator limit
        let (_, top) = lat_lon_to_pixel(90.0, 0.0, 0);
        assert!(top.abs() < 0.01);
    }

    #[test]
    fn test_flat_normals_point_up() {
        let flat = Texture::from_fn(4, 4, |_, _| encode_terrarium(100.0));
        let normals = normal_raster(&flat, 1000.0);
        let p = normals.fetch(1, 1);
        assert_eq!(p[0], 128);
        assert_eq!(p[1], 128);
        assert_eq!(p[2], 255);
    }

    struct Failing;

    impl TileSource for Failing {
        fn fetch(&self, zoom: u32, x: i64, y: i64) -> Result<Texture, TerrainError> {
            Err(TerrainError::Tile {
                zoom,
                x,
                y,
                source: TextureError::LoadError("offline".to_string()),
            })
        }
    }

    #[test]
    fn test_stitch_degrades_to_blank() {
        let tex = stitch(&Failing, 10.0, 20.0, 5, 0);
        assert_eq!((tex.width, tex.height), (256, 256));
        assert!(tex.pixels.iter().all(|p| *p == [0, 0, 0, 0]));
    }

    #[test]
    fn test_stitch_is_seamless() {
        let source = SyntheticTileSource::new(SyntheticLayer::Elevation);
        let tex = stitch(&source, 46.5, 7.9, 12, 1);
        assert_eq!(tex.width, 512);
        // Neighboring pixels never jump: the crop never lands on a blank tile
        let heights = decode_elevations(&tex);
        assert!(heights.iter().all(|&h| h > 0.0));
    }

    #[test]
    fn test_mosaic_layout() {
        let elev = SyntheticTileSource::new(SyntheticLayer::Elevation);
        let imagery = SyntheticTileSource::new(SyntheticLayer::Imagery);
        let mosaic = TerrainMosaic::generate(&elev, &imagery, 46.5, 7.9, 12, 3).unwrap();

        assert_eq!(mosaic.mips, 3);
        assert_eq!((mosaic.elevation.width, mosaic.elevation.height), (768, 256));
        assert_eq!(mosaic.elevation.filter, Filter::Nearest);
        assert!((mosaic.tile_size - meters_per_tile(46.5, 12)).abs() < 0.01);
        assert!(matches!(TerrainMosaic::from_levels(&[]), Err(TerrainError::NoLevels)));
    }
}
