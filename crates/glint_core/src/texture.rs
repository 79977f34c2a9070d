//! RGBA8 images for material colors, map layers, skyboxes and terrain.
//!
//! Pixels are kept as raw bytes (no color-space conversion) because several
//! consumers decode numeric data out of the channels, and because the GPU
//! uploads them verbatim as `Rgba8Unorm`. Row 0 is at `v = 0`.

use std::path::Path;

use glam::{Vec2, Vec4};
use thiserror::Error;

/// Errors that can occur during texture loading.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Failed to load texture: {0}")]
    LoadError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Pixel buffer holds {got} texels, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

pub type TextureResult<T> = Result<T, TextureError>;

/// Host-side filtering mode, matched by the sampler the shader reads with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
    pub filter: Filter,
    /// Original file path (for debugging)
    pub path: String,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 4]>) -> TextureResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(TextureError::SizeMismatch {
                got: pixels.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
            filter: Filter::Linear,
            path: String::new(),
        })
    }

    /// Transparent-black image.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0, 0, 0, 0]; width as usize * height as usize],
            filter: Filter::Linear,
            path: "<blank>".to_string(),
        }
    }

    /// The image used in place of any asset that failed to load.
    pub fn placeholder() -> Self {
        Self::blank(1, 1)
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            pixels,
            filter: Filter::Linear,
            path: "<generated>".to_string(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn load(path: impl AsRef<Path>) -> TextureResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| {
            TextureError::LoadError(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let mut texture = Self::from_image(&img.to_rgba8());
        texture.path = path.display().to_string();
        log::debug!(
            "Loaded texture: {} ({}x{})",
            texture.path,
            texture.width,
            texture.height
        );
        Ok(texture)
    }

    /// Like [`Texture::load`], but failures yield a 1×1 blank image.
    pub fn load_or_placeholder(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(texture) => texture,
            Err(e) => {
                log::warn!("{e}; using a blank placeholder");
                Self::placeholder()
            }
        }
    }

    pub fn from_image(img: &image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.pixels().map(|p| p.0).collect(),
            filter: Filter::Linear,
            path: String::new(),
        }
    }

    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.bytes().to_vec())
    }

    /// Raw RGBA bytes, row-major.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn fetch(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        self.pixels[(y * self.width + x) as usize]
    }

    /// Normalized texel, the value a shader `textureLoad` returns.
    pub fn fetch_unorm(&self, x: u32, y: u32) -> Vec4 {
        let p = self.fetch(x, y);
        Vec4::new(p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32) / 255.0
    }

    /// Sample at normalized coordinates with repeat wrapping, using this
    /// texture's filter.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if self.width == 0 || self.height == 0 {
            return Vec4::ZERO;
        }
        let (w, h) = (self.width as f32, self.height as f32);
        match self.filter {
            Filter::Nearest => {
                let x = (uv.x * w).floor().rem_euclid(w) as u32;
                let y = (uv.y * h).floor().rem_euclid(h) as u32;
                self.fetch_unorm(x, y)
            }
            Filter::Linear => {
                let x = uv.x * w - 0.5;
                let y = uv.y * h - 0.5;
                let (x0, y0) = (x.floor(), y.floor());
                let (fx, fy) = (x - x0, y - y0);
                let wrap = |v: f32, size: f32| v.rem_euclid(size) as u32;
                let (xa, xb) = (wrap(x0, w), wrap(x0 + 1.0, w));
                let (ya, yb) = (wrap(y0, h), wrap(y0 + 1.0, h));

                let top = self.fetch_unorm(xa, ya).lerp(self.fetch_unorm(xb, ya), fx);
                let bottom = self.fetch_unorm(xa, yb).lerp(self.fetch_unorm(xb, yb), fx);
                top.lerp(bottom, fy)
            }
        }
    }

    /// Copy `src` into this image with its top-left corner at (x, y).
    /// Pixels falling outside are dropped.
    pub fn blit(&mut self, src: &Texture, x: i64, y: i64) {
        for sy in 0..src.height {
            let ty = y + sy as i64;
            if ty < 0 || ty >= self.height as i64 {
                continue;
            }
            for sx in 0..src.width {
                let tx = x + sx as i64;
                if tx < 0 || tx >= self.width as i64 {
                    continue;
                }
                self.pixels[(ty as u32 * self.width + tx as u32) as usize] = src.fetch(sx, sy);
            }
        }
    }

    /// Sub-image starting at (x, y); pixels outside the source are blank.
    pub fn crop(&self, x: i64, y: i64, width: u32, height: u32) -> Texture {
        let mut out = Texture::blank(width, height);
        out.filter = self.filter;
        out.blit(self, -x, -y);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_rejected() {
        let err = Texture::new(2, 2, vec![[0; 4]; 3]);
        assert!(matches!(
            err,
            Err(TextureError::SizeMismatch { got: 3, expected: 4 })
        ));
    }

    #[test]
    fn test_nearest_sample() {
        let tex = Texture::from_fn(2, 1, |x, _| if x == 0 { [255, 0, 0, 255] } else { [0, 0, 255, 255] })
            .with_filter(Filter::Nearest);
        assert!((tex.sample(Vec2::new(0.25, 0.5)).x - 1.0).abs() < 0.001);
        assert!((tex.sample(Vec2::new(0.75, 0.5)).z - 1.0).abs() < 0.001);
        // Repeat wrapping
        assert!((tex.sample(Vec2::new(1.25, 0.5)).x - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_linear_sample_blends() {
        let tex = Texture::from_fn(2, 1, |x, _| if x == 0 { [0, 0, 0, 255] } else { [255, 255, 255, 255] });
        // Halfway between the two texel centers
        let mid = tex.sample(Vec2::new(0.5, 0.5));
        assert!((mid.x - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_crop_and_blit() {
        let tex = Texture::from_fn(4, 4, |x, y| [x as u8, y as u8, 0, 255]);
        let crop = tex.crop(1, 2, 2, 2);
        assert_eq!(crop.fetch(0, 0), [1, 2, 0, 255]);
        assert_eq!(crop.fetch(1, 1), [2, 3, 0, 255]);

        // Crops past the edge come back blank
        let edge = tex.crop(3, 3, 2, 2);
        assert_eq!(edge.fetch(1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_placeholder_on_missing_file() {
        let tex = Texture::load_or_placeholder("/nonexistent/image.png");
        assert_eq!((tex.width, tex.height), (1, 1));
    }

    #[test]
    fn test_bytes_layout() {
        let tex = Texture::from_fn(2, 1, |x, _| [x as u8, 7, 8, 9]);
        assert_eq!(tex.bytes(), &[0, 7, 8, 9, 1, 7, 8, 9]);
    }
}
