//! Image preparation ahead of the external detector.
//!
//! Photos are letterboxed to a fixed canvas and, optionally, contrast
//! equalised so faces from dim or washed-out uploads carry usable detail.
//! Detections made on the prepared image map back through [`Letterbox`].

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

use crate::config::MatchingConfig;
use crate::types::BoundingBox;

/// CLAHE grid size (tiles per side).
const CLAHE_TILES: u32 = 8;
/// Histogram clip limit, as a multiple of the uniform bin height.
const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// Geometry of a letterbox resize: `prepared = original * scale + pad`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn to_prepared(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }

    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    /// Map a box found on the prepared image back onto the original photo.
    pub fn bbox_to_original(&self, bbox: &BoundingBox) -> BoundingBox {
        let (x, y) = self.to_original(bbox.x, bbox.y);
        BoundingBox {
            x,
            y,
            width: bbox.width / self.scale,
            height: bbox.height / self.scale,
            confidence: bbox.confidence,
            landmarks: bbox
                .landmarks
                .map(|points| points.map(|(lx, ly)| self.to_original(lx, ly))),
        }
    }
}

/// A photo ready for detection and quality assessment.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub image: DynamicImage,
    pub letterbox: Letterbox,
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    target: (u32, u32),
    normalize_brightness: bool,
}

impl Preprocessor {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            target: config.target_image_size,
            normalize_brightness: config.normalize_brightness,
        }
    }

    pub fn prepare(&self, image: &DynamicImage) -> Prepared {
        let (target_w, target_h) = (self.target.0.max(1), self.target.1.max(1));
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Prepared {
                image: DynamicImage::ImageRgb8(RgbImage::new(target_w, target_h)),
                letterbox: Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 },
            };
        }

        let scale = (target_w as f32 / width as f32).min(target_h as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target_w);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target_h);
        let pad_x = (target_w - new_w) / 2;
        let pad_y = (target_h - new_h) / 2;

        let rgb = image.to_rgb8();
        let mut content = if (new_w, new_h) == (width, height) {
            rgb
        } else {
            imageops::resize(&rgb, new_w, new_h, FilterType::Triangle)
        };
        if self.normalize_brightness {
            equalize_luminance(&mut content);
        }

        let mut canvas = RgbImage::new(target_w, target_h);
        imageops::replace(&mut canvas, &content, pad_x as i64, pad_y as i64);

        tracing::debug!(
            from = ?(width, height),
            to = ?(target_w, target_h),
            scale,
            normalized = self.normalize_brightness,
            "image prepared"
        );

        Prepared {
            image: DynamicImage::ImageRgb8(canvas),
            letterbox: Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        }
    }
}

/// CLAHE on luminance, carrying colour along by rescaling each pixel's RGB.
fn equalize_luminance(image: &mut RgbImage) {
    let (w, h) = image.dimensions();
    let mut luma: Vec<u8> = image
        .pixels()
        .map(|p| luminance(p).round().clamp(0.0, 255.0) as u8)
        .collect();
    let before = luma.clone();
    clahe(&mut luma, w as usize, h as usize);

    for (pixel, (&old, &new)) in image.pixels_mut().zip(before.iter().zip(luma.iter())) {
        if old == 0 {
            *pixel = Rgb([new, new, new]);
            continue;
        }
        let ratio = new as f32 / old as f32;
        pixel.0 = pixel.0.map(|c| (c as f32 * ratio).round().clamp(0.0, 255.0) as u8);
    }
}

fn luminance(p: &Rgb<u8>) -> f32 {
    let [r, g, b] = p.0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Contrast-limited adaptive histogram equalisation over a square tile grid,
/// with bilinear blending between neighbouring tile lookup tables.
fn clahe(gray: &mut [u8], w: usize, h: usize) {
    let tiles = (CLAHE_TILES as usize).min(w).min(h);
    if tiles == 0 || gray.len() < w * h {
        return;
    }
    let tile_w = w / tiles;
    let tile_h = h / tiles;

    let mut luts: Vec<[f32; 256]> = Vec::with_capacity(tiles * tiles);
    for row in 0..tiles {
        for col in 0..tiles {
            let x0 = col * tile_w;
            let y0 = row * tile_h;
            // The last row and column absorb the remainder.
            let x1 = if col + 1 == tiles { w } else { x0 + tile_w };
            let y1 = if row + 1 == tiles { h } else { y0 + tile_h };

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &v in &gray[y * w + x0..y * w + x1] {
                    hist[v as usize] += 1;
                }
            }
            luts.push(tile_lut(&mut hist, ((x1 - x0) * (y1 - y0)) as u32));
        }
    }

    let centre = |i: usize, size: usize| i as f32 / size as f32 - 0.5;
    let last = (tiles - 1) as f32;
    for y in 0..h {
        let fy = centre(y, tile_h).clamp(0.0, last);
        let (r0, dy) = (fy as usize, fy.fract());
        let r1 = (r0 + 1).min(tiles - 1);
        for x in 0..w {
            let fx = centre(x, tile_w).clamp(0.0, last);
            let (c0, dx) = (fx as usize, fx.fract());
            let c1 = (c0 + 1).min(tiles - 1);

            let v = gray[y * w + x] as usize;
            let top = luts[r0 * tiles + c0][v] * (1.0 - dx) + luts[r0 * tiles + c1][v] * dx;
            let bottom = luts[r1 * tiles + c0][v] * (1.0 - dx) + luts[r1 * tiles + c1][v] * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clip `hist`, spread the excess evenly, and return the normalised CDF.
fn tile_lut(hist: &mut [u32; 256], pixels: u32) -> [f32; 256] {
    let clip = ((CLAHE_CLIP_LIMIT * pixels as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let share = excess / 256;
    let leftover = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < leftover);
    }

    let mut lut = [0f32; 256];
    let mut running = 0u32;
    for (slot, &count) in lut.iter_mut().zip(hist.iter()) {
        running += count;
        *slot = running as f32;
    }
    let first = lut.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let span = pixels as f32 - first;
    for v in lut.iter_mut() {
        *v = if span > 0.0 {
            ((*v - first) / span * 255.0).clamp(0.0, 255.0)
        } else {
            (*v).min(255.0)
        };
    }
    lut
}
