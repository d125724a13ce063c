//! Thumbnail and photo icon pipeline.
//!
//! Decodes an image stream, applies the EXIF orientation, scales it to fit
//! a bounding box with bilinear resampling, and (for photo icons) wraps the
//! result in a white frame with a soft drop shadow.

use crate::blur::gaussian_blur;
use crate::error::Result;
use exif::{In, Tag, Value};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::{Cursor, Read};

/// Converts decoded images into framed, shadowed icons or plain thumbs.
#[derive(Debug, Clone)]
pub struct Thumber {
    max_w: u32,
    max_h: u32,

    border: u32,

    // shadow
    shadow_dx: i32,
    shadow_dy: i32,
    shadow_blur: u32,
}

impl Thumber {
    /// Pipeline configuration for the map's photo icons.
    pub fn photo_icon(size: u32) -> Self {
        Thumber {
            max_w: size,
            max_h: size,
            border: 2,
            shadow_dx: 0,
            shadow_dy: 1,
            shadow_blur: 4,
        }
    }

    /// Pipeline configuration for plain gallery thumbnails.
    pub fn thumbnail(size: u32) -> Self {
        Thumber {
            max_w: size,
            max_h: size,
            border: 0,
            shadow_dx: 0,
            shadow_dy: 0,
            shadow_blur: 0,
        }
    }

    /// Thumb dimensions for a source of `sx` by `sy` pixels: the axis with
    /// the larger source/target ratio controls the scale factor.
    pub fn scaled_size(&self, sx: u32, sy: u32) -> (u32, u32) {
        let scale_for_width =
            sx as f64 / self.max_w as f64 > sy as f64 / self.max_h as f64;
        if scale_for_width {
            let tx = self.max_w;
            let ty = ((sy as u64 * tx as u64) / sx as u64).max(1) as u32;
            (tx, ty)
        } else {
            let ty = self.max_h;
            let tx = ((sx as u64 * ty as u64) / sy as u64).max(1) as u32;
            (tx, ty)
        }
    }

    /// Scales `im` to fit the configured bounding box, preserving aspect
    /// ratio.
    pub fn scaled(&self, im: &DynamicImage) -> RgbaImage {
        let (tx, ty) = self.scaled_size(im.width().max(1), im.height().max(1));
        imageops::resize(&im.to_rgba8(), tx, ty, FilterType::Triangle)
    }

    /// Full canvas size of a framed icon produced from a thumb of
    /// `tdx` by `tdy` pixels.
    pub fn icon_size(&self, tdx: u32, tdy: u32) -> (u32, u32) {
        let pdx = tdx + 2 * self.border;
        let pdy = tdy + 2 * self.border;
        (
            pdx + 4 * self.shadow_blur + self.shadow_dx.unsigned_abs(),
            pdy + 4 * self.shadow_blur + self.shadow_dy.unsigned_abs(),
        )
    }

    /// Wraps a scaled thumb in a solid white frame and paints a blurred
    /// drop shadow behind it.
    pub fn icon_from_thumb(&self, thumb: &RgbaImage) -> RgbaImage {
        let (tdx, tdy) = thumb.dimensions();
        let pdx = tdx + 2 * self.border;
        let pdy = tdy + 2 * self.border;
        let (fx, fy) = self.icon_size(tdx, tdy);

        // thumb origin within the canvas
        let mut tx = (2 * self.shadow_blur + self.border) as i64;
        let mut ty = tx;
        if self.shadow_dx < 0 {
            tx += self.shadow_dx as i64;
        }
        if self.shadow_dy < 0 {
            ty += self.shadow_dy as i64;
        }

        let mut framed = RgbaImage::new(fx, fy);

        let shadow = Rgba([0, 0, 0, 128]);
        fill_rect(
            &mut framed,
            tx - self.border as i64 + self.shadow_dx as i64,
            ty - self.border as i64 + self.shadow_dy as i64,
            pdx,
            pdy,
            shadow,
        );
        let mut framed = gaussian_blur(&framed, self.shadow_blur);

        let white = Rgba([255, 255, 255, 255]);
        fill_rect(
            &mut framed,
            tx - self.border as i64,
            ty - self.border as i64,
            pdx,
            pdy,
            white,
        );

        imageops::replace(&mut framed, thumb, tx, ty);
        framed
    }

    /// Decodes, orients and converts a raw stream into a finished icon.
    pub fn icon_from_reader(&self, r: &mut dyn Read) -> Result<RgbaImage> {
        let im = load_oriented(r)?;
        Ok(self.icon_from_thumb(&self.scaled(&im)))
    }

    /// Decodes, orients and scales a raw stream into a plain thumb.
    pub fn thumb_from_reader(&self, r: &mut dyn Read) -> Result<RgbaImage> {
        let im = load_oriented(r)?;
        Ok(self.scaled(&im))
    }
}

fn fill_rect(im: &mut RgbaImage, x0: i64, y0: i64, w: u32, h: u32, color: Rgba<u8>) {
    let (iw, ih) = im.dimensions();
    for y in 0..h as i64 {
        let yy = y0 + y;
        if yy < 0 || yy >= ih as i64 {
            continue;
        }
        for x in 0..w as i64 {
            let xx = x0 + x;
            if xx < 0 || xx >= iw as i64 {
                continue;
            }
            im.put_pixel(xx as u32, yy as u32, color);
        }
    }
}

/// Decodes an image from `r` and applies the EXIF orientation transform.
/// Streams without EXIF, or with an unknown orientation value, pass through
/// untransformed.
pub fn load_oriented(r: &mut dyn Read) -> Result<DynamicImage> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    let orientation = exif_orientation(&buf);
    let im = image::load_from_memory(&buf)?;
    Ok(apply_orientation(im, orientation.unwrap_or(1)))
}

fn exif_orientation(data: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()?;
    let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
    match &field.value {
        Value::Short(v) => v.first().map(|&o| o as u32),
        Value::Long(v) => v.first().copied(),
        _ => None,
    }
}

/// The eight EXIF orientation transforms. `rotate90` rotates clockwise, so
/// orientation 6 (camera rotated counter-clockwise) becomes one clockwise
/// turn on the pixels.
pub fn apply_orientation(im: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => im.fliph(),
        3 => im.rotate180(),
        4 => im.flipv(),
        5 => im.rotate90().fliph(),
        6 => im.rotate90(),
        7 => im.rotate270().fliph(),
        8 => im.rotate270(),
        _ => im,
    }
}
