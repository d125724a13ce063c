//! Approximate Gaussian blur over RGBA images.
//!
//! Three successive box blurs whose sizes follow the standard
//! three-box decomposition: horizontal then vertical sweeps with a running
//! window accumulator per channel, clamping to the edge pixel at the image
//! boundary. Radius 0 is an identity.

use image::RgbaImage;

const CHANNELS: usize = 4;

/// Blurs `src` with an approximated Gaussian of standard deviation
/// `radius`.
pub fn gaussian_blur(src: &RgbaImage, radius: u32) -> RgbaImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let mut cur = src.clone();
    let mut scratch = RgbaImage::new(w, h);
    for size in determine_boxes(radius as f64, 3) {
        let r = ((size - 1) / 2) as usize;
        let mut out = RgbaImage::new(w, h);
        box_blur_h(&cur, &mut scratch, r);
        box_blur_v(&scratch, &mut out, r);
        cur = out;
    }
    cur
}

/// Box sizes whose composition approximates a Gaussian of deviation
/// `sigma`. All sizes are odd; the first `m` use the smaller width.
fn determine_boxes(sigma: f64, nbox: usize) -> Vec<i64> {
    let ideal_width = (12.0 * sigma * sigma / nbox as f64 + 1.0).sqrt();
    let mut wlo = ideal_width.floor() as i64;
    if wlo % 2 == 0 {
        wlo -= 1;
    }
    let wup = wlo + 2;

    let n = nbox as f64;
    let wl = wlo as f64;
    let ideal_median = (12.0 * sigma * sigma - n * wl * wl - 4.0 * n * wl - 3.0 * n)
        / (-4.0 * wl - 4.0);
    let median = (ideal_median + 0.5).floor() as i64;

    (0..nbox as i64)
        .map(|i| if i < median { wlo } else { wup })
        .collect()
}

fn box_blur_h(src: &RgbaImage, dst: &mut RgbaImage, radius: usize) {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let r = radius.min(w.saturating_sub(1));
    let r2 = (2 * r + 1) as i32;
    let stride = w * CHANNELS;
    let sp: &[u8] = src.as_raw();
    let dp: &mut [u8] = &mut **dst;

    for y in 0..h {
        let row = y * stride;
        let mut val = [0i32; CHANNELS];
        let first = &sp[row..row + CHANNELS];
        let last = &sp[row + (w - 1) * CHANNELS..row + w * CHANNELS];
        for c in 0..CHANNELS {
            val[c] = (r as i32 + 1) * first[c] as i32;
        }
        for x in 0..r {
            for c in 0..CHANNELS {
                val[c] += sp[row + x * CHANNELS + c] as i32;
            }
        }

        let mut x = 0usize;
        while x <= r {
            let add = row + (x + r).min(w - 1) * CHANNELS;
            for c in 0..CHANNELS {
                val[c] += sp[add + c] as i32 - first[c] as i32;
                dp[row + x * CHANNELS + c] = (val[c] / r2) as u8;
            }
            x += 1;
        }
        while x < w.saturating_sub(r) {
            let add = row + (x + r) * CHANNELS;
            let sub = row + (x - r - 1) * CHANNELS;
            for c in 0..CHANNELS {
                val[c] += sp[add + c] as i32 - sp[sub + c] as i32;
                dp[row + x * CHANNELS + c] = (val[c] / r2) as u8;
            }
            x += 1;
        }
        while x < w {
            let sub = row + (x - r - 1) * CHANNELS;
            for c in 0..CHANNELS {
                val[c] += last[c] as i32 - sp[sub + c] as i32;
                dp[row + x * CHANNELS + c] = (val[c] / r2) as u8;
            }
            x += 1;
        }
    }
}

fn box_blur_v(src: &RgbaImage, dst: &mut RgbaImage, radius: usize) {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let r = radius.min(h.saturating_sub(1));
    let r2 = (2 * r + 1) as i32;
    let stride = w * CHANNELS;
    let sp: &[u8] = src.as_raw();
    let dp: &mut [u8] = &mut **dst;

    for xc in 0..w {
        let col = xc * CHANNELS;
        let mut val = [0i32; CHANNELS];
        let first = &sp[col..col + CHANNELS];
        let last = &sp[(h - 1) * stride + col..(h - 1) * stride + col + CHANNELS];
        for c in 0..CHANNELS {
            val[c] = (r as i32 + 1) * first[c] as i32;
        }
        for y in 0..r {
            for c in 0..CHANNELS {
                val[c] += sp[y * stride + col + c] as i32;
            }
        }

        let mut y = 0usize;
        while y <= r {
            let add = (y + r).min(h - 1) * stride + col;
            for c in 0..CHANNELS {
                val[c] += sp[add + c] as i32 - first[c] as i32;
                dp[y * stride + col + c] = (val[c] / r2) as u8;
            }
            y += 1;
        }
        while y < h.saturating_sub(r) {
            let add = (y + r) * stride + col;
            let sub = (y - r - 1) * stride + col;
            for c in 0..CHANNELS {
                val[c] += sp[add + c] as i32 - sp[sub + c] as i32;
                dp[y * stride + col + c] = (val[c] / r2) as u8;
            }
            y += 1;
        }
        while y < h {
            let sub = (y - r - 1) * stride + col;
            for c in 0..CHANNELS {
                val[c] += last[c] as i32 - sp[sub + c] as i32;
                dp[y * stride + col + c] = (val[c] / r2) as u8;
            }
            y += 1;
        }
    }
}
