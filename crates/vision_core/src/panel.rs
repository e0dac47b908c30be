use image::{Rgb, RgbImage};
use thiserror::Error;

/// Background used between composed panels.
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PanelError {
    #[error("buffer holds {actual} values, expected {expected} ({channels}x{height}x{width})")]
    BufferSize {
        expected: usize,
        actual: usize,
        channels: usize,
        width: u32,
        height: u32,
    },
    #[error("unsupported channel count {0}; expected 1, 3 or 4")]
    Channels(usize),
    #[error("panel has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Scalar-to-color mapping for single-channel panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Colormap {
    #[default]
    Gray,
    Viridis,
}

const VIRIDIS: [[f32; 3]; 5] = [
    [68.0, 1.0, 84.0],
    [59.0, 82.0, 139.0],
    [33.0, 145.0, 140.0],
    [94.0, 201.0, 98.0],
    [253.0, 231.0, 37.0],
];

impl Colormap {
    /// Map `t` in 0..1 (clamped) to a color.
    pub fn map(self, t: f32) -> Rgb<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Colormap::Gray => {
                let v = to_u8(t);
                Rgb([v, v, v])
            }
            Colormap::Viridis => {
                let scaled = t * (VIRIDIS.len() - 1) as f32;
                let lo = (scaled.floor() as usize).min(VIRIDIS.len() - 1);
                let hi = (lo + 1).min(VIRIDIS.len() - 1);
                let frac = scaled - lo as f32;
                let mut out = [0u8; 3];
                for (c, v) in out.iter_mut().enumerate() {
                    let a = VIRIDIS[lo][c];
                    let b = VIRIDIS[hi][c];
                    *v = (a + (b - a) * frac).round() as u8;
                }
                Rgb(out)
            }
        }
    }
}

fn to_u8(t: f32) -> u8 {
    (t * 255.0).round().clamp(0.0, 255.0) as u8
}

fn check_len(
    values: &[f32],
    channels: usize,
    width: u32,
    height: u32,
) -> Result<(), PanelError> {
    if width == 0 || height == 0 {
        return Err(PanelError::Empty { width, height });
    }
    let expected = channels * width as usize * height as usize;
    if values.len() != expected {
        return Err(PanelError::BufferSize {
            expected,
            actual: values.len(),
            channels,
            width,
            height,
        });
    }
    Ok(())
}

/// Finite min/max of `values`; `None` when nothing is finite.
pub fn value_range(values: &[f32]) -> Option<(f32, f32)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Render a row-major `height x width` scalar buffer, min-max scaled into the colormap.
///
/// A constant buffer maps to the bottom of the colormap.
pub fn scalar_panel(
    values: &[f32],
    width: u32,
    height: u32,
    cmap: Colormap,
) -> Result<RgbImage, PanelError> {
    check_len(values, 1, width, height)?;
    let (lo, hi) = value_range(values).unwrap_or((0.0, 0.0));
    let span = hi - lo;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = values[(y * width + x) as usize];
        let t = if span > 0.0 { (v - lo) / span } else { 0.0 };
        cmap.map(t)
    }))
}

/// Render a CHW buffer as an image.
///
/// Three or four channels are read as RGB(A) intensities in 0..1 and clamped; alpha is dropped.
/// A single channel is min-max scaled to gray.
pub fn rgb_from_chw(
    chw: &[f32],
    channels: usize,
    width: u32,
    height: u32,
) -> Result<RgbImage, PanelError> {
    match channels {
        1 => scalar_panel(chw, width, height, Colormap::Gray),
        3 | 4 => {
            check_len(chw, channels, width, height)?;
            let plane = width as usize * height as usize;
            Ok(RgbImage::from_fn(width, height, |x, y| {
                let i = (y * width + x) as usize;
                Rgb([
                    to_u8(chw[i].clamp(0.0, 1.0)),
                    to_u8(chw[plane + i].clamp(0.0, 1.0)),
                    to_u8(chw[2 * plane + i].clamp(0.0, 1.0)),
                ])
            }))
        }
        other => Err(PanelError::Channels(other)),
    }
}

/// Render an interleaved HWC RGB buffer (intensities in 0..1).
pub fn rgb_from_hwc(hwc: &[f32], width: u32, height: u32) -> Result<RgbImage, PanelError> {
    check_len(hwc, 3, width, height)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let base = (y * width + x) as usize * 3;
        Rgb([
            to_u8(hwc[base].clamp(0.0, 1.0)),
            to_u8(hwc[base + 1].clamp(0.0, 1.0)),
            to_u8(hwc[base + 2].clamp(0.0, 1.0)),
        ])
    }))
}

/// Vertical intensity bar, maximum at the top.
pub fn colorbar(width: u32, height: u32, cmap: Colormap) -> RgbImage {
    let denom = height.saturating_sub(1).max(1) as f32;
    RgbImage::from_fn(width, height, |_x, y| cmap.map(1.0 - y as f32 / denom))
}

/// Place panels left to right, separated by `gutter` pixels, vertically centered.
pub fn compose_row(panels: &[RgbImage], gutter: u32, background: Rgb<u8>) -> RgbImage {
    if panels.is_empty() {
        return RgbImage::new(0, 0);
    }
    let width = panels.iter().map(|p| p.width()).sum::<u32>()
        + gutter * (panels.len() as u32 - 1);
    let height = panels.iter().map(|p| p.height()).max().unwrap_or(0);
    let mut canvas = RgbImage::from_pixel(width, height, background);
    let mut x0 = 0u32;
    for panel in panels {
        let y0 = (height - panel.height()) / 2;
        image::imageops::replace(&mut canvas, panel, x0 as i64, y0 as i64);
        x0 += panel.width() + gutter;
    }
    canvas
}

/// Append a color bar (a twentieth of the panel width, at least 4px) to the right of `panel`.
pub fn with_colorbar(panel: RgbImage, cmap: Colormap) -> RgbImage {
    let bar_width = (panel.width() / 20).max(4);
    let gap = (bar_width / 2).max(2);
    let bar = colorbar(bar_width, panel.height(), cmap);
    compose_row(&[panel, bar], gap, WHITE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viridis_endpoints() {
        assert_eq!(Colormap::Viridis.map(0.0), Rgb([68, 1, 84]));
        assert_eq!(Colormap::Viridis.map(1.0), Rgb([253, 231, 37]));
        assert_eq!(Colormap::Viridis.map(f32::NAN), Rgb([68, 1, 84]));
    }

    #[test]
    fn value_range_skips_non_finite() {
        assert_eq!(value_range(&[f32::NAN, 2.0, -1.0, f32::INFINITY]), Some((-1.0, 2.0)));
        assert_eq!(value_range(&[]), None);
    }
}
