//! vision_core: raster panels for training diagnostics (colormaps, color bars, side-by-side rows).

pub mod panel;
