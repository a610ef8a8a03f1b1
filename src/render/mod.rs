//! Page previews: rasterizers, a shared priority scheduler and per-surface renders.

pub mod rasterizer;
pub mod scheduler;
pub mod surface;

use std::sync::Arc;

pub use rasterizer::{PageRasterizer, ScanRasterizer};
pub use scheduler::RenderScheduler;
pub use surface::{RenderOutcome, SurfaceRenderer};

/// Rendered pages are shared between every caller that asked for them.
pub type Bitmap = Arc<image::RgbaImage>;

/// Scale used for scheduled renders.
pub const DEFAULT_SCALE: f32 = 2.0;

/// Cache key for one page of one open document.
pub fn render_id(document: &str, page: u32) -> String {
    format!("{}#{}", document, page)
}
