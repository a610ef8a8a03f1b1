use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Rgba, RgbImage, RgbaImage};
use log::debug;
use lopdf::{Dictionary, Object, ObjectId, Stream};

use crate::error::RenderError;
use crate::pdf::document::{inherited, resolve};
use crate::pdf::PdfDocument;

/// Output bitmaps are capped on each side.
const MAX_DIMENSION: u32 = 8192;

/// Turns one page of a document into pixels.
///
/// Implementations run on blocking worker threads.
pub trait PageRasterizer: Send + Sync {
    fn page_count(&self) -> u32;

    /// Page box in points for the 1-based `page`.
    fn page_size(&self, page: u32) -> Option<(f32, f32)>;

    fn rasterize(&self, page: u32, scale: f32) -> Result<RgbaImage, RenderError>;
}

/// Renders scanned documents: each page shows its largest embedded image stretched
/// over the page box. Pages without a decodable image come out blank.
pub struct ScanRasterizer {
    pdf: PdfDocument,
    pages: Vec<ObjectId>,
}

impl ScanRasterizer {
    pub fn new(pdf: PdfDocument) -> Self {
        let pages = pdf.page_ids().into_iter().map(|(_, id)| id).collect();
        ScanRasterizer { pdf, pages }
    }

    fn page_id(&self, page: u32) -> Result<ObjectId, RenderError> {
        page.checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .copied()
            .ok_or_else(|| RenderError::Failed {
                page,
                reason: format!("document has {} page(s)", self.pages.len()),
            })
    }

    fn largest_image(&self, page_id: ObjectId) -> Option<Stream> {
        let doc = &self.pdf.doc;
        let resources = inherited(doc, page_id, b"Resources")?;
        let resources = resolve(doc, &resources)?.as_dict().ok()?;
        let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?.as_dict().ok()?;

        xobjects
            .iter()
            .filter_map(|(_, value)| resolve(doc, value)?.as_stream().ok())
            .filter(|stream| {
                matches!(stream.dict.get(b"Subtype").and_then(Object::as_name), Ok(b"Image"))
            })
            .max_by_key(|stream| {
                let (w, h) = image_dimensions(&stream.dict);
                w as u64 * h as u64
            })
            .cloned()
    }
}

impl PageRasterizer for ScanRasterizer {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_size(&self, page: u32) -> Option<(f32, f32)> {
        let id = self.page_id(page).ok()?;
        Some(self.pdf.page_size(id))
    }

    fn rasterize(&self, page: u32, scale: f32) -> Result<RgbaImage, RenderError> {
        let id = self.page_id(page)?;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(RenderError::Failed {
                page,
                reason: format!("invalid scale {}", scale),
            });
        }
        let (width, height) = self.pdf.page_size(id);
        let target_w = ((width * scale).round() as u32).clamp(1, MAX_DIMENSION);
        let target_h = ((height * scale).round() as u32).clamp(1, MAX_DIMENSION);

        let Some(stream) = self.largest_image(id) else {
            return Ok(blank(target_w, target_h));
        };
        match decode_image(&stream) {
            Some(image) => Ok(imageops::resize(
                &image,
                target_w,
                target_h,
                FilterType::Triangle,
            )),
            None => {
                debug!("Page {} image uses an unsupported encoding", page);
                Ok(blank(target_w, target_h))
            }
        }
    }
}

fn blank(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
}

fn image_dimensions(dict: &Dictionary) -> (u32, u32) {
    let get = |key: &[u8]| {
        dict.get(key)
            .and_then(Object::as_i64)
            .map(|v| v.max(0) as u32)
            .unwrap_or(0)
    };
    (get(b"Width"), get(b"Height"))
}

fn filter_names(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(filters)) => filters
            .iter()
            .filter_map(|f| f.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// JPEG images, or 8-bit RGB and gray samples stored raw or Flate-compressed.
fn decode_image(stream: &Stream) -> Option<RgbaImage> {
    let filters = filter_names(&stream.dict);
    if filters.last().map(Vec::as_slice) == Some(b"DCTDecode".as_slice()) {
        if filters.len() > 1 {
            return None;
        }
        let image = image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).ok()?;
        return Some(image.to_rgba8());
    }

    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }
    let samples = match filters.as_slice() {
        [] => stream.content.clone(),
        [only] if only.as_slice() == b"FlateDecode" => stream.decompressed_content().ok()?,
        _ => return None,
    };

    let (width, height) = image_dimensions(&stream.dict);
    let color_space = stream.dict.get(b"ColorSpace").and_then(Object::as_name).ok()?;
    let image = match color_space {
        b"DeviceRGB" => {
            let len = width as usize * height as usize * 3;
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, samples.get(..len)?.to_vec())?)
        }
        b"DeviceGray" => {
            let len = width as usize * height as usize;
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, samples.get(..len)?.to_vec())?)
        }
        _ => return None,
    };
    Some(image.to_rgba8())
}
