use super::ExportError;
use crate::grades::View;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{Rgb, RgbImage, RgbaImage};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

pub const PAGE_WIDTH_MM: f64 = 210.0;
pub const PAGE_HEIGHT_MM: f64 = 297.0;
pub const MIN_RASTER_SCALE: u32 = 2;
pub const MAX_RASTER_SCALE: u32 = 6;
/// Largest supersampled side; baseline JPEG stops at 65535.
pub const MAX_CAPTURE_SIDE_PX: u32 = 16_384;

const PT_PER_MM: f64 = 72.0 / 25.4;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("render surface is not attached: {}", .0.display())]
    NotAttached(PathBuf),
    #[error("could not decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("render surface produced an empty bitmap")]
    Empty,
    #[error(
        "supersampled bitmap would be {width}x{height} px, limit is {max} per side",
        max = MAX_CAPTURE_SIDE_PX
    )]
    TooLarge { width: u64, height: u64 },
}

/// Something that can hand over the laid-out view as a bitmap.
pub trait RenderSurface {
    /// Bitmap of the view supersampled by `scale`.
    fn capture(&self, scale: u32) -> Result<RgbaImage, CaptureError>;
}

fn supersample(img: RgbaImage, scale: u32) -> Result<RgbaImage, CaptureError> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(CaptureError::Empty);
    }
    let factor = u64::from(scale.max(1));
    let (width, height) = (u64::from(w) * factor, u64::from(h) * factor);
    let limit = u64::from(MAX_CAPTURE_SIDE_PX);
    if width > limit || height > limit {
        return Err(CaptureError::TooLarge { width, height });
    }
    if factor == 1 {
        return Ok(img);
    }
    Ok(image::imageops::resize(
        &img,
        width as u32,
        height as u32,
        FilterType::CatmullRom,
    ))
}

/// A screenshot the UI wrote to disk at 1x.
#[derive(Debug, Clone)]
pub struct ImageFileSurface {
    pub path: PathBuf,
}

impl ImageFileSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RenderSurface for ImageFileSurface {
    fn capture(&self, scale: u32) -> Result<RgbaImage, CaptureError> {
        if !self.path.is_file() {
            return Err(CaptureError::NotAttached(self.path.clone()));
        }
        let img = image::open(&self.path).map_err(|source| CaptureError::Decode {
            path: self.path.clone(),
            source,
        })?;
        supersample(img.to_rgba8(), scale)
    }
}

/// What to do with a capture taller than the page once scaled to its width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Keep full width and let the page edge cut the bottom off.
    Clip,
    /// Shrink to the page height and center horizontally.
    Fit,
}

impl Overflow {
    pub fn for_view(view: View) -> Self {
        match view {
            View::Report => Overflow::Clip,
            View::Record => Overflow::Fit,
        }
    }
}

/// Image rectangle on the page in millimetres, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub x_mm: f64,
    pub y_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
}

pub fn place_on_page(width_px: u32, height_px: u32, overflow: Overflow) -> Placement {
    let w = f64::from(width_px.max(1));
    let h = f64::from(height_px);
    let scaled_h = h * PAGE_WIDTH_MM / w;

    if scaled_h < PAGE_HEIGHT_MM {
        return Placement {
            x_mm: 0.0,
            y_mm: (PAGE_HEIGHT_MM - scaled_h) / 2.0,
            width_mm: PAGE_WIDTH_MM,
            height_mm: scaled_h,
        };
    }
    match overflow {
        Overflow::Clip => Placement {
            x_mm: 0.0,
            y_mm: 0.0,
            width_mm: PAGE_WIDTH_MM,
            height_mm: scaled_h,
        },
        Overflow::Fit => {
            let fit_w = w * PAGE_HEIGHT_MM / h.max(1.0);
            Placement {
                x_mm: (PAGE_WIDTH_MM - fit_w) / 2.0,
                y_mm: 0.0,
                width_mm: fit_w,
                height_mm: PAGE_HEIGHT_MM,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    pub scale: u32,
    pub jpeg_quality: u8,
}

fn flatten_on_white(img: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(img.width(), img.height());
    for (x, y, px) in img.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = u32::from(a);
        let blend = |c: u8| -> u8 { ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8 };
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

fn pdf_text_utf16(s: &str) -> String {
    let mut hex = String::from("<FEFF");
    for unit in s.encode_utf16() {
        hex.push_str(&format!("{:04X}", unit));
    }
    hex.push('>');
    hex
}

fn fmt_num(v: f64) -> String {
    let s = format!("{:.2}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Lays `jpeg` out on one A4 page at `placement` and serializes the file.
fn write_pdf(
    jpeg: &[u8],
    width_px: u32,
    height_px: u32,
    placement: Placement,
    title: &str,
) -> Result<Vec<u8>, std::io::Error> {
    let page_w = PAGE_WIDTH_MM * PT_PER_MM;
    let page_h = PAGE_HEIGHT_MM * PT_PER_MM;
    let w = placement.width_mm * PT_PER_MM;
    let h = placement.height_mm * PT_PER_MM;
    let x = placement.x_mm * PT_PER_MM;
    let y = page_h - placement.y_mm * PT_PER_MM - h;
    let content = format!(
        "q {} 0 0 {} {} {} cm /Im0 Do Q",
        fmt_num(w),
        fmt_num(h),
        fmt_num(x),
        fmt_num(y)
    );

    let mut objects: Vec<Vec<u8>> = Vec::with_capacity(6);
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    objects.push(b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec());
    objects.push(
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>",
            fmt_num(page_w),
            fmt_num(page_h)
        )
        .into_bytes(),
    );
    let mut image_obj = format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
        width_px,
        height_px,
        jpeg.len()
    )
    .into_bytes();
    image_obj.extend_from_slice(jpeg);
    image_obj.extend_from_slice(b"\nendstream");
    objects.push(image_obj);
    objects.push(
        format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        )
        .into_bytes(),
    );
    objects.push(
        format!(
            "<< /Title {} /Producer (boletimd {}) >>",
            pdf_text_utf16(title),
            env!("CARGO_PKG_VERSION")
        )
        .into_bytes(),
    );

    let mut out: Vec<u8> = Vec::with_capacity(jpeg.len() + 2048);
    out.write_all(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n")?;
    let mut offsets = Vec::with_capacity(objects.len());
    for (idx, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        write!(out, "{} 0 obj\n", idx + 1)?;
        out.write_all(body)?;
        out.write_all(b"\nendobj\n")?;
    }
    let xref_at = out.len();
    write!(out, "xref\n0 {}\n", objects.len() + 1)?;
    out.write_all(b"0000000000 65535 f \n")?;
    for off in &offsets {
        write!(out, "{:010} 00000 n \n", off)?;
    }
    write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        objects.len(),
        xref_at
    )?;
    Ok(out)
}

/// Captures `surface` and returns the one-page document plus where the
/// image landed on the page.
pub fn render_pdf(
    surface: &dyn RenderSurface,
    view: View,
    title: &str,
    opts: RasterOptions,
) -> Result<(Vec<u8>, Placement), ExportError> {
    if !(MIN_RASTER_SCALE..=MAX_RASTER_SCALE).contains(&opts.scale) {
        return Err(ExportError::InvalidScale {
            min: MIN_RASTER_SCALE,
            max: MAX_RASTER_SCALE,
            got: opts.scale,
        });
    }
    let bitmap = surface.capture(opts.scale)?;
    let (w, h) = bitmap.dimensions();
    let rgb = flatten_on_white(&bitmap);

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, opts.jpeg_quality).encode_image(&rgb)?;

    let placement = place_on_page(w, h, Overflow::for_view(view));
    tracing::debug!(
        width_px = w,
        height_px = h,
        scale = opts.scale,
        y_mm = placement.y_mm,
        height_mm = placement.height_mm,
        "raster captured"
    );
    let bytes = write_pdf(&jpeg, w, h, placement, title)?;
    Ok((bytes, placement))
}
