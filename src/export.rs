use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};

use crate::capture::decode_data_url;
use crate::error::{Result, SignError};
use crate::field::{FieldType, SignatureField};
use crate::geometry::{FitTransform, PageDims, Rect};
use crate::source::PageSource;

pub const DEFAULT_RENDER_SCALE: f64 = 2.0;
pub const DEFAULT_DATE_FONT_SIZE: f64 = 12.0;

/// Helvetica cap height, in text-space units per unit of font size.
const HELVETICA_CAP_HEIGHT: f64 = 0.718;

/// How output pages are sized. One policy applies to a whole export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PagePolicy {
    /// Each output page has its source page's native size.
    MatchSource,
    /// Every source page is scaled uniformly and centered on a fixed page.
    Fit { width: f64, height: f64 },
}

impl Default for PagePolicy {
    fn default() -> Self {
        PagePolicy::Fit {
            width: PageDims::A4.width,
            height: PageDims::A4.height,
        }
    }
}

impl PagePolicy {
    pub fn transform(&self, native: PageDims) -> FitTransform {
        match *self {
            PagePolicy::MatchSource => FitTransform::identity(native),
            PagePolicy::Fit { width, height } => {
                FitTransform::fit(native, PageDims::new(width, height))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    /// Pixels per point used when rasterizing source pages.
    pub render_scale: f64,
    pub policy: PagePolicy,
    /// Date text size before the fit scale is applied.
    pub date_font_size: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            render_scale: DEFAULT_RENDER_SCALE,
            policy: PagePolicy::default(),
            date_font_size: DEFAULT_DATE_FONT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    pub page: usize,
    pub total: usize,
}

/// A finished signed document. Every consumer (download, upload) reads the
/// same byte buffer.
#[derive(Debug, Clone)]
pub struct SignedPdf {
    bytes: Vec<u8>,
    page_count: usize,
}

impl SignedPdf {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        log::info!("Wrote signed PDF ({} bytes) to {}", self.bytes.len(), path.display());
        Ok(())
    }
}

/// Default file name for a signed document.
pub fn signed_file_name(timestamp_ms: i64) -> String {
    format!("signed-document-{}.pdf", timestamp_ms)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn image_xobject(width: u32, height: u32, color_space: &str, data: &[u8]) -> Result<Stream> {
    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        deflate(data)?,
    ))
}

/// Embed a field image (PNG/JPEG data URL) with its alpha channel as an SMask.
fn embed_field_image(doc: &mut Document, data_url: &str) -> Result<ObjectId> {
    let bytes = decode_data_url(data_url)?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| SignError::InvalidImage(e.to_string()))?
        .to_rgba8();
    let (w, h) = img.dimensions();
    let mut rgb = Vec::with_capacity((w * h * 3) as usize);
    let mut alpha = Vec::with_capacity((w * h) as usize);
    for pixel in img.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel[3]);
    }

    let smask_id = doc.add_object(image_xobject(w, h, "DeviceGray", &alpha)?);
    let mut stream = image_xobject(w, h, "DeviceRGB", &rgb)?;
    stream.dict.set("SMask", smask_id);
    Ok(doc.add_object(stream))
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

/// Draw XObject `name` into `r`, where `r` is in top-left output coordinates.
fn draw_xobject(ops: &mut Vec<Operation>, name: &str, r: Rect, page_height: f64) {
    let pdf_y = page_height - r.y - r.height;
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "cm",
        vec![
            real(r.width),
            real(0.0),
            real(0.0),
            real(r.height),
            real(r.x),
            real(pdf_y),
        ],
    ));
    ops.push(Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]));
    ops.push(Operation::new("Q", vec![]));
}

/// Standard Helvetica advance widths (per 1000 units) for the characters a
/// date can contain.
fn helvetica_advance(c: char) -> u32 {
    match c {
        '0'..='9' => 556,
        '/' | ' ' | '.' | ',' => 278,
        '-' => 333,
        _ => 556,
    }
}

pub fn helvetica_text_width(text: &str, size: f64) -> f64 {
    text.chars().map(helvetica_advance).sum::<u32>() as f64 * size / 1000.0
}

fn draw_centered_text(ops: &mut Vec<Operation>, text: &str, size: f64, r: Rect, page_height: f64) {
    let x = r.x + (r.width - helvetica_text_width(text, size)) / 2.0;
    let center_y = page_height - (r.y + r.height / 2.0);
    let baseline = center_y - size * HELVETICA_CAP_HEIGHT / 2.0;
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(b"F1".to_vec()), real(size)],
    ));
    ops.push(Operation::new("rg", vec![real(0.0), real(0.0), real(0.0)]));
    ops.push(Operation::new("Td", vec![real(x), real(baseline)]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
}

/// Rasterize every page of `source`, fit it to the output page, and overlay
/// every filled field on its page. Fails as a whole if any page fails.
pub fn render_signed_pdf(
    source: &dyn PageSource,
    fields: &[SignatureField],
    options: &ExportOptions,
    progress: &mut dyn FnMut(ExportProgress),
) -> Result<SignedPdf> {
    let total = source.page_count();
    if total == 0 {
        return Err(SignError::NoDocument);
    }

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    // Identical captures share one XObject across fields and pages.
    let mut embedded: HashMap<&str, ObjectId> = HashMap::new();
    let mut kids = Vec::with_capacity(total);

    for page in 1..=total {
        let native = source.page_size(page)?;
        let fit = options.policy.transform(native);
        let raster = source.rasterize(page, options.render_scale)?;
        let expected = raster.width as usize * raster.height as usize * 3;
        if raster.rgb.len() != expected {
            return Err(SignError::Render {
                page,
                reason: format!("raster is {} bytes, expected {}", raster.rgb.len(), expected),
            });
        }

        let page_image_id =
            doc.add_object(image_xobject(raster.width, raster.height, "DeviceRGB", &raster.rgb)?);
        let mut xobjects = Dictionary::new();
        xobjects.set("Pg", page_image_id);

        let out_h = fit.output.height;
        let mut ops = Vec::new();
        draw_xobject(&mut ops, "Pg", fit.page_box(native), out_h);

        let mut overlays = 0;
        for field in fields.iter().filter(|f| f.page == page) {
            let Some(value) = field.filled_value() else {
                continue;
            };
            let placed = fit.place(field.bounds());
            if field.field_type == FieldType::Date {
                let size = options.date_font_size * fit.scale;
                draw_centered_text(&mut ops, value, size, placed, out_h);
            } else {
                let id = match embedded.get(value) {
                    Some(id) => *id,
                    None => {
                        let id = embed_field_image(&mut doc, value)?;
                        embedded.insert(value, id);
                        id
                    }
                };
                let name = format!("Im{}", id.0);
                xobjects.set(name.as_bytes().to_vec(), id);
                draw_xobject(&mut ops, &name, placed, out_h);
            }
            overlays += 1;
        }

        let content = Content { operations: ops }.encode()?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![real(0.0), real(0.0), real(fit.output.width), real(out_h)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => xobjects,
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(Object::Reference(page_id));

        log::info!(
            "Rendered page {}/{} ({}x{} px, {} overlay(s))",
            page,
            total,
            raster.width,
            raster.height,
            overlays
        );
        progress(ExportProgress { page, total });
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(SignedPdf {
        bytes,
        page_count: total,
    })
}

/// First page as a small PNG, base64 encoded, for upload previews.
pub fn thumbnail(source: &dyn PageSource, max_edge: u32) -> Result<String> {
    let native = source.page_size(1)?;
    let longest = native.width.max(native.height);
    let raster = source.rasterize(1, max_edge as f64 / longest)?;
    let img = image::RgbImage::from_raw(raster.width, raster.height, raster.rgb).ok_or(
        SignError::Render {
            page: 1,
            reason: "thumbnail buffer size mismatch".into(),
        },
    )?;
    let mut png = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| SignError::Output(e.to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png.get_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::encode_png_data_url;
    use crate::source::tests::png_page;
    use crate::source::{DocumentSource, PageImage};
    use crate::store::FieldStore;

    fn letter_source(pages: usize) -> Box<dyn PageSource> {
        let images = (0..pages)
            .map(|_| PageImage {
                encoded: png_page(61, 79, [250, 250, 250]),
                native: None,
            })
            .collect();
        DocumentSource::from_images(images).open().unwrap()
    }

    fn signature_url() -> String {
        encode_png_data_url(&png_page(55, 20, [0, 0, 0]))
    }

    fn media_box(doc: &Document, page_id: ObjectId) -> Vec<f64> {
        doc.get_object(page_id)
            .and_then(|o| o.as_dict())
            .and_then(|d| d.get(b"MediaBox"))
            .and_then(|o| o.as_array())
            .unwrap()
            .iter()
            .map(|o| o.as_float().unwrap() as f64)
            .collect()
    }

    fn opts(policy: PagePolicy) -> ExportOptions {
        ExportOptions {
            render_scale: 1.0,
            policy,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_to_a4() {
        let source = letter_source(2);
        let mut store = FieldStore::new();
        let s = store.add_field(100.0, 100.0, 2, FieldType::Signature);
        store.add_field(300.0, 600.0, 1, FieldType::Date);
        store.fill_field(&s, &signature_url());

        let mut seen = Vec::new();
        let pdf = render_signed_pdf(
            source.as_ref(),
            store.fields(),
            &opts(PagePolicy::default()),
            &mut |p| seen.push(p),
        )
        .unwrap();
        assert_eq!(pdf.page_count(), 2);
        assert_eq!(
            seen,
            vec![
                ExportProgress { page: 1, total: 2 },
                ExportProgress { page: 2, total: 2 }
            ]
        );

        let doc = Document::load_mem(pdf.bytes()).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        let mb = media_box(&doc, pages[&1]);
        assert!((mb[2] - 595.28).abs() < 0.01);
        assert!((mb[3] - 841.89).abs() < 0.01);
    }

    #[test]
    fn test_match_source_keeps_native_size() {
        let source = letter_source(1);
        let pdf =
            render_signed_pdf(source.as_ref(), &[], &opts(PagePolicy::MatchSource), &mut |_| {})
                .unwrap();
        let doc = Document::load_mem(pdf.bytes()).unwrap();
        let mb = media_box(&doc, doc.get_pages()[&1]);
        assert_eq!(mb, vec![0.0, 0.0, 612.0, 792.0]);
    }

    #[test]
    fn test_signature_placed_at_scaled_position() {
        let source = letter_source(1);
        let mut store = FieldStore::new();
        let s = store.add_field(100.0, 100.0, 1, FieldType::Signature);
        store.fill_field(&s, &signature_url());

        let pdf = render_signed_pdf(
            source.as_ref(),
            store.fields(),
            &opts(PagePolicy::default()),
            &mut |_| {},
        )
        .unwrap();
        let doc = Document::load_mem(pdf.bytes()).unwrap();
        let page_id = doc.get_pages()[&1];
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();

        let fit = FitTransform::fit(PageDims::US_LETTER, PageDims::A4);
        let expected = fit.place(Rect::new(100.0, 100.0, 180.0, 50.0));
        let cms: Vec<Vec<f64>> = content
            .operations
            .iter()
            .filter(|op| op.operator == "cm")
            .map(|op| op.operands.iter().map(|o| o.as_float().unwrap() as f64).collect())
            .collect();
        // Page image first, then the signature.
        assert_eq!(cms.len(), 2);
        let sig = &cms[1];
        assert!((sig[0] - expected.width).abs() < 0.01);
        assert!((sig[3] - expected.height).abs() < 0.01);
        assert!((sig[4] - expected.x).abs() < 0.01);
        assert!((sig[5] - (841.89 - expected.y - expected.height)).abs() < 0.01);
    }

    #[test]
    fn test_unfilled_fields_are_not_drawn() {
        let source = letter_source(1);
        let mut store = FieldStore::new();
        store.add_field(10.0, 10.0, 1, FieldType::Signature);
        let pdf = render_signed_pdf(
            source.as_ref(),
            store.fields(),
            &opts(PagePolicy::MatchSource),
            &mut |_| {},
        )
        .unwrap();
        let doc = Document::load_mem(pdf.bytes()).unwrap();
        let content =
            Content::decode(&doc.get_page_content(doc.get_pages()[&1]).unwrap()).unwrap();
        assert_eq!(
            content.operations.iter().filter(|op| op.operator == "Do").count(),
            1
        );
    }

    #[test]
    fn test_output_is_deterministic() {
        let source = letter_source(1);
        let mut store = FieldStore::new();
        let s = store.add_field(10.0, 10.0, 1, FieldType::Initial);
        store.fill_field(&s, &signature_url());
        let a = render_signed_pdf(source.as_ref(), store.fields(), &opts(PagePolicy::default()), &mut |_| {})
            .unwrap();
        let b = render_signed_pdf(source.as_ref(), store.fields(), &opts(PagePolicy::default()), &mut |_| {})
            .unwrap();
        assert_eq!(a.bytes(), b.bytes());
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(a.to_base64())
            .unwrap();
        assert_eq!(decoded, a.bytes());
    }

    #[test]
    fn test_bad_field_image_aborts_export() {
        let source = letter_source(1);
        let mut store = FieldStore::new();
        let s = store.add_field(10.0, 10.0, 1, FieldType::Signature);
        store.fill_field(&s, "data:image/png;base64,bm90IGEgcG5n");
        let result = render_signed_pdf(
            source.as_ref(),
            store.fields(),
            &opts(PagePolicy::default()),
            &mut |_| {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unreadable_source_page_aborts_export() {
        let pages = vec![
            PageImage {
                encoded: png_page(61, 79, [250, 250, 250]),
                native: None,
            },
            PageImage {
                encoded: b"not an image".to_vec(),
                native: None,
            },
        ];
        let source = DocumentSource::from_images(pages).open().unwrap();
        let mut seen = Vec::new();
        let err = render_signed_pdf(
            source.as_ref(),
            &[],
            &opts(PagePolicy::default()),
            &mut |p| seen.push(p.page),
        )
        .unwrap_err();
        assert!(matches!(err, SignError::Render { page: 2, .. }));
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_date_text_width() {
        // "10/18/2026": 8 digits + 2 slashes.
        let w = helvetica_text_width("10/18/2026", 10.0);
        assert!((w - (8.0 * 556.0 + 2.0 * 278.0) / 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_thumbnail_is_png() {
        let source = letter_source(1);
        let b64 = thumbnail(source.as_ref(), 100).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.height(), 100);
    }
}
