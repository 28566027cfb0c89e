//! In-process PDF editing.
//!
//! Everything here works on the object graph through `lopdf`; no external
//! tool is involved.

pub mod annotations;
pub mod content;
pub mod images;

use std::path::Path;

use lopdf::{Document, Object, ObjectId};
use thiserror::Error;
use tracing::warn;

pub use annotations::strip_annotations;
pub use content::{append_page_content, register_resource};
pub use images::{ImageXObject, embed_image, embed_jpeg, embed_png};

/// US Letter, used when a page has no usable MediaBox
const DEFAULT_PAGE_BOX: PageBox = PageBox {
    x: 0.0,
    y: 0.0,
    width: 612.0,
    height: 792.0,
};

/// Guard against malformed, cyclic page trees
const MAX_TREE_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("PDF structure error")]
    Structure(#[from] lopdf::Error),

    #[error("Image decoding failed")]
    Image(#[from] ::image::ImageError),

    #[error("{0}")]
    Invalid(String),
}

pub type PdfResult<T> = Result<T, PdfError>;

/// Visible page rectangle in PDF user space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Load a PDF from disk
pub fn load_document(path: &Path) -> PdfResult<Document> {
    Ok(Document::load(path)?)
}

/// Write a PDF to disk
pub fn save_document(doc: &mut Document, path: &Path) -> PdfResult<()> {
    doc.save(path)
        .map_err(|e| PdfError::Invalid(format!("failed to write {}: {}", path.display(), e)))?;
    Ok(())
}

pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn box_values(doc: &Document, obj: &Object) -> Option<(f32, f32, f32, f32)> {
    let arr = match obj {
        Object::Array(arr) => arr,
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
        _ => return None,
    };
    let values: Vec<f32> = arr.iter().filter_map(number).collect();
    if values.len() == 4 {
        Some((values[0], values[1], values[2], values[3]))
    } else {
        None
    }
}

/// Look up a page attribute, following the `Parent` chain for inherited keys
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node_id = page_id;
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(node_id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        node_id = node.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

/// Page size from its (possibly inherited) MediaBox
pub fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    inherited_attribute(doc, page_id, b"MediaBox")
        .and_then(|obj| box_values(doc, obj))
        .map(|(llx, lly, urx, ury)| PageBox {
            x: llx.min(urx),
            y: lly.min(ury),
            width: (urx - llx).abs(),
            height: (ury - lly).abs(),
        })
        .unwrap_or_else(|| {
            warn!(?page_id, "Page has no usable MediaBox, assuming Letter");
            DEFAULT_PAGE_BOX
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};
    use std::path::Path;

    /// Build an N-page document; every page shares an inherited MediaBox.
    pub(crate) fn sample_document(pages: usize, width: f32, height: f32, annotated: bool) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for i in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), Object::Integer(24)]),
                    Operation::new("Td", vec![Object::Integer(72), Object::Integer(700)]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Page {}", i + 1))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if annotated {
                let annot_id = doc.add_object(dictionary! {
                    "Type" => "Annot",
                    "Subtype" => "FreeText",
                    "Rect" => vec![Object::Integer(10), Object::Integer(10), Object::Integer(300), Object::Integer(60)],
                    "Contents" => Object::string_literal("SAMPLE WATERMARK"),
                });
                page.set("Annots", vec![Object::Reference(annot_id)]);
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(pages as i64),
            "Resources" => resources_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Real(width), Object::Real(height)],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    pub(crate) fn write_sample_pdf(path: &Path, pages: usize, annotated: bool) {
        let mut doc = sample_document(pages, 600.0, 800.0, annotated);
        doc.save(path).unwrap();
    }

    /// A small RGBA PNG with a transparent corner
    pub(crate) fn write_sample_png(path: &Path) {
        let mut img = ::image::RgbaImage::from_pixel(8, 4, ::image::Rgba([200, 30, 30, 255]));
        img.put_pixel(0, 0, ::image::Rgba([0, 0, 0, 0]));
        img.save(path).unwrap();
    }

    pub(crate) fn write_sample_jpeg(path: &Path) {
        let img = ::image::RgbImage::from_pixel(6, 6, ::image::Rgb([10, 120, 200]));
        img.save(path).unwrap();
    }
}
