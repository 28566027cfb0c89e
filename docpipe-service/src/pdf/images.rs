//! Raster image embedding as image XObjects.

use std::io::Cursor;

use image::{ColorType, DynamicImage, ImageFormat, ImageReader};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

use super::{PdfError, PdfResult};

/// An image XObject added to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageXObject {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
}

/// Embed PNG or JPEG bytes, dispatching on the detected format
pub fn embed_image(doc: &mut Document, bytes: &[u8]) -> PdfResult<ImageXObject> {
    match image::guess_format(bytes)? {
        ImageFormat::Png => embed_png(doc, bytes),
        ImageFormat::Jpeg => embed_jpeg(doc, bytes),
        other => Err(PdfError::Invalid(format!(
            "unsupported image format: {:?}",
            other
        ))),
    }
}

/// Embed a PNG as flate-compressed RGB, with an SMask when it carries alpha
pub fn embed_png(doc: &mut Document, bytes: &[u8]) -> PdfResult<ImageXObject> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok(embed_decoded(doc, img))
}

/// Embed a JPEG as-is through `DCTDecode`
pub fn embed_jpeg(doc: &mut Document, bytes: &[u8]) -> PdfResult<ImageXObject> {
    let img = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Jpeg).decode()?;
    let color_space = match img.color() {
        ColorType::L8 | ColorType::L16 => "DeviceGray",
        ColorType::Rgb8 | ColorType::Rgb16 => "DeviceRGB",
        // Anything exotic gets re-encoded rather than passed through
        _ => return Ok(embed_decoded(doc, img)),
    };

    let (width, height) = (img.width(), img.height());
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(width as i64),
        "Height" => Object::Integer(height as i64),
        "ColorSpace" => color_space,
        "BitsPerComponent" => Object::Integer(8),
        "Filter" => "DCTDecode",
    };
    let id = doc.add_object(Stream::new(dict, bytes.to_vec()));
    Ok(ImageXObject { id, width, height })
}

fn embed_decoded(doc: &mut Document, img: DynamicImage) -> ImageXObject {
    let (width, height) = (img.width(), img.height());
    let rgba = img.to_rgba8();

    let smask = if rgba.pixels().any(|p| p[3] < u8::MAX) {
        let alpha: Vec<u8> = rgba.pixels().map(|p| p[3]).collect();
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(width as i64),
                "Height" => Object::Integer(height as i64),
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => Object::Integer(8),
            },
            alpha,
        );
        stream.compress().ok();
        Some(doc.add_object(stream))
    } else {
        None
    };

    let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8().into_raw();
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(width as i64),
        "Height" => Object::Integer(height as i64),
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => Object::Integer(8),
    };
    if let Some(mask_id) = smask {
        dict.set("SMask", Object::Reference(mask_id));
    }
    let mut stream = Stream::new(dict, rgb);
    stream.compress().ok();

    ImageXObject {
        id: doc.add_object(stream),
        width,
        height,
    }
}
