//! Watermark stamping, done entirely in-process.

use std::path::{Path, PathBuf};

use lopdf::content::Operation;
use lopdf::{Document, Object, ObjectId, StringFormat, dictionary};
use tracing::{info, warn};

use crate::artifacts::ensure_dir;
use crate::error::{PipelineError, PipelineResult, format_error_chain};
use crate::job::{JobOutput, extension_of, file_name_of};
use crate::pdf::{
    self, ImageXObject, PageBox, PdfError, append_page_content, register_resource,
};
use crate::watermark::{WatermarkConfig, WatermarkKind, anchor_origin, estimate_text_width};

use super::{DocumentPipeline, check_source, clear_stale, ensure_distinct};

const GRAPHICS_STATE_NAME: &str = "DpWmGS";
const FONT_NAME: &str = "DpWmF";
const IMAGE_NAME: &str = "DpWmIm";

fn watermark_error(e: PdfError) -> PipelineError {
    PipelineError::Watermark {
        message: format_error_chain(&e),
    }
}

/// Encode text for a WinAnsi-encoded standard font; unmappable characters
/// become `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            code @ 0x20..=0x7e | code @ 0xa0..=0xff => code as u8,
            _ => b'?',
        })
        .collect()
}

/// `cm` operands rotating by `degrees` around the draw origin `(x, y)`
fn placement_matrix(degrees: f32, x: f32, y: f32) -> Vec<Object> {
    let (sin, cos) = degrees.to_radians().sin_cos();
    vec![
        Object::Real(cos),
        Object::Real(sin),
        Object::Real(-sin),
        Object::Real(cos),
        Object::Real(x),
        Object::Real(y),
    ]
}

fn text_operations(config: &WatermarkConfig, text: &str, origin: (f32, f32)) -> Vec<Operation> {
    let font_size = config.effective_font_size();
    let color = config.color;
    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(GRAPHICS_STATE_NAME.as_bytes().to_vec())]),
        Operation::new(
            "cm",
            placement_matrix(config.rotation_degrees, origin.0, origin.1),
        ),
        Operation::new(
            "rg",
            vec![
                Object::Real(color.r),
                Object::Real(color.g),
                Object::Real(color.b),
            ],
        ),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(FONT_NAME.as_bytes().to_vec()), Object::Real(font_size)],
        ),
        Operation::new("Td", vec![Object::Integer(0), Object::Integer(0)]),
        Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn image_operations(
    config: &WatermarkConfig,
    size: (f32, f32),
    origin: (f32, f32),
) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(GRAPHICS_STATE_NAME.as_bytes().to_vec())]),
        Operation::new(
            "cm",
            placement_matrix(config.rotation_degrees, origin.0, origin.1),
        ),
        Operation::new(
            "cm",
            vec![
                Object::Real(size.0),
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(size.1),
                Object::Integer(0),
                Object::Integer(0),
            ],
        ),
        Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

/// What gets drawn on every selected page
enum Stamp<'a> {
    Text { text: &'a str, font: ObjectId },
    Image(ImageXObject),
}

fn draw_on_page(
    doc: &mut Document,
    page_id: ObjectId,
    config: &WatermarkConfig,
    stamp: &Stamp<'_>,
    graphics_state: ObjectId,
) -> Result<(), PdfError> {
    let page: PageBox = pdf::page_box(doc, page_id);
    register_resource(
        doc,
        page_id,
        "ExtGState",
        GRAPHICS_STATE_NAME,
        Object::Reference(graphics_state),
    )?;

    let operations = match stamp {
        Stamp::Text { text, font } => {
            register_resource(doc, page_id, "Font", FONT_NAME, Object::Reference(*font))?;
            let font_size = config.effective_font_size();
            let width = estimate_text_width(text, font_size);
            let (x, y) = anchor_origin(config.position, page.width, page.height, width, font_size);
            text_operations(config, text, (page.x + x, page.y + y))
        }
        Stamp::Image(image) => {
            register_resource(doc, page_id, "XObject", IMAGE_NAME, Object::Reference(image.id))?;
            let width = image.width as f32 * config.scale;
            let height = image.height as f32 * config.scale;
            let (x, y) = anchor_origin(config.position, page.width, page.height, width, height);
            image_operations(config, (width, height), (page.x + x, page.y + y))
        }
    };

    append_page_content(doc, page_id, operations)
}

/// Stamp the selected pages of `input` and write the result to `output`.
/// Returns the number of pages stamped.
pub(crate) fn stamp_watermark(
    input: &Path,
    output: &Path,
    config: &WatermarkConfig,
) -> PipelineResult<usize> {
    let mut doc = pdf::load_document(input).map_err(watermark_error)?;
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let selected = config.pages.resolve(pages.len());
    if selected.is_empty() {
        warn!(pages = pages.len(), "No requested page exists, output is an unmodified copy");
    }

    let graphics_state = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => Object::Real(config.opacity),
        "CA" => Object::Real(config.opacity),
    });

    // Shared assets are added once and referenced from every page
    let stamp = match config.kind {
        WatermarkKind::Text => Stamp::Text {
            text: config.text.as_deref().unwrap_or_default(),
            font: doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
                "Encoding" => "WinAnsiEncoding",
            }),
        },
        WatermarkKind::Image => {
            let path = config.image_path.as_deref().ok_or_else(|| PipelineError::Watermark {
                message: "image watermark requires an image".to_string(),
            })?;
            let bytes = std::fs::read(path)
                .map_err(|e| PipelineError::io(format!("reading {}", path.display()), e))?;
            let image = match extension_of(path).as_deref() {
                Some("png") => pdf::embed_png(&mut doc, &bytes),
                _ => pdf::embed_jpeg(&mut doc, &bytes),
            }
            .map_err(watermark_error)?;
            Stamp::Image(image)
        }
    };

    for &index in &selected {
        draw_on_page(&mut doc, pages[index], config, &stamp, graphics_state)
            .map_err(watermark_error)?;
    }

    pdf::save_document(&mut doc, output).map_err(watermark_error)?;
    Ok(selected.len())
}

impl DocumentPipeline {
    /// Stamp a text or image watermark, writing
    /// `<output_dir>/watermarked_<input file name>`.
    ///
    /// Requested pages are 1-based; pages beyond the document are ignored.
    pub async fn watermark(
        &self,
        input_path: &Path,
        output_dir: &Path,
        config: &WatermarkConfig,
    ) -> PipelineResult<JobOutput> {
        check_source(input_path)?;
        config.validate()?;
        ensure_dir(output_dir)?;

        let output = output_dir.join(format!("watermarked_{}", file_name_of(input_path)));
        ensure_distinct(&output, input_path)?;
        clear_stale(&output)?;

        let input: PathBuf = input_path.to_path_buf();
        let target = output.clone();
        let config = config.clone();
        let stamped = tokio::task::spawn_blocking(move || stamp_watermark(&input, &target, &config))
            .await
            .map_err(|e| PipelineError::Watermark {
                message: format!("watermark task failed: {}", e),
            })??;

        info!(output = %output.display(), pages = stamped, "Watermark applied");
        Ok(JobOutput::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::test_support::{write_sample_jpeg, write_sample_pdf};
    use crate::pipeline::test_support::harness;
    use crate::process::testing::ScriptedRunner;
    use crate::watermark::{Anchor, PageSelector};

    fn stamped_pages(path: &Path, marker: &str) -> Vec<u32> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .into_iter()
            .filter(|(_, id)| {
                String::from_utf8_lossy(&doc.get_page_content(*id).unwrap()).contains(marker)
            })
            .map(|(number, _)| number)
            .collect()
    }

    fn image_count(path: &Path) -> usize {
        let doc = Document::load(path).unwrap();
        doc.objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .filter(|s| {
                s.dict
                    .get(b"Subtype")
                    .and_then(Object::as_name)
                    .map(|n| n == b"Image")
                    .unwrap_or(false)
            })
            .count()
    }

    #[test]
    fn test_win_ansi_encoding() {
        assert_eq!(encode_win_ansi("CONFIDENTIAL"), b"CONFIDENTIAL");
        assert_eq!(encode_win_ansi("café"), b"caf\xe9");
        assert_eq!(encode_win_ansi("日本"), b"??");
    }

    #[test]
    fn test_placement_matrix() {
        let values = |m: Vec<Object>| -> Vec<f32> {
            m.iter().map(|o| crate::pdf::number(o).unwrap()).collect()
        };

        assert_eq!(
            values(placement_matrix(0.0, 350.0, 702.0)),
            vec![1.0, 0.0, 0.0, 1.0, 350.0, 702.0]
        );

        let rotated = values(placement_matrix(90.0, 10.0, 20.0));
        assert!(rotated[0].abs() < 1e-6);
        assert!((rotated[1] - 1.0).abs() < 1e-6);
        assert!((rotated[2] + 1.0).abs() < 1e-6);
        assert_eq!(&rotated[4..], &[10.0, 20.0]);
    }

    #[tokio::test]
    async fn test_out_of_range_pages_are_dropped() {
        let h = harness(ScriptedRunner::failing());
        let input = h.staging().join("three.pdf");
        write_sample_pdf(&input, 3, false);
        let mut config = WatermarkConfig::text("DRAFT");
        config.pages = PageSelector::Pages(vec![1, 5, 999]);

        let output = h.pipeline.watermark(&input, h.staging(), &config).await.unwrap();

        assert_eq!(output.filename, "watermarked_three.pdf");
        assert_eq!(stamped_pages(&output.output_path, FONT_NAME), vec![1]);
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_text_on_every_page() {
        let h = harness(ScriptedRunner::failing());
        let input = h.staging().join("doc.pdf");
        write_sample_pdf(&input, 2, false);
        let mut config = WatermarkConfig::text("CONFIDENTIAL");
        config.position = Anchor::TopRight;
        config.rotation_degrees = 45.0;

        let output = h.pipeline.watermark(&input, h.staging(), &config).await.unwrap();

        assert_eq!(stamped_pages(&output.output_path, "CONFIDENTIAL"), vec![1, 2]);
        // Source untouched
        assert!(stamped_pages(&input, FONT_NAME).is_empty());
    }

    #[tokio::test]
    async fn test_image_is_embedded_once() {
        let h = harness(ScriptedRunner::failing());
        let input = h.staging().join("doc.pdf");
        write_sample_pdf(&input, 3, false);
        let logo = h.staging().join("logo.jpg");
        write_sample_jpeg(&logo);
        let mut config = WatermarkConfig::image(&logo);
        config.scale = 2.0;

        let output = h.pipeline.watermark(&input, h.staging(), &config).await.unwrap();

        assert_eq!(stamped_pages(&output.output_path, IMAGE_NAME), vec![1, 2, 3]);
        assert_eq!(image_count(&output.output_path), 1);
    }

    #[tokio::test]
    async fn test_invalid_configs_and_documents() {
        let h = harness(ScriptedRunner::failing());
        let input = h.staging().join("doc.pdf");
        write_sample_pdf(&input, 1, false);

        let err = h
            .pipeline
            .watermark(&input, h.staging(), &WatermarkConfig::text("  "))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "watermark_error");

        let err = h
            .pipeline
            .watermark(&input, h.staging(), &WatermarkConfig::image(h.staging().join("missing.png")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "watermark_error");

        let broken = h.write("broken.pdf", b"not a pdf");
        let err = h
            .pipeline
            .watermark(&broken, h.staging(), &WatermarkConfig::text("DRAFT"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "watermark_error");
        assert!(!h.staging().join("watermarked_broken.pdf").exists());
    }
}
