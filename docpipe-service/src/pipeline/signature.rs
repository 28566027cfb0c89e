//! Signature stamping.
//!
//! Placements come from a browser canvas: fractions of the page measured from
//! the top-left corner. PDF space starts bottom-left, so the vertical
//! position is flipped.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lopdf::content::Operation;
use lopdf::{Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::{ensure_dir, unique_name};
use crate::error::{PipelineError, PipelineResult, format_error_chain};
use crate::job::JobOutput;
use crate::pdf::{self, PageBox, append_page_content, register_resource};

use super::{DocumentPipeline, check_source};

/// One signature image and where it goes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePlacement {
    /// 0-based page index
    #[serde(alias = "page_index", alias = "page")]
    pub page_index: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Base64 PNG or JPEG, optionally as a `data:` URL
    #[serde(alias = "image_data", alias = "image")]
    pub image_data: String,
}

impl SignaturePlacement {
    /// Lower-left corner and size in PDF units
    pub fn to_pdf_rect(&self, page: &PageBox) -> (f32, f32, f32, f32) {
        let width = self.width * page.width;
        let height = self.height * page.height;
        let x = page.x + self.x * page.width;
        let y = page.y + page.height - self.y * page.height - height;
        (x, y, width, height)
    }
}

fn signature_error(message: impl Into<String>) -> PipelineError {
    PipelineError::Signature {
        message: message.into(),
    }
}

/// Decode base64 image data, accepting a `data:<mime>;base64,` prefix
pub(crate) fn decode_image_data(data: &str) -> PipelineResult<Vec<u8>> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, payload)| payload)
            .ok_or_else(|| signature_error("malformed data URL"))?,
        None => data,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| signature_error(format!("invalid image data: {}", e)))
}

pub(crate) fn stamp_signatures(
    input: &Path,
    output: &Path,
    placements: &[SignaturePlacement],
) -> PipelineResult<()> {
    let mut doc =
        pdf::load_document(input).map_err(|e| signature_error(format_error_chain(&e)))?;
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();

    for (index, placement) in placements.iter().enumerate() {
        let page_id = *pages.get(placement.page_index).ok_or_else(|| {
            signature_error(format!(
                "page index {} is out of range (document has {} pages)",
                placement.page_index,
                pages.len()
            ))
        })?;

        let bytes = decode_image_data(&placement.image_data)?;
        let image = pdf::embed_image(&mut doc, &bytes)
            .map_err(|e| signature_error(format_error_chain(&e)))?;

        let name = format!("DpSig{}", index);
        let (x, y, width, height) = placement.to_pdf_rect(&pdf::page_box(&doc, page_id));
        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(height),
                    Object::Real(x),
                    Object::Real(y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ];

        register_resource(&mut doc, page_id, "XObject", &name, Object::Reference(image.id))
            .and_then(|()| append_page_content(&mut doc, page_id, operations))
            .map_err(|e| signature_error(format_error_chain(&e)))?;
    }

    pdf::save_document(&mut doc, output).map_err(|e| signature_error(format_error_chain(&e)))
}

impl DocumentPipeline {
    /// Stamp signature images, writing `<output_dir>/signed-<ts>-<rand>.pdf`.
    pub async fn sign(
        &self,
        input_path: &Path,
        output_dir: &Path,
        placements: &[SignaturePlacement],
    ) -> PipelineResult<JobOutput> {
        check_source(input_path)?;
        if placements.is_empty() {
            return Err(signature_error("no signature placements given"));
        }
        ensure_dir(output_dir)?;

        let output = output_dir.join(unique_name("signed", Some("pdf")));
        let input: PathBuf = input_path.to_path_buf();
        let target = output.clone();
        let placements = placements.to_vec();
        let count = placements.len();

        tokio::task::spawn_blocking(move || stamp_signatures(&input, &target, &placements))
            .await
            .map_err(|e| signature_error(format!("signature task failed: {}", e)))??;

        info!(output = %output.display(), signatures = count, "Signatures applied");
        Ok(JobOutput::new(output))
    }
}
