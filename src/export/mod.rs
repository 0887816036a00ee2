//! File renderers for the student views.
//!
//! - `xlsx` : single-sheet workbook from a [`GradeTable`](crate::calc::GradeTable)
//! - `docx` : info table + grades table word-processor document
//! - `pdf`  : page-image capture of an externally rendered layout
//!
//! The tabular renderers take the same `GradeTable`, so the summary columns
//! can only come from the aggregation in `calc`.
pub mod docx;
pub mod pdf;
pub mod xlsx;

use crate::grades::View;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Xlsx,
    Docx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("capture failed: {0}")]
    Capture(#[from] pdf::CaptureError),
    #[error("supersampling factor must be between {min} and {max}, got {got}")]
    InvalidScale { min: u32, max: u32, got: u32 },
    #[error("xlsx write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("image encode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("docx package error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("I/O error during export: {0}")]
    Io(#[from] std::io::Error),
}

/// `{prefix}_{Name_With_Underscores}.{ext}`; a blank name becomes `aluno`.
pub fn export_filename(view: View, student_name: &str, format: ExportFormat) -> String {
    let trimmed = student_name.trim();
    let name = if trimmed.is_empty() {
        "aluno".to_string()
    } else {
        student_name
            .chars()
            .map(|c| match c {
                ' ' | '/' | '\\' => '_',
                c => c,
            })
            .collect()
    };
    format!("{}_{}.{}", view.file_prefix(), name, format.extension())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: usize,
}

/// Writes through a temporary sibling so a failed export leaves no file.
pub fn write_export(
    out_dir: &Path,
    filename: &str,
    format: ExportFormat,
    bytes: &[u8],
) -> Result<ExportedFile, ExportError> {
    std::fs::create_dir_all(out_dir)?;
    let dst = out_dir.join(filename);
    let tmp = out_dir.join(format!("{}.partial", filename));

    let result = (|| -> std::io::Result<()> {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        std::fs::rename(&tmp, &dst)
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    tracing::info!(
        path = %dst.to_string_lossy(),
        bytes = bytes.len(),
        format = format.extension(),
        "export written"
    );
    Ok(ExportedFile {
        path: dst,
        filename: filename.to_string(),
        content_type: format.content_type(),
        bytes: bytes.len(),
    })
}
