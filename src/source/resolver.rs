//! Resolution of uploaded PDF data

use crate::error::{Error, Result};
use base64::Engine;
use std::path::Path;

/// Resolved PDF data
pub struct ResolvedPdf {
    pub data: Vec<u8>,
    /// Display name of the upload (file name, or a placeholder for inline data)
    pub source_name: String,
}

fn check_header(data: &[u8], what: &str) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: format!("{} is not a valid PDF file", what),
        });
    }
    Ok(())
}

/// Resolve a file path to PDF data
pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedPdf> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(Error::PdfNotFound {
            path: path.display().to_string(),
        });
    }

    let data = std::fs::read(path)?;
    check_header(&data, "File")?;

    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());

    Ok(ResolvedPdf { data, source_name })
}

/// Resolve base64 encoded data to PDF data
pub fn resolve_base64(base64_data: &str) -> Result<ResolvedPdf> {
    let engine = base64::engine::general_purpose::STANDARD;
    let data = engine.decode(base64_data.trim())?;
    check_header(&data, "Decoded data")?;

    Ok(ResolvedPdf {
        data,
        source_name: "document.pdf".to_string(),
    })
}
