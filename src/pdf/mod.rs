//! PDF processing layer
//!
//! This module wraps PDFium for form-field extraction, text-layer extraction,
//! page rendering and form filling, and draws field overlays on rendered pages.

mod annotate;
mod reader;

pub use annotate::annotate_fields;
pub use reader::{
    extract_form_fields, extract_text_elements, fill_form_fields, get_document_info,
    render_page, DocumentInfo, FillReport, PageSize, RenderedPage, SkippedField,
    DEFAULT_RENDER_DPI,
};
