//! PDFium adapters: form fields, text layer, rendering and filling

use crate::error::{Error, Result};
use crate::labels::{BoundingBox, FieldType, FormField, TextElement, TextKind};
use pdfium_render::prelude::*;
use std::collections::BTreeMap;

/// Default rasterization resolution
pub const DEFAULT_RENDER_DPI: u16 = 200;

/// Page size in PDF points (1 point = 1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Basic document information
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub page_count: u32,
    pub page_sizes: Vec<PageSize>,
}

/// A rasterized page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Page number (1-indexed)
    pub page: u32,
    pub width: u32,
    pub height: u32,
    pub image: image::DynamicImage,
}

/// Info about a field that could not be filled
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedField {
    pub name: String,
    pub reason: String,
}

/// Result of filling form fields
#[derive(Debug, Clone, Default)]
pub struct FillReport {
    /// Number of fields successfully filled
    pub fields_filled: u32,
    /// Fields that could not be filled
    pub fields_skipped: Vec<SkippedField>,
}

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

fn check_pdf_header(data: &[u8]) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    Ok(())
}

fn map_pdfium_error(err: PdfiumError) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            Error::PasswordRequired
        }
        _ => Error::Pdfium {
            reason: format!("{}", err),
        },
    }
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    data: &'a [u8],
    password: Option<&str>,
) -> Result<PdfDocument<'a>> {
    pdfium
        .load_pdf_from_byte_slice(data, password)
        .map_err(map_pdfium_error)
}

fn get_page<'a>(pages: &PdfPages<'a>, page_num: u32) -> Result<PdfPage<'a>> {
    let total = pages.len() as u32;
    if page_num < 1 || page_num > total {
        return Err(Error::PageOutOfBounds {
            page: page_num,
            total,
        });
    }

    pages
        .get((page_num - 1) as u16)
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to get page {}: {}", page_num, e),
        })
}

fn page_size(page: &PdfPage) -> PageSize {
    PageSize {
        width: page.width().value,
        height: page.height().value,
    }
}

fn normalized_bounds(rect: &PdfRect, size: PageSize) -> Result<BoundingBox> {
    BoundingBox::from_pdf_rect(
        rect.left().value,
        rect.bottom().value,
        rect.right().value,
        rect.top().value,
        size.width,
        size.height,
    )
}

/// Page count and page sizes
pub fn get_document_info(data: &[u8], password: Option<&str>) -> Result<DocumentInfo> {
    check_pdf_header(data)?;

    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data, password)?;

    let pages = document.pages();
    let mut page_sizes = Vec::with_capacity(pages.len() as usize);
    for page in pages.iter() {
        page_sizes.push(page_size(&page));
    }

    Ok(DocumentInfo {
        page_count: page_sizes.len() as u32,
        page_sizes,
    })
}

fn classify_field(field: &PdfFormField) -> (FieldType, Option<String>) {
    if let Some(text_field) = field.as_text_field() {
        (FieldType::Text, text_field.value())
    } else if let Some(checkbox) = field.as_checkbox_field() {
        let value = checkbox.is_checked().ok().map(|c| c.to_string());
        (FieldType::Checkbox, value)
    } else if let Some(radio) = field.as_radio_button_field() {
        let value = radio.is_checked().ok().map(|c| c.to_string());
        (FieldType::RadioButton, value)
    } else if field.as_combo_box_field().is_some() {
        (FieldType::ComboBox, None)
    } else if field.as_list_box_field().is_some() {
        (FieldType::ListBox, None)
    } else if field.as_push_button_field().is_some() {
        (FieldType::PushButton, None)
    } else if field.as_signature_field().is_some() {
        (FieldType::Signature, None)
    } else {
        (FieldType::Unknown, None)
    }
}

/// Extract form fields with bounding boxes normalized to top-left page space.
///
/// With `page = None` every page is scanned. Widgets without a name get a
/// synthetic `<type>_<page>_<index>` name so they can still be labeled.
pub fn extract_form_fields(
    data: &[u8],
    password: Option<&str>,
    page: Option<u32>,
) -> Result<Vec<FormField>> {
    check_pdf_header(data)?;

    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data, password)?;
    let pages = document.pages();

    let page_numbers: Vec<u32> = match page {
        Some(n) => vec![n],
        None => (1..=pages.len() as u32).collect(),
    };

    let mut fields = Vec::new();

    for page_num in page_numbers {
        let pdf_page = get_page(&pages, page_num)?;
        let size = page_size(&pdf_page);

        for (index, annotation) in pdf_page.annotations().iter().enumerate() {
            let Some(field) = annotation.as_form_field() else {
                continue;
            };

            let rect = match annotation.bounds() {
                Ok(rect) => rect,
                Err(e) => {
                    tracing::debug!(page = page_num, index, error = %e, "widget without bounds");
                    continue;
                }
            };
            let bounding_box = match normalized_bounds(&rect, size) {
                Ok(bbox) => bbox,
                Err(e) => {
                    tracing::debug!(page = page_num, index, error = %e, "skipping widget");
                    continue;
                }
            };

            let (field_type, value) = classify_field(field);
            let name = field
                .name()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("{}_{}_{}", field_type, page_num, index));

            fields.push(FormField {
                name,
                field_type,
                page: page_num,
                bounding_box,
                required: false,
                value,
                label: None,
            });
        }
    }

    tracing::debug!(count = fields.len(), "extracted form fields");
    Ok(fields)
}

/// Text elements from the PDF's own text layer.
///
/// Each text segment becomes a `token` element with confidence 1.0; the text
/// layer needs no recognition so its positions are exact.
pub fn extract_text_elements(
    data: &[u8],
    password: Option<&str>,
    page: u32,
) -> Result<Vec<TextElement>> {
    check_pdf_header(data)?;

    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data, password)?;
    let pages = document.pages();
    let pdf_page = get_page(&pages, page)?;
    let size = page_size(&pdf_page);

    let text_obj = match pdf_page.text() {
        Ok(t) => t,
        Err(_) => return Ok(Vec::new()),
    };

    let mut elements = Vec::new();
    for segment in text_obj.segments().iter() {
        let text = segment.text();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let Ok(bounding_box) = normalized_bounds(&segment.bounds(), size) else {
            continue;
        };

        elements.push(TextElement {
            text: text.to_string(),
            kind: TextKind::Token,
            page,
            bounding_box,
            confidence: 1.0,
        });
    }

    Ok(elements)
}

/// Rasterize a single page at the given resolution
pub fn render_page(
    data: &[u8],
    password: Option<&str>,
    page: u32,
    dpi: u16,
) -> Result<RenderedPage> {
    check_pdf_header(data)?;
    if dpi == 0 {
        return Err(Error::invalid_argument("dpi must be positive"));
    }

    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data, password)?;
    let pages = document.pages();
    let pdf_page = get_page(&pages, page)?;

    let config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .render_form_data(true)
        .render_annotations(true);

    let bitmap = pdf_page
        .render_with_config(&config)
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to render page {}: {}", page, e),
        })?;

    let image = bitmap.as_image();

    Ok(RenderedPage {
        page,
        width: image.width(),
        height: image.height(),
        image,
    })
}

/// Interpret a submitted value for a checkbox or radio button
pub(crate) fn parse_checked(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "x" | "checked" => Some(true),
        "false" | "no" | "off" | "0" | "" | "unchecked" => Some(false),
        _ => None,
    }
}

/// Fill form fields by name and return the modified PDF bytes.
///
/// Text fields take the value as is. Checkboxes and radio buttons take a
/// boolean-like string (see [`parse_checked`]); a radio button can only be
/// selected, not cleared.
///
/// Each name is consumed by the first widget carrying it, so in a radio group
/// whose options share one name only the first option can be selected.
pub fn fill_form_fields(
    data: &[u8],
    password: Option<&str>,
    field_data: &BTreeMap<String, String>,
) -> Result<(Vec<u8>, FillReport)> {
    check_pdf_header(data)?;

    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data, password)?;

    let mut report = FillReport::default();
    let mut remaining: BTreeMap<&str, &str> = field_data
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let pages = document.pages();

    for page_index in 0..pages.len() {
        if remaining.is_empty() {
            break;
        }

        let page = pages.get(page_index).map_err(|e| Error::Pdfium {
            reason: format!("Failed to get page {}: {}", page_index + 1, e),
        })?;

        for mut annotation in page.annotations().iter() {
            if remaining.is_empty() {
                break;
            }

            let Some(field) = annotation.as_form_field_mut() else {
                continue;
            };
            let Some(field_name) = field.name() else {
                continue;
            };
            let Some(value) = remaining.remove(field_name.as_str()) else {
                continue;
            };

            let outcome: std::result::Result<(), String> =
                if let Some(text_field) = field.as_text_field_mut() {
                    text_field
                        .set_value(value)
                        .map_err(|e| format!("Failed to set value: {}", e))
                } else if let Some(checkbox) = field.as_checkbox_field_mut() {
                    match parse_checked(value) {
                        Some(checked) => checkbox
                            .set_checked(checked)
                            .map_err(|e| format!("Failed to set checked: {}", e)),
                        None => Err(format!("'{}' is not a checkbox value", value)),
                    }
                } else if let Some(radio) = field.as_radio_button_field_mut() {
                    match parse_checked(value) {
                        Some(true) => radio
                            .set_checked()
                            .map_err(|e| format!("Failed to select radio: {}", e)),
                        _ => Err(format!(
                            "'{}' does not select this radio button; only the first option of a group can be set",
                            value
                        )),
                    }
                } else {
                    Err("Unsupported field type for writing".to_string())
                };

            match outcome {
                Ok(()) => report.fields_filled += 1,
                Err(reason) => report.fields_skipped.push(SkippedField {
                    name: field_name,
                    reason,
                }),
            }
        }
    }

    for name in remaining.into_keys() {
        report.fields_skipped.push(SkippedField {
            name: name.to_string(),
            reason: "Field not found in PDF".to_string(),
        });
    }

    let output = document.save_to_bytes().map_err(|e| Error::Pdfium {
        reason: format!("Failed to save modified PDF: {}", e),
    })?;

    tracing::debug!(
        filled = report.fields_filled,
        skipped = report.fields_skipped.len(),
        "filled form fields"
    );

    Ok((output, report))
}
