//! Validation of recognizer output before it reaches the matcher
//!
//! Vision models and OCR services return loosely shaped JSON. Everything
//! here turns that into [`TextElement`]s or explains why an entry was dropped.

use super::geometry::BoundingBox;
use super::model::{TextElement, TextKind};
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Confidence assigned to elements whose recognizer reported none
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Slack allowed around [0, 1] for recognizer rounding
pub const COORDINATE_TOLERANCE: f64 = 0.01;

/// Bounding box as sent by a recognizer; any coordinate may be missing
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RawBoundingBox {
    #[serde(default)]
    pub x1: Option<f64>,
    #[serde(default)]
    pub y1: Option<f64>,
    #[serde(default)]
    pub x2: Option<f64>,
    #[serde(default)]
    pub y2: Option<f64>,
}

/// Text element as sent by a recognizer, in normalized top-left coordinates
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RawTextElement {
    #[serde(default)]
    pub text: Option<String>,
    /// paragraph, table_cell, form_field_text or token
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    /// Page number (1-indexed); defaults to the page being parsed
    #[serde(default, alias = "pageNumber")]
    pub page: Option<u32>,
    #[serde(default, alias = "boundingBox")]
    pub bounding_box: Option<RawBoundingBox>,
    /// Recognition confidence in [0, 1]
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// An input entry that was dropped during sanitization
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct RejectedElement {
    /// Position in the recognizer output
    pub index: usize,
    pub reason: String,
}

/// Sanitized recognizer output
#[derive(Debug, Clone, Default)]
pub struct SanitizedElements {
    pub elements: Vec<TextElement>,
    pub rejected: Vec<RejectedElement>,
}

/// Validate raw elements, keeping the valid ones in input order
pub fn sanitize_text_elements(raw: Vec<RawTextElement>, default_page: u32) -> SanitizedElements {
    let mut out = SanitizedElements::default();

    for (index, element) in raw.into_iter().enumerate() {
        match sanitize_one(element, default_page) {
            Ok(element) => out.elements.push(element),
            Err(reason) => {
                tracing::debug!(index, %reason, "dropping recognized text element");
                out.rejected.push(RejectedElement { index, reason });
            }
        }
    }

    out
}

/// Parse a JSON array of text elements, tolerating malformed entries.
///
/// Model replies wrapped in markdown fences are accepted.
pub fn parse_text_elements(reply: &str, default_page: u32) -> Result<SanitizedElements> {
    let payload = extract_json_payload(reply);
    let value: serde_json::Value = serde_json::from_str(payload)?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("elements") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(Error::invalid_argument(
                    "expected a JSON array of text elements",
                ))
            }
        },
        _ => {
            return Err(Error::invalid_argument(
                "expected a JSON array of text elements",
            ))
        }
    };

    let mut raw = Vec::with_capacity(items.len());
    let mut malformed = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawTextElement>(item) {
            Ok(element) => raw.push((index, element)),
            Err(e) => malformed.push(RejectedElement {
                index,
                reason: format!("malformed entry: {}", e),
            }),
        }
    }

    let (indices, raw): (Vec<usize>, Vec<RawTextElement>) = raw.into_iter().unzip();
    let mut sanitized = sanitize_text_elements(raw, default_page);
    // Report positions relative to the original array
    for rejected in &mut sanitized.rejected {
        rejected.index = indices[rejected.index];
    }
    sanitized.rejected.extend(malformed);
    sanitized.rejected.sort_by_key(|r| r.index);

    Ok(sanitized)
}

/// Strip a markdown code fence (```json ... ``` or ``` ... ```) from a reply
pub fn extract_json_payload(reply: &str) -> &str {
    let trimmed = reply.trim();

    let body_start = if let Some(start) = trimmed.find("```json") {
        start + "```json".len()
    } else if let Some(start) = trimmed.find("```") {
        start + "```".len()
    } else {
        return trimmed;
    };

    let rest = &trimmed[body_start..];
    match rest.find("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

fn sanitize_one(raw: RawTextElement, default_page: u32) -> std::result::Result<TextElement, String> {
    let text = raw
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "missing text".to_string())?;

    let bbox = raw.bounding_box.ok_or_else(|| "missing bounding box".to_string())?;
    let (x1, y1, x2, y2) = match (bbox.x1, bbox.y1, bbox.x2, bbox.y2) {
        (Some(x1), Some(y1), Some(x2), Some(y2)) => (x1, y1, x2, y2),
        _ => return Err("incomplete bounding box".to_string()),
    };
    let bounding_box = BoundingBox::new(x1, y1, x2, y2).map_err(|e| e.to_string())?;
    // Pixel or point coordinates would silently never match
    let in_range = |v: f64| (-COORDINATE_TOLERANCE..=1.0 + COORDINATE_TOLERANCE).contains(&v);
    if ![x1, y1, x2, y2].into_iter().all(in_range) {
        return Err(format!(
            "bounding box ({}, {}, {}, {}) is not normalized to [0, 1]",
            x1, y1, x2, y2
        ));
    }

    let confidence = raw.confidence.unwrap_or(DEFAULT_CONFIDENCE);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {} outside [0, 1]", confidence));
    }

    let page = raw.page.unwrap_or(default_page);
    if page == 0 {
        return Err("page numbers start at 1".to_string());
    }

    let kind = raw
        .kind
        .as_deref()
        .and_then(TextKind::parse)
        .unwrap_or(TextKind::Paragraph);

    Ok(TextElement {
        text,
        kind,
        page,
        bounding_box,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(text: &str, confidence: Option<f64>) -> RawTextElement {
        RawTextElement {
            text: Some(text.to_string()),
            kind: Some("paragraph".to_string()),
            page: None,
            bounding_box: Some(RawBoundingBox {
                x1: Some(0.1),
                y1: Some(0.1),
                x2: Some(0.2),
                y2: Some(0.12),
            }),
            confidence,
        }
    }

    #[test]
    fn test_missing_confidence_defaults() {
        let out = sanitize_text_elements(vec![raw("Name", None)], 3);
        assert_eq!(out.elements.len(), 1);
        assert_eq!(out.elements[0].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(out.elements[0].page, 3);
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let out = sanitize_text_elements(
            vec![raw("a", Some(1.5)), raw("b", Some(-0.1)), raw("c", Some(f64::NAN))],
            1,
        );
        assert!(out.elements.is_empty());
        assert_eq!(out.rejected.len(), 3);
    }

    #[test]
    fn test_blank_text_and_missing_box_rejected() {
        let mut no_box = raw("Name", Some(0.9));
        no_box.bounding_box = None;
        let out = sanitize_text_elements(vec![raw("   ", Some(0.9)), no_box, raw("ok", None)], 1);

        assert_eq!(out.elements.len(), 1);
        assert_eq!(out.elements[0].text, "ok");
        assert_eq!(out.rejected[0].index, 0);
        assert_eq!(out.rejected[1].index, 1);
    }

    #[test]
    fn test_inverted_box_rejected() {
        let mut element = raw("Name", None);
        element.bounding_box = Some(RawBoundingBox {
            x1: Some(0.3),
            y1: Some(0.1),
            x2: Some(0.2),
            y2: Some(0.2),
        });
        let out = sanitize_text_elements(vec![element], 1);
        assert!(out.elements.is_empty());
    }

    #[test]
    fn test_pixel_coordinates_rejected() {
        let mut pixels = raw("Name", None);
        pixels.bounding_box = Some(RawBoundingBox {
            x1: Some(120.0),
            y1: Some(40.0),
            x2: Some(640.0),
            y2: Some(60.0),
        });
        let mut rounded = raw("Date", None);
        rounded.bounding_box = Some(RawBoundingBox {
            x1: Some(-0.005),
            y1: Some(0.9),
            x2: Some(0.2),
            y2: Some(1.004),
        });

        let out = sanitize_text_elements(vec![pixels, rounded], 1);
        assert_eq!(out.elements.len(), 1);
        assert_eq!(out.elements[0].text, "Date");
        assert_eq!(out.rejected[0].index, 0);
        assert!(out.rejected[0].reason.contains("not normalized"));
    }

    #[test]
    fn test_extract_json_payload() {
        assert_eq!(extract_json_payload("  [1, 2] "), "[1, 2]");
        assert_eq!(extract_json_payload("```json\n[1]\n```"), "[1]");
        assert_eq!(extract_json_payload("Here you go:\n```\n{}\n```\nDone"), "{}");
        assert_eq!(extract_json_payload("```json\n[3]"), "[3]");
    }

    #[test]
    fn test_parse_text_elements_camel_case() {
        let reply = r#"```json
[
  {"text": "Full name", "type": "form_field_label", "pageNumber": 2,
   "boundingBox": {"x1": 0.1, "y1": 0.2, "x2": 0.3, "y2": 0.22}, "confidence": 0.97},
  {"text": 42},
  {"text": "Date", "boundingBox": {"x1": 0.5, "y1": 0.2, "x2": 0.6, "y2": 0.22}}
]
```"#;
        let out = parse_text_elements(reply, 1).unwrap();

        assert_eq!(out.elements.len(), 2);
        assert_eq!(out.elements[0].kind, TextKind::FormFieldText);
        assert_eq!(out.elements[0].page, 2);
        assert_eq!(out.elements[1].page, 1);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].index, 1);
    }

    #[test]
    fn test_parse_text_elements_rejects_scalar() {
        assert!(parse_text_elements("42", 1).is_err());
        assert!(parse_text_elements("not json", 1).is_err());
    }
}
