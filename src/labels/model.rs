//! Form fields, recognized text and label candidates

use super::geometry::BoundingBox;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Closed set of interactive form field kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Checkbox,
    RadioButton,
    ComboBox,
    ListBox,
    PushButton,
    Signature,
    Unknown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Checkbox => "checkbox",
            FieldType::RadioButton => "radio_button",
            FieldType::ComboBox => "combo_box",
            FieldType::ListBox => "list_box",
            FieldType::PushButton => "push_button",
            FieldType::Signature => "signature",
            FieldType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An interactive form field discovered on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormField {
    /// Fully qualified field name
    pub name: String,
    pub field_type: FieldType,
    /// Page number (1-indexed)
    pub page: u32,
    /// Widget rectangle in normalized top-left space
    pub bounding_box: BoundingBox,
    pub required: bool,
    /// Current value, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Human-readable label chosen from the nearest recognized text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Where a piece of recognized text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Paragraph,
    TableCell,
    FormFieldText,
    /// Single word or run from a text layer or OCR tokenizer
    Token,
}

impl TextKind {
    /// Parse the loose spellings recognizers use for element types
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "paragraph" | "line" | "block" => Some(TextKind::Paragraph),
            "table_cell" | "tablecell" | "cell" => Some(TextKind::TableCell),
            "form_field_text" | "form_field_label" | "form_field" | "formfield" => {
                Some(TextKind::FormFieldText)
            }
            "token" | "word" => Some(TextKind::Token),
            _ => None,
        }
    }
}

/// A piece of text recognized on a rendered page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextElement {
    pub text: String,
    pub kind: TextKind,
    /// Page number (1-indexed)
    pub page: u32,
    pub bounding_box: BoundingBox,
    /// Recognition confidence in [0, 1]
    pub confidence: f64,
}

/// A text element proposed as the label of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelCandidate {
    pub text: String,
    pub kind: TextKind,
    /// Center-to-center distance in normalized units
    pub distance: f64,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}
