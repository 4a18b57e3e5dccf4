//! Field label matching
//!
//! Associates form-field boxes with nearby recognized text. Inputs must be in
//! one normalized coordinate space (see [`BoundingBox::from_pdf_rect`]).

pub mod geometry;
pub mod matcher;
pub mod model;
pub mod recognition;

pub use geometry::BoundingBox;
pub use matcher::{
    apply_labels, match_labels, LabelMatches, MatchConfig, DEFAULT_MAX_CANDIDATES,
    DEFAULT_SEARCH_RADIUS,
};
pub use model::{FieldType, FormField, LabelCandidate, TextElement, TextKind};
pub use recognition::{
    extract_json_payload, parse_text_elements, sanitize_text_elements, RawBoundingBox,
    RawTextElement, RejectedElement, SanitizedElements, COORDINATE_TOLERANCE, DEFAULT_CONFIDENCE,
};
