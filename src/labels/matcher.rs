//! Nearest-neighbor label matching
//!
//! Every field is matched independently: the same text element may be the
//! best candidate for several fields. There is no one-to-one assignment
//! between fields and labels.

use super::model::{FormField, LabelCandidate, TextElement};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Default search radius in normalized page units
pub const DEFAULT_SEARCH_RADIUS: f64 = 0.1;

/// Default number of candidates kept per field
pub const DEFAULT_MAX_CANDIDATES: usize = 5;

/// Matching parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Maximum center distance for a text to be considered (inclusive)
    pub search_radius: f64,
    /// Maximum number of candidates kept per field
    pub max_candidates: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            search_radius: DEFAULT_SEARCH_RADIUS,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        // NaN fails this comparison too
        if !(self.search_radius >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "search_radius must be >= 0, got {}",
                self.search_radius
            )));
        }
        if self.max_candidates < 1 {
            return Err(Error::invalid_argument("max_candidates must be >= 1"));
        }
        Ok(())
    }
}

/// Candidates per field name, nearest first.
///
/// Fields without any candidate are kept with an empty list so they can be
/// reported as unmapped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LabelMatches {
    by_field: BTreeMap<String, Vec<LabelCandidate>>,
    #[serde(skip)]
    field_order: Vec<String>,
}

impl LabelMatches {
    /// Candidates for a field, or `None` if the field was not part of the input
    pub fn candidates(&self, field_name: &str) -> Option<&[LabelCandidate]> {
        self.by_field.get(field_name).map(Vec::as_slice)
    }

    /// Text of the nearest candidate
    pub fn best_label(&self, field_name: &str) -> Option<&str> {
        self.candidates(field_name)
            .and_then(|c| c.first())
            .map(|c| c.text.as_str())
    }

    /// Names of fields with no candidate, in input order
    pub fn unmapped(&self) -> Vec<&str> {
        self.field_order
            .iter()
            .filter(|name| self.by_field.get(*name).is_some_and(|c| c.is_empty()))
            .map(String::as_str)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_field.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }

    /// Iterate in field-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[LabelCandidate])> {
        self.by_field
            .iter()
            .map(|(name, c)| (name.as_str(), c.as_slice()))
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<LabelCandidate>> {
        self.by_field
    }
}

/// Match recognized text to form fields by center distance.
///
/// All boxes must already be in the same normalized space. Texts on a
/// different page than the field never match.
pub fn match_labels(
    fields: &[FormField],
    texts: &[TextElement],
    config: &MatchConfig,
) -> Result<LabelMatches> {
    config.validate()?;
    for field in fields {
        field
            .bounding_box
            .validate()
            .map_err(|e| with_context(e, format!("field '{}'", field.name)))?;
    }
    for (index, text) in texts.iter().enumerate() {
        text.bounding_box
            .validate()
            .map_err(|e| with_context(e, format!("text element {}", index)))?;
    }

    let mut matches = LabelMatches::default();

    // Several widgets may share one name (radio groups, repeated fields); all
    // of their in-radius texts are pooled before anything is cut.
    for field in fields {
        let candidates = nearby_candidates(field, texts, config);
        match matches.by_field.get_mut(&field.name) {
            Some(existing) => existing.extend(candidates),
            None => {
                matches.field_order.push(field.name.clone());
                matches.by_field.insert(field.name.clone(), candidates);
            }
        }
    }

    for candidates in matches.by_field.values_mut() {
        rank_candidates(candidates);
        dedup_by_text(candidates);
        candidates.truncate(config.max_candidates);
    }

    tracing::debug!(
        fields = fields.len(),
        texts = texts.len(),
        unmapped = matches.unmapped().len(),
        "label matching finished"
    );

    Ok(matches)
}

/// Copy each field's best label into `field.label`
pub fn apply_labels(fields: &mut [FormField], matches: &LabelMatches) {
    for field in fields.iter_mut() {
        field.label = matches.best_label(&field.name).map(str::to_string);
    }
}

fn nearby_candidates(
    field: &FormField,
    texts: &[TextElement],
    config: &MatchConfig,
) -> Vec<LabelCandidate> {
    texts
        .iter()
        .filter(|t| t.page == field.page)
        .filter_map(|t| {
            let distance = field.bounding_box.center_distance(&t.bounding_box);
            (distance <= config.search_radius).then(|| LabelCandidate {
                text: t.text.clone(),
                kind: t.kind,
                distance,
                confidence: t.confidence,
                bounding_box: t.bounding_box,
            })
        })
        .collect()
}

/// Ascending distance, then descending confidence. The sort is stable so
/// fully tied candidates keep their input order.
fn rank_candidates(candidates: &mut [LabelCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}

fn with_context(err: Error, context: String) -> Error {
    match err {
        Error::InvalidArgument { reason } => Error::InvalidArgument {
            reason: format!("{}: {}", context, reason),
        },
        other => other,
    }
}

/// Keep the best-ranked candidate of each text
fn dedup_by_text(candidates: &mut Vec<LabelCandidate>) {
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.text.clone()));
}
