//! Integration tests for the PDF form labeler

use pdf_form_labeler::labels::{
    apply_labels, match_labels, parse_text_elements, BoundingBox, FieldType, FormField,
    LabelMatches, MatchConfig, TextElement, TextKind,
};
use pdf_form_labeler::pdf::{extract_form_fields, fill_form_fields, get_document_info};
use pdf_form_labeler::server::{DownloadPdfParams, ParseFormParams};
use pdf_form_labeler::source::{resolve_base64, FileStore};
use pdf_form_labeler::{Error, PdfServer, ServerConfig};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::BTreeMap;
use std::time::Duration;

fn field(name: &str, bbox: BoundingBox) -> FormField {
    FormField {
        name: name.to_string(),
        field_type: FieldType::Text,
        page: 1,
        bounding_box: bbox,
        required: false,
        value: None,
        label: None,
    }
}

fn text(label: &str, bbox: BoundingBox, confidence: f64) -> TextElement {
    TextElement {
        text: label.to_string(),
        kind: TextKind::Paragraph,
        page: 1,
        bounding_box: bbox,
        confidence,
    }
}

/// Small box centered on `(cx, cy)`
fn centered(cx: f64, cy: f64) -> BoundingBox {
    BoundingBox::new(cx - 0.01, cy - 0.005, cx + 0.01, cy + 0.005).unwrap()
}

fn config(search_radius: f64, max_candidates: usize) -> MatchConfig {
    MatchConfig {
        search_radius,
        max_candidates,
    }
}

/// A page with labels scattered around a handful of fields
fn sample_page() -> (Vec<FormField>, Vec<TextElement>) {
    let fields = vec![
        field("full_name", centered(0.30, 0.20)),
        field("email", centered(0.30, 0.26)),
        field("date", centered(0.70, 0.20)),
        field("signature", centered(0.50, 0.90)),
    ];
    let texts = vec![
        text("Full name", centered(0.15, 0.20), 0.92),
        text("Email", centered(0.17, 0.26), 0.88),
        text("Date", centered(0.60, 0.20), 0.97),
        text("Applicant", centered(0.30, 0.14), 0.51),
        text("Contact", centered(0.30, 0.31), 0.64),
        text("Page 1 of 2", centered(0.90, 0.97), 0.99),
        text("Signature", centered(0.40, 0.90), 0.75),
    ];
    (fields, texts)
}

fn assert_ranked(matches: &LabelMatches) {
    for (name, candidates) in matches.iter() {
        for pair in candidates.windows(2) {
            assert!(
                pair[0].distance <= pair[1].distance,
                "{} not sorted by distance",
                name
            );
            if pair[0].distance == pair[1].distance {
                assert!(pair[0].confidence >= pair[1].confidence);
            }
        }
    }
}

// ============================================================================
// Matcher properties
// ============================================================================

#[rstest]
#[case(0.0)]
#[case(0.05)]
#[case(0.1)]
#[case(0.3)]
#[case(2.0)]
fn test_candidates_within_radius(#[case] radius: f64) {
    let (fields, texts) = sample_page();
    let matches = match_labels(&fields, &texts, &config(radius, 10)).unwrap();

    for (_, candidates) in matches.iter() {
        assert!(candidates.iter().all(|c| c.distance <= radius));
    }
}

#[rstest]
#[case(0.1)]
#[case(0.5)]
#[case(1.5)]
fn test_candidates_are_ranked(#[case] radius: f64) {
    let (fields, texts) = sample_page();
    let matches = match_labels(&fields, &texts, &config(radius, 10)).unwrap();
    assert_ranked(&matches);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(100)]
fn test_candidate_count_bounded(#[case] max_candidates: usize) {
    let (fields, texts) = sample_page();
    let matches = match_labels(&fields, &texts, &config(2.0, max_candidates)).unwrap();

    for (_, candidates) in matches.iter() {
        assert!(candidates.len() <= max_candidates);
    }
    // With radius 2.0 every text qualifies
    assert_eq!(
        matches.candidates("full_name").unwrap().len(),
        max_candidates.min(texts.len())
    );
}

#[test]
fn test_matching_is_idempotent() {
    let (fields, texts) = sample_page();
    let cfg = config(0.2, 3);

    let first = serde_json::to_string(&match_labels(&fields, &texts, &cfg).unwrap()).unwrap();
    let second = serde_json::to_string(&match_labels(&fields, &texts, &cfg).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[rstest]
#[case::reversed(vec![6, 5, 4, 3, 2, 1, 0])]
#[case::rotated(vec![3, 4, 5, 6, 0, 1, 2])]
#[case::interleaved(vec![1, 3, 5, 0, 2, 4, 6])]
fn test_text_order_does_not_change_output(#[case] order: Vec<usize>) {
    let (fields, texts) = sample_page();
    let permuted: Vec<TextElement> = order.iter().map(|&i| texts[i].clone()).collect();
    let cfg = config(0.3, 4);

    let expected = match_labels(&fields, &texts, &cfg).unwrap();
    let actual = match_labels(&fields, &permuted, &cfg).unwrap();
    assert_eq!(expected, actual);
}

#[test]
fn test_full_ties_keep_input_order() {
    let f = field("f", centered(0.5, 0.5));
    let shared = centered(0.55, 0.5);
    let texts = vec![
        text("first", shared, 0.7),
        text("second", shared, 0.7),
        text("third", shared, 0.7),
    ];

    let matches = match_labels(&[f], &texts, &MatchConfig::default()).unwrap();
    let order: Vec<&str> = matches
        .candidates("f")
        .unwrap()
        .iter()
        .map(|c| c.text.as_str())
        .collect();
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[test]
fn test_radius_is_inclusive() {
    // Centers (0.5, 0.5) and (0.75, 0.5): distance is exactly 0.25
    let f = field("f", BoundingBox::new(0.25, 0.25, 0.75, 0.75).unwrap());
    let t = text("edge", BoundingBox::new(0.5, 0.25, 1.0, 0.75).unwrap(), 0.5);

    let at_radius = match_labels(&[f.clone()], &[t.clone()], &config(0.25, 5)).unwrap();
    assert_eq!(at_radius.candidates("f").unwrap().len(), 1);
    assert_eq!(at_radius.candidates("f").unwrap()[0].distance, 0.25);

    let below_radius = match_labels(&[f], &[t], &config(0.25 - 1e-12, 5)).unwrap();
    assert!(below_radius.candidates("f").unwrap().is_empty());
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_scenario_nearby_label_ranked_first() {
    let a = field("A", centered(0.20, 0.30));
    let texts = vec![
        text("Name", centered(0.22, 0.31), 0.9),
        text("Address", centered(0.20, 0.38), 0.95),
    ];

    let matches = match_labels(&[a], &texts, &config(0.1, 5)).unwrap();
    let candidates = matches.candidates("A").unwrap();

    assert_eq!(candidates[0].text, "Name");
    assert!((candidates[0].distance - 0.0224).abs() < 1e-3);
    assert_eq!(matches.best_label("A"), Some("Name"));
}

#[test]
fn test_scenario_far_text_leaves_field_unmapped() {
    let b = field("B", centered(0.5, 0.5));
    let texts = vec![text("Signature", centered(0.9, 0.9), 0.99)];

    let matches = match_labels(&[b], &texts, &config(0.1, 5)).unwrap();
    assert!(matches.candidates("B").unwrap().is_empty());
    assert_eq!(matches.unmapped(), vec!["B"]);
    assert_eq!(matches.best_label("B"), None);
}

#[test]
fn test_scenario_equal_distance_prefers_confidence() {
    let f = field("f", centered(0.5, 0.5));
    let texts = vec![
        text("low", centered(0.54, 0.5), 0.8),
        text("high", centered(0.54, 0.5), 0.95),
    ];

    let matches = match_labels(&[f], &texts, &MatchConfig::default()).unwrap();
    let candidates = matches.candidates("f").unwrap();

    assert_eq!(candidates[0].text, "high");
    assert_eq!(candidates[1].text, "low");
    assert!((candidates[0].distance - 0.04).abs() < 1e-9);
}

#[test]
fn test_scenario_max_candidates_keeps_closest() {
    let f = field("f", centered(0.5, 0.5));
    let texts = vec![
        text("d3", centered(0.53, 0.5), 0.5),
        text("d1", centered(0.51, 0.5), 0.5),
        text("d4", centered(0.54, 0.5), 0.5),
        text("d2", centered(0.52, 0.5), 0.5),
    ];

    let matches = match_labels(&[f], &texts, &config(0.1, 2)).unwrap();
    let names: Vec<&str> = matches
        .candidates("f")
        .unwrap()
        .iter()
        .map(|c| c.text.as_str())
        .collect();
    assert_eq!(names, vec!["d1", "d2"]);
}

#[test]
fn test_same_text_can_label_several_fields() {
    let fields = vec![
        field("left", centered(0.45, 0.5)),
        field("right", centered(0.55, 0.5)),
    ];
    let texts = vec![text("Amount", centered(0.5, 0.5), 0.9)];

    let mut fields_out = fields.clone();
    let matches = match_labels(&fields, &texts, &MatchConfig::default()).unwrap();
    apply_labels(&mut fields_out, &matches);

    assert_eq!(fields_out[0].label.as_deref(), Some("Amount"));
    assert_eq!(fields_out[1].label.as_deref(), Some("Amount"));
}

#[test]
fn test_invalid_inputs_rejected() {
    let (fields, texts) = sample_page();

    assert!(matches!(
        match_labels(&fields, &texts, &config(-0.1, 5)),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        match_labels(&fields, &texts, &config(0.1, 0)),
        Err(Error::InvalidArgument { .. })
    ));
}

// ============================================================================
// Recognizer output
// ============================================================================

#[test]
fn test_recognizer_reply_feeds_matcher() {
    let reply = r#"Here is what I found:
```json
[
  {"text": "Name", "type": "paragraph", "boundingBox": {"x1": 0.05, "y1": 0.18, "x2": 0.15, "y2": 0.22}, "confidence": 0.9},
  {"text": "Broken", "boundingBox": {"x1": 0.5}},
  {"text": "Phone", "type": "table_cell", "page": 2, "boundingBox": {"x1": 0.05, "y1": 0.18, "x2": 0.15, "y2": 0.22}}
]
```"#;

    let sanitized = parse_text_elements(reply, 1).unwrap();
    assert_eq!(sanitized.elements.len(), 2);
    assert_eq!(sanitized.rejected.len(), 1);
    assert_eq!(sanitized.rejected[0].index, 1);

    let name_field = field("name", BoundingBox::new(0.2, 0.18, 0.4, 0.22).unwrap());
    let matches =
        match_labels(&[name_field], &sanitized.elements, &config(0.25, 5)).unwrap();

    // "Phone" is on page 2
    let texts: Vec<&str> = matches
        .candidates("name")
        .unwrap()
        .iter()
        .map(|c| c.text.as_str())
        .collect();
    assert_eq!(texts, vec!["Name"]);
}

// ============================================================================
// PDF boundary and storage
// ============================================================================

#[test]
fn test_pdf_functions_reject_non_pdf() {
    let data = b"this is not a pdf";

    assert!(matches!(
        get_document_info(data, None),
        Err(Error::InvalidPdf { .. })
    ));
    assert!(matches!(
        extract_form_fields(data, None, Some(1)),
        Err(Error::InvalidPdf { .. })
    ));
    assert!(matches!(
        fill_form_fields(data, None, &BTreeMap::new()),
        Err(Error::InvalidPdf { .. })
    ));
}

#[test]
fn test_resolve_base64_pdf_header() {
    let resolved = resolve_base64("JVBERi0xLjQK").unwrap();
    assert_eq!(resolved.data, b"%PDF-1.4\n");
}

#[test]
fn test_store_upload_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(
        dir.path().join("uploads"),
        dir.path().join("output"),
        Duration::from_secs(3600),
    );

    let id = store.save_upload("Intake Form.pdf", b"%PDF-1.4\n").unwrap();
    let upload = store.upload_path(&id).unwrap();
    assert!(upload.starts_with(dir.path().join("uploads")));

    let output = store.write_output(&id, b"%PDF-1.4\nfilled").unwrap();
    assert_eq!(store.output_path(&id).unwrap(), output);
    assert_eq!(
        store.info(&id).unwrap().download_name(),
        "Intake Form_filled.pdf"
    );

    assert_eq!(store.sweep_expired(), 0);
    assert!(store.remove(&id));
    assert!(!upload.exists());
    assert!(!output.exists());
    assert!(matches!(
        store.upload_path(&id),
        Err(Error::FileNotFound { .. })
    ));
}

#[test]
fn test_server_rejects_unknown_file_ids() {
    let dir = tempfile::tempdir().unwrap();
    let server = PdfServer::with_config(ServerConfig {
        upload_dir: dir.path().join("uploads"),
        output_dir: dir.path().join("output"),
        ..ServerConfig::default()
    });

    let parse: ParseFormParams =
        serde_json::from_value(serde_json::json!({"file_id": "nope", "page": 1})).unwrap();
    let result = tokio_test::block_on(server.process_parse_form(&parse));
    assert!(matches!(result, Err(Error::FileNotFound { .. })));

    let download = DownloadPdfParams {
        file_id: "nope".to_string(),
        output_path: None,
    };
    let result = tokio_test::block_on(server.process_download_pdf(&download));
    assert!(matches!(result, Err(Error::FileNotFound { .. })));
}
