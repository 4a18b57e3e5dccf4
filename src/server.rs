//! MCP Server implementation using rmcp

use crate::labels::{
    apply_labels, match_labels, parse_text_elements, sanitize_text_elements, BoundingBox,
    FieldType, LabelCandidate, MatchConfig, RawTextElement, RejectedElement, SanitizedElements,
};
use crate::pdf::{
    annotate_fields, extract_form_fields, extract_text_elements, fill_form_fields,
    get_document_info, render_page, DEFAULT_RENDER_DPI,
};
use crate::source::{
    resolve_base64, resolve_path, spawn_sweeper, FileStore, ResolvedPdf, DEFAULT_FILE_EXPIRY,
};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const ENV_UPLOAD_DIR: &str = "PDF_FORM_LABELER_UPLOAD_DIR";
const ENV_OUTPUT_DIR: &str = "PDF_FORM_LABELER_OUTPUT_DIR";
const ENV_FILE_EXPIRY_SECS: &str = "PDF_FORM_LABELER_FILE_EXPIRY_SECS";
const ENV_SWEEP_INTERVAL_SECS: &str = "PDF_FORM_LABELER_SWEEP_INTERVAL_SECS";
const ENV_RENDER_DPI: &str = "PDF_FORM_LABELER_RENDER_DPI";
const ENV_SEARCH_RADIUS: &str = "PDF_FORM_LABELER_SEARCH_RADIUS";
const ENV_MAX_CANDIDATES: &str = "PDF_FORM_LABELER_MAX_CANDIDATES";
const ENV_RESOURCE_DIRS: &str = "PDF_FORM_LABELER_RESOURCE_DIRS";

/// PDF source specification
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        let Some(obj) = value.as_object() else {
            return Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with \"path\" or \"base64\", but got {}",
                json_type_name(&value)
            )));
        };

        match (obj.get("path"), obj.get("base64")) {
            (Some(serde_json::Value::String(path)), _) => Ok(PdfSource::Path { path: path.clone() }),
            (Some(_), _) => Err(serde::de::Error::custom("\"path\" must be a string")),
            (None, Some(serde_json::Value::String(base64))) => Ok(PdfSource::Base64 {
                base64: base64.clone(),
            }),
            (None, Some(_)) => Err(serde::de::Error::custom("\"base64\" must be a string")),
            (None, None) => {
                let keys: Vec<&String> = obj.keys().collect();
                Err(serde::de::Error::custom(format!(
                    "Invalid source: expected an object with \"path\" or \"base64\", but got keys: {:?}",
                    keys
                )))
            }
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Null => "null",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Storage, matching and sandbox configuration for the labeler server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where uploads are written (default: `uploads`)
    pub upload_dir: PathBuf,
    /// Where filled PDFs are written (default: `output`)
    pub output_dir: PathBuf,
    /// Lifetime of an upload (default: 2 hours)
    pub file_expiry: Duration,
    /// How often expired uploads are swept (default: 10 minutes, zero disables)
    pub sweep_interval: Duration,
    /// Resolution used for annotated page images (default: 200)
    pub render_dpi: u16,
    /// Matching defaults, overridable per `parse_form` call
    pub match_config: MatchConfig,
    /// Directories that path sources and download paths must stay inside.
    /// Empty means unrestricted.
    pub resource_dirs: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("output"),
            file_expiry: DEFAULT_FILE_EXPIRY,
            sweep_interval: Duration::from_secs(10 * 60),
            render_dpi: DEFAULT_RENDER_DPI,
            match_config: MatchConfig::default(),
            resource_dirs: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PDF_FORM_LABELER_*` environment variables.
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_UPLOAD_DIR).filter(|s| !s.is_empty()) {
            config.upload_dir = dir.into();
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|s| !s.is_empty()) {
            config.output_dir = dir.into();
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_FILE_EXPIRY_SECS) {
            config.file_expiry = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_SWEEP_INTERVAL_SECS) {
            config.sweep_interval = Duration::from_secs(secs);
        }
        match parse_var::<u16>(&lookup, ENV_RENDER_DPI) {
            Some(0) => tracing::warn!(key = ENV_RENDER_DPI, "render dpi must be positive, ignoring"),
            Some(dpi) => config.render_dpi = dpi,
            None => {}
        }

        let match_config = MatchConfig {
            search_radius: parse_var(&lookup, ENV_SEARCH_RADIUS)
                .unwrap_or(config.match_config.search_radius),
            max_candidates: parse_var(&lookup, ENV_MAX_CANDIDATES)
                .unwrap_or(config.match_config.max_candidates),
        };
        match match_config.validate() {
            Ok(()) => config.match_config = match_config,
            Err(e) => tracing::warn!(error = %e, "ignoring matching settings"),
        }

        if let Some(dirs) = lookup(ENV_RESOURCE_DIRS) {
            config.resource_dirs = std::env::split_paths(&dirs)
                .map(|p| p.to_string_lossy().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

/// PDF form labeler MCP Server
#[derive(Clone)]
pub struct PdfServer {
    store: Arc<FileStore>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for upload_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadPdfParams {
    /// PDF to upload
    pub source: PdfSource,
    /// Name to record for the upload; must end in .pdf (defaults to the source file name)
    #[serde(default)]
    pub file_name: Option<String>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UploadPdfResult {
    /// Identifier for later calls
    pub file_id: String,
    pub file_name: String,
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for get_pdf_info
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetPdfInfoParams {
    /// File id returned by upload_pdf
    pub file_id: String,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PageSizeInfo {
    /// Page number (1-indexed)
    pub page: u32,
    /// Width in points
    pub width: f32,
    /// Height in points
    pub height: f32,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GetPdfInfoResult {
    pub file_id: String,
    pub file_name: String,
    pub total_pages: u32,
    pub page_sizes: Vec<PageSizeInfo>,
    /// Whether fill_form has produced an output for this upload
    pub has_output: bool,
    /// Upload time (RFC 3339)
    pub uploaded_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for parse_form
// ============================================================================

fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ParseFormParams {
    /// File id returned by upload_pdf
    pub file_id: String,
    /// Page to parse (1-indexed, default: 1)
    #[serde(default = "default_page")]
    pub page: u32,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Recognized text on the page, in normalized top-left coordinates.
    /// When neither this nor recognizer_output is given, the PDF text layer is used.
    #[serde(default)]
    pub text_elements: Option<Vec<RawTextElement>>,
    /// Raw recognizer reply containing a JSON array of text elements (markdown fences allowed)
    #[serde(default)]
    pub recognizer_output: Option<String>,
    /// Maximum center distance for a label candidate (normalized, default: 0.1)
    #[serde(default)]
    pub search_radius: Option<f64>,
    /// Maximum candidates per field (default: 5)
    #[serde(default)]
    pub max_candidates: Option<usize>,
    /// Return the rendered page with field boxes outlined, as base64 PNG
    #[serde(default)]
    pub include_annotated_image: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LabeledField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Best candidate text, empty when unmapped
    pub label: String,
    pub required: bool,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub bounding_box: BoundingBox,
    /// Candidates nearest first
    pub candidates: Vec<LabelCandidate>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ParseFormResult {
    pub file_id: String,
    pub fields: Vec<LabeledField>,
    /// Names of fields without any candidate
    pub unmapped: Vec<String>,
    /// Recognizer entries that were dropped
    pub rejected_text_elements: Vec<RejectedElement>,
    /// "recognizer" or "text_layer"
    pub text_source: String,
    pub current_page: u32,
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for fill_form
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FillFormParams {
    /// File id returned by upload_pdf
    pub file_id: String,
    /// Field name to value. Strings fill text fields; booleans or
    /// "true"/"false" set checkboxes and radio buttons.
    pub field_data: BTreeMap<String, serde_json::Value>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SkippedFieldInfo {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FillFormResult {
    pub file_id: String,
    pub fields_filled: u32,
    pub fields_skipped: Vec<SkippedFieldInfo>,
    /// Name to offer the filled PDF under
    pub download_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for download_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadPdfParams {
    /// File id returned by upload_pdf
    pub file_id: String,
    /// Write the filled PDF to this path instead of returning base64
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DownloadPdfResult {
    pub file_id: String,
    pub download_name: String,
    pub size_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for cleanup
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CleanupParams {
    /// File id returned by upload_pdf
    pub file_id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CleanupResult {
    pub file_id: String,
    /// False when the id was unknown or already expired
    pub success: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CleanupExpiredResult {
    pub cleanup_count: usize,
}

/// Stringify a fill value; null means "leave untouched"
fn field_value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Run CPU-bound PDFium work off the async runtime
async fn run_blocking<T, F>(f: F) -> crate::error::Result<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| crate::error::Error::Pdfium {
            reason: format!("Task join error: {}", e),
        })?
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[tool_router]
impl PdfServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new PdfServer with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let store = FileStore::new(
            config.upload_dir.clone(),
            config.output_dir.clone(),
            config.file_expiry,
        );
        Self {
            store: Arc::new(store),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Shared upload store
    pub fn store(&self) -> Arc<FileStore> {
        self.store.clone()
    }

    /// Upload a PDF for labeling
    #[tool(
        description = "Upload a PDF form. Returns a file_id used by every other tool.

Uploads expire after a configurable time (2 hours by default).

Source format: must be one of {\"path\": \"/absolute/path.pdf\"} or {\"base64\": \"...\"}"
    )]
    async fn upload_pdf(&self, Parameters(params): Parameters<UploadPdfParams>) -> String {
        let result = self.process_upload_pdf(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "upload_pdf failed");
            UploadPdfResult {
                file_id: String::new(),
                file_name: params.file_name.clone().unwrap_or_default(),
                total_pages: 0,
                error: Some(e.client_message()),
            }
        });
        to_json(&result)
    }

    /// Page count and sizes of an upload
    #[tool(description = "Get page count, page sizes and fill status of an uploaded PDF.")]
    async fn get_pdf_info(&self, Parameters(params): Parameters<GetPdfInfoParams>) -> String {
        let result = self.process_get_pdf_info(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "get_pdf_info failed");
            GetPdfInfoResult {
                file_id: params.file_id.clone(),
                file_name: String::new(),
                total_pages: 0,
                page_sizes: vec![],
                has_output: false,
                uploaded_at: String::new(),
                error: Some(e.client_message()),
            }
        });
        to_json(&result)
    }

    /// Label the form fields of one page
    #[tool(
        description = "Extract the form fields of one page and label each with the nearest recognized text.

Each field gets up to max_candidates label candidates within search_radius of its center
(distances are in normalized page units, 0.0-1.0), nearest first; ties go to the higher
confidence. label is the best candidate, or empty when the field is unmapped.

Recognized text can be supplied as text_elements:
[{\"text\": \"Name\", \"type\": \"paragraph\", \"page\": 1, \"bounding_box\": {\"x1\": 0.1, \"y1\": 0.2, \"x2\": 0.3, \"y2\": 0.25}, \"confidence\": 0.9}]
with y measured from the top of the page, or as the raw reply of a vision model in recognizer_output.
Without either, the PDF's own text layer is used. Malformed entries are skipped and listed
in rejected_text_elements."
    )]
    async fn parse_form(&self, Parameters(params): Parameters<ParseFormParams>) -> String {
        let result = self.process_parse_form(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "parse_form failed");
            ParseFormResult {
                file_id: params.file_id.clone(),
                fields: vec![],
                unmapped: vec![],
                rejected_text_elements: vec![],
                text_source: String::new(),
                current_page: params.page,
                total_pages: 0,
                annotated_image_base64: None,
                error: Some(e.client_message()),
            }
        });
        to_json(&result)
    }

    /// Fill the form fields of an upload
    #[tool(
        description = "Fill form fields of an uploaded PDF by name and keep the result for download_pdf.

field_data maps field names (as returned by parse_form) to values. Text fields take strings;
checkboxes and radio buttons take true/false. Unknown names and unsupported field types
are reported in fields_skipped.

Limitation: a value is applied to the first widget found with its name. For a radio group
whose options share one name, only that first option can be selected; \"true\" selects it
and any other value is reported in fields_skipped."
    )]
    async fn fill_form(&self, Parameters(params): Parameters<FillFormParams>) -> String {
        let result = self.process_fill_form(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "fill_form failed");
            FillFormResult {
                file_id: params.file_id.clone(),
                fields_filled: 0,
                fields_skipped: vec![],
                download_name: String::new(),
                error: Some(e.client_message()),
            }
        });
        to_json(&result)
    }

    /// Fetch the filled PDF
    #[tool(
        description = "Get the filled PDF produced by fill_form, as base64 or written to output_path.

download_name is <original name>_filled.pdf."
    )]
    async fn download_pdf(&self, Parameters(params): Parameters<DownloadPdfParams>) -> String {
        let result = self.process_download_pdf(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "download_pdf failed");
            DownloadPdfResult {
                file_id: params.file_id.clone(),
                download_name: String::new(),
                size_bytes: 0,
                data_base64: None,
                output_path: None,
                error: Some(e.client_message()),
            }
        });
        to_json(&result)
    }

    /// Delete an upload
    #[tool(description = "Delete an uploaded PDF and its filled output.")]
    async fn cleanup(&self, Parameters(params): Parameters<CleanupParams>) -> String {
        let success = self.store.remove(&params.file_id);
        tracing::info!(file_id = %params.file_id, success, "cleanup");
        to_json(&CleanupResult {
            file_id: params.file_id,
            success,
        })
    }

    /// Sweep expired uploads now
    #[tool(description = "Delete every expired upload immediately instead of waiting for the background sweep.")]
    async fn cleanup_expired(&self) -> String {
        to_json(&CleanupExpiredResult {
            cleanup_count: self.store.sweep_expired(),
        })
    }

    fn resolve_source(&self, source: &PdfSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path } => {
                let path = self.validate_path_access(path)?;
                resolve_path(path)
            }
            PdfSource::Base64 { base64 } => resolve_base64(base64),
        }
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| {
            crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            }
        })?;

        self.ensure_in_resource_dirs(canonical, path)
    }

    /// Like [`Self::validate_path_access`], but the target may not exist yet,
    /// so only its parent is canonicalized.
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let path_obj = Path::new(path);
        let file_name = path_obj.file_name().ok_or_else(|| {
            crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            }
        })?;
        let parent = match path_obj.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let canonical_parent = std::fs::canonicalize(parent).map_err(|_| {
            crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            }
        })?;

        self.ensure_in_resource_dirs(canonical_parent.join(file_name), path)
    }

    fn ensure_in_resource_dirs(
        &self,
        canonical: PathBuf,
        requested: &str,
    ) -> crate::error::Result<PathBuf> {
        let allowed = self.config.resource_dirs.iter().any(|dir| {
            std::fs::canonicalize(dir)
                .map(|canonical_dir| canonical.starts_with(&canonical_dir))
                .unwrap_or(false)
        });

        if allowed {
            Ok(canonical)
        } else {
            Err(crate::error::Error::PathAccessDenied {
                path: requested.to_string(),
            })
        }
    }

    fn read_upload(&self, file_id: &str) -> crate::error::Result<Vec<u8>> {
        let path = self.store.upload_path(file_id)?;
        Ok(std::fs::read(path)?)
    }

    pub async fn process_upload_pdf(
        &self,
        params: &UploadPdfParams,
    ) -> crate::error::Result<UploadPdfResult> {
        let resolved = self.resolve_source(&params.source)?;
        let file_name = params
            .file_name
            .clone()
            .unwrap_or_else(|| resolved.source_name.clone());

        let file_id = self.store.save_upload(&file_name, &resolved.data)?;

        let data = resolved.data;
        let password = params.password.clone();
        let info = run_blocking(move || get_document_info(&data, password.as_deref())).await;

        match info {
            Ok(info) => Ok(UploadPdfResult {
                file_id,
                file_name,
                total_pages: info.page_count,
                error: None,
            }),
            Err(e) => {
                // Unreadable uploads are not kept
                self.store.remove(&file_id);
                Err(e)
            }
        }
    }

    pub async fn process_get_pdf_info(
        &self,
        params: &GetPdfInfoParams,
    ) -> crate::error::Result<GetPdfInfoResult> {
        let stored = self.store.info(&params.file_id)?;
        let data = std::fs::read(&stored.upload_path)?;
        let password = params.password.clone();

        let info = run_blocking(move || get_document_info(&data, password.as_deref())).await?;

        let page_sizes = info
            .page_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| PageSizeInfo {
                page: i as u32 + 1,
                width: size.width,
                height: size.height,
            })
            .collect();

        Ok(GetPdfInfoResult {
            file_id: params.file_id.clone(),
            file_name: stored.original_name.clone(),
            total_pages: info.page_count,
            page_sizes,
            has_output: stored.output_path.as_ref().is_some_and(|p| p.is_file()),
            uploaded_at: stored.created_at.to_rfc3339(),
            error: None,
        })
    }

    pub async fn process_parse_form(
        &self,
        params: &ParseFormParams,
    ) -> crate::error::Result<ParseFormResult> {
        if params.page == 0 {
            return Err(crate::error::Error::invalid_argument(
                "page must be >= 1 (pages are 1-indexed)",
            ));
        }

        let match_config = MatchConfig {
            search_radius: params
                .search_radius
                .unwrap_or(self.config.match_config.search_radius),
            max_candidates: params
                .max_candidates
                .unwrap_or(self.config.match_config.max_candidates),
        };
        match_config.validate()?;

        let recognized: Option<SanitizedElements> =
            match (&params.text_elements, &params.recognizer_output) {
                (Some(_), Some(_)) => {
                    return Err(crate::error::Error::invalid_argument(
                        "pass either text_elements or recognizer_output, not both",
                    ))
                }
                (Some(raw), None) => Some(sanitize_text_elements(raw.clone(), params.page)),
                (None, Some(reply)) => Some(parse_text_elements(reply, params.page)?),
                (None, None) => None,
            };
        let text_source = if recognized.is_some() {
            "recognizer"
        } else {
            "text_layer"
        };
        let (provided, rejected) = match recognized {
            Some(s) => (Some(s.elements), s.rejected),
            None => (None, Vec::new()),
        };

        let data = self.read_upload(&params.file_id)?;
        let password = params.password.clone();
        let page = params.page;
        let dpi = self.config.render_dpi;
        let include_image = params.include_annotated_image;

        let (total_pages, fields, texts, annotated) = run_blocking(move || {
            let info = get_document_info(&data, password.as_deref())?;
            if page > info.page_count {
                return Err(crate::error::Error::PageOutOfBounds {
                    page,
                    total: info.page_count,
                });
            }

            let fields = extract_form_fields(&data, password.as_deref(), Some(page))?;
            let texts = match provided {
                Some(texts) => texts,
                None => extract_text_elements(&data, password.as_deref(), page)?,
            };

            let annotated = if include_image {
                let rendered = render_page(&data, password.as_deref(), page, dpi)?;
                Some(annotate_fields(&rendered.image, &fields)?)
            } else {
                None
            };

            Ok((info.page_count, fields, texts, annotated))
        })
        .await?;

        let matches = match_labels(&fields, &texts, &match_config)?;
        let mut fields = fields;
        apply_labels(&mut fields, &matches);

        tracing::info!(
            file_id = %params.file_id,
            page,
            fields = fields.len(),
            texts = texts.len(),
            unmapped = matches.unmapped().len(),
            text_source,
            "parsed form page"
        );

        let labeled = fields
            .into_iter()
            .map(|f| LabeledField {
                candidates: matches.candidates(&f.name).unwrap_or_default().to_vec(),
                label: f.label.unwrap_or_default(),
                name: f.name,
                field_type: f.field_type,
                required: f.required,
                page: f.page,
                value: f.value,
                bounding_box: f.bounding_box,
            })
            .collect();

        Ok(ParseFormResult {
            file_id: params.file_id.clone(),
            fields: labeled,
            unmapped: matches.unmapped().into_iter().map(String::from).collect(),
            rejected_text_elements: rejected,
            text_source: text_source.to_string(),
            current_page: page,
            total_pages,
            annotated_image_base64: annotated
                .map(|png| base64::engine::general_purpose::STANDARD.encode(png)),
            error: None,
        })
    }

    pub async fn process_fill_form(
        &self,
        params: &FillFormParams,
    ) -> crate::error::Result<FillFormResult> {
        let stored = self.store.info(&params.file_id)?;
        let data = std::fs::read(&stored.upload_path)?;

        let field_data: BTreeMap<String, String> = params
            .field_data
            .iter()
            .filter_map(|(name, value)| field_value_to_string(value).map(|v| (name.clone(), v)))
            .collect();
        let password = params.password.clone();

        let (output_data, report) =
            run_blocking(move || fill_form_fields(&data, password.as_deref(), &field_data))
                .await?;

        self.store.write_output(&params.file_id, &output_data)?;

        tracing::info!(
            file_id = %params.file_id,
            filled = report.fields_filled,
            skipped = report.fields_skipped.len(),
            "filled form"
        );

        Ok(FillFormResult {
            file_id: params.file_id.clone(),
            fields_filled: report.fields_filled,
            fields_skipped: report
                .fields_skipped
                .into_iter()
                .map(|s| SkippedFieldInfo {
                    name: s.name,
                    reason: s.reason,
                })
                .collect(),
            download_name: stored.download_name(),
            error: None,
        })
    }

    pub async fn process_download_pdf(
        &self,
        params: &DownloadPdfParams,
    ) -> crate::error::Result<DownloadPdfResult> {
        let stored = self.store.info(&params.file_id)?;
        let output = self.store.output_path(&params.file_id)?;
        let data = std::fs::read(output)?;

        let (data_base64, output_path) = match &params.output_path {
            Some(path) => {
                let target = self.validate_output_path_access(path)?;
                if let Some(parent) = target.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(&target, &data)?;
                (None, Some(path.clone()))
            }
            None => (
                Some(base64::engine::general_purpose::STANDARD.encode(&data)),
                None,
            ),
        };

        Ok(DownloadPdfResult {
            file_id: params.file_id.clone(),
            download_name: stored.download_name(),
            size_bytes: data.len(),
            data_base64,
            output_path,
            error: None,
        })
    }
}

impl Default for PdfServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for PdfServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF form labeler: upload_pdf a form, parse_form each page to get its fields \
                 labeled with nearby text, fill_form by field name, then download_pdf. \
                 Uploads expire; cleanup removes them early."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let sweep_interval = config.sweep_interval;
    let server = PdfServer::with_config(config);

    let sweeper = if sweep_interval.is_zero() {
        tracing::info!("expiry sweep disabled");
        None
    } else {
        Some(spawn_sweeper(server.store(), sweep_interval))
    };

    tracing::info!("PDF form labeler ready, waiting for connections...");

    let served = async {
        let service = server.serve(rmcp::transport::io::stdio()).await?;
        service.waiting().await?;
        anyhow::Ok(())
    }
    .await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    served
}
