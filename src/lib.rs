//! PDF Form Labeler Library
//!
//! Finds the human-readable label of every interactive field in a PDF form by
//! matching field boxes to nearby recognized text, and exposes the workflow as
//! MCP tools:
//! - `upload_pdf`: Store a PDF and get a file id
//! - `parse_form`: Extract a page's fields and label them
//! - `fill_form`: Fill fields by name
//! - `download_pdf`: Fetch the filled PDF
//!
//! The matcher in [`labels`] is pure and can be used without the server.

pub mod error;
pub mod labels;
pub mod pdf;
pub mod server;
pub mod source;

pub use error::{Error, Result};
pub use labels::{match_labels, BoundingBox, FormField, LabelCandidate, MatchConfig, TextElement};
pub use server::{run_server, run_server_with_config, PdfServer, PdfSource, ServerConfig};
