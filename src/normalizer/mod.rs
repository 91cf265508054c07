//! Result normalization
//!
//! Two very different result shapes end up as one document list:
//! - the structured path receives one Extended JSON string per document
//!   from the driver layer
//! - the shell path receives whatever text the external shell printed
//!
//! Neither path fails. Unparseable documents become placeholders and
//! unrecognized shell output becomes a single `{ _result: <text> }` document.

use std::collections::BTreeSet;

use mongodb::bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborator::FindResponse;
use crate::query::ast::Expr;
use crate::query::{ExpressionConverter, Parser};
use crate::schema::FieldObservations;

/// Key of the error message in a placeholder document
pub const PARSE_ERROR_FIELD: &str = "_parseError";

/// Key of the raw text in a placeholder document
pub const RAW_FIELD: &str = "_raw";

/// Key of the text in a shell fallback document
pub const RESULT_FIELD: &str = "_result";

/// A document that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIssue {
    /// Position of the placeholder in the result list
    pub index: usize,
    pub message: String,
}

/// Normalized query results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResult {
    pub documents: Vec<Document>,
    pub total: u64,
    pub query_time_ms: Option<u64>,
    pub issues: Vec<DocumentIssue>,
}

/// Outcome of parsing shell text
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedShellOutput {
    /// Whether the text was recognized as a sequence of documents
    pub success: bool,
    pub data: Vec<Document>,
}

/// Stateless result normalizer
pub struct OutputNormalizer;

impl OutputNormalizer {
    /// Normalize a structured find response
    ///
    /// # Arguments
    /// * `response` - Raw page from the driver layer
    ///
    /// # Returns
    /// * `NormalizedResult` - One document per input string, placeholders for failures
    pub fn normalize_documents(response: FindResponse) -> NormalizedResult {
        let mut documents = Vec::with_capacity(response.documents.len());
        let mut issues = Vec::new();

        for (index, raw) in response.documents.into_iter().enumerate() {
            match parse_extended_json(&raw) {
                Ok(document) => documents.push(document),
                Err(message) => {
                    warn!("Document {} could not be parsed: {}", index, message);
                    documents.push(doc! {
                        PARSE_ERROR_FIELD: message.as_str(),
                        RAW_FIELD: raw,
                    });
                    issues.push(DocumentIssue { index, message });
                }
            }
        }

        NormalizedResult {
            documents,
            total: response.total,
            query_time_ms: Some(response.query_time_ms),
            issues,
        }
    }

    /// Normalize text printed by the external shell
    ///
    /// # Arguments
    /// * `output` - Raw stdout
    ///
    /// # Returns
    /// * `NormalizedResult` - Parsed documents, or one `_result` document holding the text
    pub fn normalize_shell_output(output: &str) -> NormalizedResult {
        let parsed = Self::parse_shell_output(output);
        if parsed.success {
            let total = parsed.data.len() as u64;
            return NormalizedResult {
                documents: parsed.data,
                total,
                query_time_ms: None,
                issues: Vec::new(),
            };
        }

        NormalizedResult {
            documents: vec![doc! { RESULT_FIELD: output.trim() }],
            total: 1,
            query_time_ms: None,
            issues: Vec::new(),
        }
    }

    /// Parse shell text as a sequence of documents or arrays of documents
    pub fn parse_shell_output(output: &str) -> ParsedShellOutput {
        let trimmed = output.trim();
        if trimmed.is_empty() || trimmed == "[]" {
            return ParsedShellOutput {
                success: true,
                data: Vec::new(),
            };
        }

        let failed = ParsedShellOutput {
            success: false,
            data: Vec::new(),
        };

        let values = match Parser::parse_sequence(trimmed) {
            Ok(values) => values,
            Err(e) => {
                debug!("Shell output is not a value sequence: {}", e);
                return failed;
            }
        };

        let mut data = Vec::new();
        for value in &values {
            match &value.expr {
                Expr::Object(_) => match ExpressionConverter::expr_to_document(&value.expr) {
                    Ok(document) => data.push(document),
                    Err(e) => {
                        debug!("Shell document not convertible: {}", e);
                        return failed;
                    }
                },
                Expr::Array(array) => {
                    for element in &array.elements {
                        match ExpressionConverter::expr_to_document(element) {
                            Ok(document) => data.push(document),
                            Err(e) => {
                                debug!("Shell array element not a document: {}", e);
                                return failed;
                            }
                        }
                    }
                }
                _ => return failed,
            }
        }

        ParsedShellOutput {
            success: true,
            data,
        }
    }

    /// Dotted field paths in `documents`, counted once per document
    ///
    /// Recurses into sub-documents and into arrays of documents.
    pub fn extract_field_paths(documents: &[Document]) -> FieldObservations {
        let mut observations = FieldObservations::default();
        for document in documents {
            let mut paths = BTreeSet::new();
            collect_paths(document, "", &mut paths);
            for path in paths {
                *observations.fields.entry(path).or_default() += 1;
            }
            observations.documents += 1;
        }
        observations
    }
}

/// Parse one Extended JSON document
fn parse_extended_json(raw: &str) -> std::result::Result<Document, String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    match Bson::try_from(value).map_err(|e| e.to_string())? {
        Bson::Document(document) => Ok(document),
        other => Err(format!("expected a document, found {:?}", other.element_type())),
    }
}

fn collect_paths(document: &Document, prefix: &str, paths: &mut BTreeSet<String>) {
    for (key, value) in document {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        collect_value_paths(value, &path, paths);
        paths.insert(path);
    }
}

fn collect_value_paths(value: &Bson, path: &str, paths: &mut BTreeSet<String>) {
    match value {
        Bson::Document(sub) => collect_paths(sub, path, paths),
        Bson::Array(items) => {
            for item in items {
                if let Bson::Document(sub) = item {
                    collect_paths(sub, path, paths);
                }
            }
        }
        _ => {}
    }
}
