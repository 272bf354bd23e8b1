//! Deterministic classification of file paths written by steps.

use std::path::Path;

use serde_json::Value;

use crate::core::types::{Step, ToolParams};

/// Parameter names that carry the target path of a file-writing tool, in
/// lookup order.
pub const PATH_PARAMS: [&str; 3] = ["path", "file_path", "filename"];

/// Parameter that carries the written content of a file-writing tool.
pub const CONTENT_PARAM: &str = "content";

/// Path a step writes, read from its literal parameters.
pub fn declared_write_path(step: &Step) -> Option<&str> {
    PATH_PARAMS.iter().find_map(|key| {
        step.parameters
            .get(*key)
            .and_then(|value| value.as_literal_str())
    })
}

/// Path a tool call writes, read from resolved parameters.
pub fn resolved_write_path(params: &ToolParams) -> Option<&str> {
    PATH_PARAMS
        .iter()
        .find_map(|key| params.get(*key).and_then(Value::as_str))
}

/// Literal content a tool call writes, if any.
pub fn resolved_content(params: &ToolParams) -> Option<String> {
    match params.get(CONTENT_PARAM)? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => serde_json::to_string_pretty(other).ok(),
    }
}

/// Final path component, or the whole input when it has none.
pub fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// Artifact type derived from the file extension.
pub fn artifact_type(path: &str) -> String {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let Some(extension) = extension else {
        return "text".to_string();
    };
    let kind = match extension.as_str() {
        "html" | "htm" => "html",
        "css" => "css",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "json" => "json",
        "md" | "markdown" => "markdown",
        "py" => "python",
        "rs" => "rust",
        "txt" | "log" => "text",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "svg" => "svg",
        "sh" => "shell",
        other => return other.to_string(),
    };
    kind.to_string()
}
