//! File tools backed by the workspace [`Filesystem`].

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::core::schema::{ParamSpec, ParamType};
use crate::core::types::ToolParams;
use crate::error::RegistryError;
use crate::io::fs::Filesystem;
use crate::tools::registry::{Tool, ToolDefinition, ToolOutput, ToolRegistry};

fn path_param(params: &ToolParams) -> Result<&str> {
    params
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("path must be a string"))
}

/// Content may arrive as another step's structured output; write it as JSON.
fn content_param(params: &ToolParams) -> String {
    match params.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

pub struct WriteFileTool {
    fs: Arc<dyn Filesystem>,
    definition: ToolDefinition,
}

impl WriteFileTool {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        let definition = ToolDefinition::new(
            "write_file",
            "Create or overwrite a file in the workspace",
        )
        .param(
            "path",
            ParamSpec::required(ParamType::String).describe("Workspace-relative file path"),
        )
        .param(
            "content",
            ParamSpec::required(ParamType::Any).describe("Full file contents"),
        )
        .writes_file();
        Self { fs, definition }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, params: &ToolParams) -> Result<ToolOutput> {
        let path = path_param(params)?;
        let content = content_param(params);
        self.fs.write_file(path, &content).await?;
        Ok(ToolOutput::ok(json!({ "path": path, "content": content })))
    }
}

pub struct AppendFileTool {
    fs: Arc<dyn Filesystem>,
    definition: ToolDefinition,
}

impl AppendFileTool {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        let definition = ToolDefinition::new(
            "append_file",
            "Append text to a workspace file, creating it if missing",
        )
        .param("path", ParamSpec::required(ParamType::String))
        .param("content", ParamSpec::required(ParamType::Any))
        .param(
            "separator",
            ParamSpec::optional(ParamType::String).with_default(""),
        )
        .writes_file();
        Self { fs, definition }
    }
}

#[async_trait]
impl Tool for AppendFileTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, params: &ToolParams) -> Result<ToolOutput> {
        let path = path_param(params)?;
        let separator = params
            .get("separator")
            .and_then(Value::as_str)
            .unwrap_or_default();
        // A missing file starts empty; an unreadable one is an error.
        let mut content = if self.fs.exists(path).await? {
            self.fs
                .read_file(path)
                .await
                .with_context(|| format!("read {path} before appending"))?
        } else {
            String::new()
        };
        if !content.is_empty() {
            content.push_str(separator);
        }
        content.push_str(&content_param(params));
        self.fs.write_file(path, &content).await?;
        Ok(ToolOutput::ok(json!({ "path": path, "content": content })))
    }
}

pub struct ReadFileTool {
    fs: Arc<dyn Filesystem>,
    definition: ToolDefinition,
}

impl ReadFileTool {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        let definition = ToolDefinition::new("read_file", "Read a workspace file as text")
            .param("path", ParamSpec::required(ParamType::String));
        Self { fs, definition }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, params: &ToolParams) -> Result<ToolOutput> {
        let path = path_param(params)?;
        match self.fs.read_file(path).await {
            Ok(content) => Ok(ToolOutput::ok(content)),
            Err(err) => Ok(ToolOutput::failed(format!("{err:#}"))),
        }
    }
}

/// Register the file tools over `fs`.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    fs: Arc<dyn Filesystem>,
) -> Result<(), RegistryError> {
    registry.register(Arc::new(WriteFileTool::new(fs.clone())))?;
    registry.register(Arc::new(AppendFileTool::new(fs.clone())))?;
    registry.register(Arc::new(ReadFileTool::new(fs)))?;
    Ok(())
}
