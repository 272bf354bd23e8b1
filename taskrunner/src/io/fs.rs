//! Filesystem collaborator used by file tools and artifact collection.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::debug;

/// Read/write access to the task workspace.
///
/// Implementations sandbox paths themselves. The engine relies on
/// write-then-read consistency to collect artifacts.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String>;
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local directory sandbox: relative paths only, no `..` escapes.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a workspace-relative path to a location under the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(anyhow!("path escapes workspace: {path}"));
                }
            }
        }
        if depth == 0 {
            return Err(anyhow!("path names no file: {path:?}"));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Filesystem for LocalFs {
    async fn read_file(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("read {}", full.display()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("write {}", full.display()))?;
        debug!(path = %full.display(), bytes = content.len(), "wrote file");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .with_context(|| format!("stat {}", full.display()))
    }
}
