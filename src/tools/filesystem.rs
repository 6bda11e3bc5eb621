//! File tools confined to a base directory.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::types::str_arg;
use crate::tools::{LocalToolProvider, Tool, ToolDefinition};

/// Resolves tool paths against a base directory and refuses to leave it.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self {
            root: normalize(&root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins `path` onto the root without touching the filesystem.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = normalize(&self.root.join(path));
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(ToolError::PermissionDenied(format!(
                "'{path}' is outside the allowed directory"
            )))
        }
    }
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_schema(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

pub struct ReadFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read the contents of a file".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": path_schema("The path to the file to read")},
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let path = self.sandbox.resolve(str_arg(arguments, "path")?)?;
        debug!("[Filesystem] read {}", path.display());
        Ok(tokio::fs::read_to_string(&path).await?)
    }
}

pub struct WriteFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": path_schema("The path to the file to write"),
                    "content": {"type": "string", "description": "The content to write to the file"}
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let raw = str_arg(arguments, "path")?;
        let content = str_arg(arguments, "content")?;
        let path = self.sandbox.resolve(raw)?;
        debug!("[Filesystem] write {}", path.display());
        tokio::fs::write(&path, content).await?;
        Ok(format!("Successfully wrote to {raw}"))
    }
}

#[derive(Serialize)]
struct DirectoryEntry {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

pub struct ListDirectoryTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List files and directories in a directory".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": path_schema("The path to the directory to list")},
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let raw = arguments["path"].as_str().unwrap_or(".");
        let path = self.sandbox.resolve(raw)?;
        let mut reader = tokio::fs::read_dir(&path).await?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let kind = if entry.file_type().await?.is_dir() {
                "directory"
            } else {
                "file"
            };
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        serde_json::to_string_pretty(&entries).map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}

pub struct CreateDirectoryTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_directory".to_string(),
            description: "Create a new directory".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": path_schema("The path to the directory to create")},
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let raw = str_arg(arguments, "path")?;
        let path = self.sandbox.resolve(raw)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(format!("Successfully created directory {raw}"))
    }
}

/// The four file tools sharing one sandbox.
pub fn filesystem_tools(root: impl AsRef<Path>) -> Result<LocalToolProvider, ToolError> {
    let sandbox = Arc::new(Sandbox::new(root)?);
    debug!("[Filesystem] Base directory {}", sandbox.root().display());
    Ok(LocalToolProvider::new("filesystem")
        .with_tool(ReadFileTool {
            sandbox: Arc::clone(&sandbox),
        })
        .with_tool(WriteFileTool {
            sandbox: Arc::clone(&sandbox),
        })
        .with_tool(ListDirectoryTool {
            sandbox: Arc::clone(&sandbox),
        })
        .with_tool(CreateDirectoryTool { sandbox }))
}
