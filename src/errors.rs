use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid {family} input: {reason}")]
    InvalidInputFormat { family: &'static str, reason: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub(crate) fn invalid(family: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInputFormat { family, reason: reason.into() }
    }
}

/// Failure of the external chart renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer binary not found: {0}")]
    ToolNotFound(String),
    #[error("renderer exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
    #[error("renderer produced no output")]
    EmptyOutput,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to read a chart descriptor (`Chart.yaml`).
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("chart descriptor not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid chart descriptor: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("archive inspection failed: {0}")]
    Render(#[from] RenderError),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Parse error in file {}: {source}", .file.display())]
    Parse { file: PathBuf, source: ParseError },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid query: {0}")]
    Query(String),
}
