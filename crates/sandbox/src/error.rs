use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// A program failed to build. Never fatal: the previous program stays active.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage} shader `{label}` failed to compile:\n{diagnostic}")]
pub struct CompileError {
    pub stage: ShaderStage,
    pub label: String,
    pub diagnostic: String,
}

impl CompileError {
    pub fn new(stage: ShaderStage, label: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            stage,
            label: label.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("missing resource {path}: {reason}")]
    MissingResource { path: PathBuf, reason: String },
    #[error("{0}")]
    FatalInit(String),
}

impl SandboxError {
    pub fn missing(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::MissingResource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
