use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnipboxError {
    // Request errors
    #[error("Invalid request: {0}")]
    MalformedRequest(String),

    // Dependency errors
    #[error("Failed to install packages: {}", packages.join(", "))]
    DependencyResolution { packages: Vec<String> },

    #[error("Failed to install {package}: {reason}")]
    InstallFailed { package: String, reason: String },

    // Security errors
    #[error("Importing {name} is not allowed.")]
    DeniedImport { name: String },

    #[error("File write operations are not allowed: {pattern}")]
    DeniedFileOp { pattern: String },

    #[error("Dangerous behavior detected: process was terminated by the sandbox syscall filter")]
    SandboxTerminated,

    // Execution errors
    #[error("Timeout error: execution exceeded {millis} ms")]
    Timeout { millis: u64 },

    #[error("{0}")]
    RuntimeFailure(String),

    #[error("No output from code execution")]
    EmptyOutput,

    #[error("Failed to decode execution output: {0}")]
    DecodeFailure(String),

    // Sandbox setup errors
    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),

    #[error("Backend '{backend}' is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnipboxError {
    /// Whether the error was raised by one of the static security checks or
    /// by the syscall filter.
    pub fn is_security_denial(&self) -> bool {
        matches!(
            self,
            Self::DeniedImport { .. } | Self::DeniedFileOp { .. } | Self::SandboxTerminated
        )
    }
}

pub type Result<T> = std::result::Result<T, SnipboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_message_names_every_package() {
        let err = SnipboxError::DependencyResolution {
            packages: vec!["foo".to_string(), "bar-baz".to_string()],
        };
        assert_eq!(err.to_string(), "Failed to install packages: foo, bar-baz");
    }

    #[test]
    fn test_security_messages() {
        let err = SnipboxError::DeniedImport {
            name: "subprocess".to_string(),
        };
        assert_eq!(err.to_string(), "Importing subprocess is not allowed.");
        assert!(err.is_security_denial());

        let err = SnipboxError::DeniedFileOp {
            pattern: "open(".to_string(),
        };
        assert!(err.to_string().ends_with("open("));
        assert!(!SnipboxError::EmptyOutput.is_security_denial());
    }
}
