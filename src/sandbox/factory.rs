use crate::config::{Language, SnipboxConfig};
use crate::error::{Result, SnipboxError};
use crate::sandbox::backends::{JavaScriptBackend, PythonBackend};
use crate::sandbox::traits::SandboxBackend;
use crate::supervisor::syscall_filter_supported;

/// Create the backend for `language`, failing when its interpreter is
/// missing on this system.
pub fn create_backend(language: Language, config: &SnipboxConfig) -> Result<Box<dyn SandboxBackend>> {
    match language {
        Language::Python => {
            if !PythonBackend::is_available(&config.python) {
                return Err(SnipboxError::BackendNotAvailable {
                    backend: "python".to_string(),
                    reason: format!(
                        "Interpreter '{}' was not found on PATH",
                        config.python.interpreter.display()
                    ),
                });
            }
        }
        Language::JavaScript => {
            if !JavaScriptBackend::is_available(&config.javascript) {
                return Err(SnipboxError::BackendNotAvailable {
                    backend: "javascript".to_string(),
                    reason: format!(
                        "Node binary '{}' was not found on PATH",
                        config.javascript.node_binary.display()
                    ),
                });
            }
        }
    }

    Ok(build_backend(language, config))
}

/// Construct the backend for `language` without probing the system.
///
/// A missing interpreter surfaces on the first run instead.
pub fn build_backend(language: Language, config: &SnipboxConfig) -> Box<dyn SandboxBackend> {
    match language {
        Language::Python => Box::new(PythonBackend::new(config)),
        Language::JavaScript => Box::new(JavaScriptBackend::new(config)),
    }
}

/// Get information about available backends on this system.
pub fn available_backends(config: &SnipboxConfig) -> Vec<BackendInfo> {
    let filter_supported = syscall_filter_supported();

    let python_available = PythonBackend::is_available(&config.python);
    let javascript_available = JavaScriptBackend::is_available(&config.javascript);

    vec![
        BackendInfo {
            name: "python",
            language: Language::Python,
            available: python_available,
            description: "CPython subprocess with import denylist and dependency installation",
            syscall_filter: config.python.syscall_filter && filter_supported,
            unavailable_reason: if python_available {
                None
            } else {
                Some(format!(
                    "Interpreter '{}' not found",
                    config.python.interpreter.display()
                ))
            },
        },
        BackendInfo {
            name: "javascript",
            language: Language::JavaScript,
            available: javascript_available,
            description: "Node.js vm context under the permission model",
            syscall_filter: config.javascript.syscall_filter && filter_supported,
            unavailable_reason: if javascript_available {
                None
            } else {
                Some(format!(
                    "Node binary '{}' not found",
                    config.javascript.node_binary.display()
                ))
            },
        },
    ]
}

/// Information about a language backend.
pub struct BackendInfo {
    pub name: &'static str,
    pub language: Language,
    pub available: bool,
    pub description: &'static str,
    /// Whether runs will be confined by the syscall filter
    pub syscall_filter: bool,
    pub unavailable_reason: Option<String>,
}
