mod backends;
mod factory;
mod request;
mod traits;

pub use backends::{node_permission_flag, JavaScriptBackend, PythonBackend};
pub use factory::{available_backends, build_backend, create_backend, BackendInfo};
pub use request::{ExecutionRequest, ExecutionResult};
pub use traits::{BackendCapabilities, SandboxBackend};
