mod javascript;
mod python;

pub use javascript::{node_permission_flag, JavaScriptBackend};
pub use python::PythonBackend;
