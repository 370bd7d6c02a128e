//! Sandboxed execution of untrusted Python and JavaScript snippets.
//!
//! A request flows through validation, static analysis, dependency
//! resolution, the security verdict, harness generation, supervised
//! execution and decoding. [`Engine`] is the entry point.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod harness;
pub mod resolver;
pub mod sandbox;
pub mod supervisor;

pub use config::{Language, SnipboxConfig};
pub use engine::Engine;
pub use error::{Result, SnipboxError};
pub use sandbox::{ExecutionRequest, ExecutionResult};
