#![forbid(unsafe_code)]

//! Render lifecycle core for interactive Mermaid views (headless).
//!
//! - the external compiler is reached only through [`DiagramCompiler`]
//! - each surface accepts results only from its latest request ([`RenderEngine`])
//! - compiler failures become classified [`ErrorInfo`] values, never panics in the host

pub mod classify;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod svg;

pub use classify::{ErrorCategory, ErrorInfo, classify};
pub use compiler::{
    CompileError, CompileErrorOrigin, CompileResult, CompiledDiagram, DiagramCompiler, InitOnce,
};
pub use config::ConfigMap;
pub use engine::{CompletedRender, Notification, PendingRender, RenderEngine, Resolution};
pub use error::{Error, Result};
pub use model::{
    DiagramRequest, MountedVisual, RenderOutcome, RenderStatus, RequestToken, Sizing, SurfaceKind,
};
