//! Contract with the external diagram compiler.
//!
//! The compiler (DSL parser + SVG renderer) is a black box. The core only decides when to call
//! it, with which id and description, and what to do with its output.

use std::any::Any;
use std::sync::OnceLock;

use futures::future::LocalBoxFuture;

use crate::config::ConfigMap;

/// Successful compiler output. The SVG markup is treated as opaque apart from its root tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDiagram {
    pub svg: String,
}

impl CompiledDiagram {
    pub fn new(svg: impl Into<String>) -> Self {
        Self { svg: svg.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorOrigin {
    /// The compiler rejected the description.
    Rejected,
    /// The compiler panicked while rendering.
    Panicked,
}

/// The error reported by the compiler, forwarded to `on_error` unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    message: String,
    origin: CompileErrorOrigin,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: CompileErrorOrigin::Rejected,
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self {
            message: format!("diagram compiler panicked: {detail}"),
            origin: CompileErrorOrigin::Panicked,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn origin(&self) -> CompileErrorOrigin {
        self.origin
    }
}

pub type CompileResult = Result<CompiledDiagram, CompileError>;

/// A diagram-description compiler.
///
/// Implementations are driven from a single UI thread, so render futures are `!Send`.
pub trait DiagramCompiler {
    /// One-time configuration. Called at most once per [`InitOnce`] guard.
    fn initialize(&self, config: &ConfigMap);

    /// Compiles `description` into SVG. `diagram_id` is unique per call and safe to use as the
    /// root `<svg id>`.
    fn render(&self, diagram_id: &str, description: &str) -> LocalBoxFuture<'static, CompileResult>;
}

/// Init-once guard for compiler configuration.
///
/// The first [`InitOnce::ensure`] call runs the initializer and records the configuration it
/// used; later calls are no-ops, whatever configuration they carry. Re-initializing a compiler
/// mid-session is never allowed.
#[derive(Debug)]
pub struct InitOnce {
    config: OnceLock<ConfigMap>,
}

impl Default for InitOnce {
    fn default() -> Self {
        Self::new()
    }
}

impl InitOnce {
    pub const fn new() -> Self {
        Self {
            config: OnceLock::new(),
        }
    }

    /// The process-wide guard used by engines that are not given their own.
    pub fn global() -> &'static InitOnce {
        static GLOBAL: InitOnce = InitOnce::new();
        &GLOBAL
    }

    /// Runs `init` with `config` unless this guard has already been initialized.
    ///
    /// Returns `true` if this call performed the initialization.
    pub fn ensure(&self, config: &ConfigMap, init: impl FnOnce(&ConfigMap)) -> bool {
        let mut ran = false;
        self.config.get_or_init(|| {
            init(config);
            ran = true;
            config.clone()
        });
        if ran {
            tracing::debug!("diagram compiler initialized");
        } else if self.config.get() != Some(config) {
            tracing::debug!("diagram compiler already initialized; ignoring new configuration");
        }
        ran
    }

    pub fn is_initialized(&self) -> bool {
        self.config.get().is_some()
    }

    /// The configuration the compiler was initialized with.
    pub fn config(&self) -> Option<&ConfigMap> {
        self.config.get()
    }
}
