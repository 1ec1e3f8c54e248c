#![forbid(unsafe_code)]

//! `diorama` is a headless interactive Mermaid view.
//!
//! It re-exports the render lifecycle from `diorama-core` and adds the parts a host UI drives
//! directly: the fullscreen pan/zoom controller, error cards and [`DiagramView`], which ties
//! them to the inline and fullscreen surfaces.
//!
//! The host paints; this crate decides what to paint and when to call the compiler.

pub use diorama_core::*;

pub mod error_panel;
pub mod geom;
pub mod handle;
pub mod view;
pub mod viewport;

pub use error_panel::{ErrorCard, ErrorDetails, ErrorPanel};
pub use handle::ViewHandle;
pub use view::{DiagramProps, DiagramView, Overlay, Presentation, SurfaceView};
pub use viewport::{
    Applied, CloseReason, InteractionMode, Key, PointerTarget, ViewMode, ViewTransform,
    ViewportController, ViewportState, WheelOutcome,
};
