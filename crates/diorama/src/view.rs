//! `DiagramView`: one diagram with an inline preview and a fullscreen overlay.
//!
//! The view owns a [`RenderEngine`], a [`ViewportController`] and one optional [`ErrorPanel`]
//! per surface. Every operation that may start a compile returns the [`PendingRender`] to the
//! caller; the host awaits it and hands the completion back to [`DiagramView::resolve`]
//! (or lets [`crate::ViewHandle`] do both).

use std::fmt;
use std::rc::Rc;

use chrono::FixedOffset;
use indexmap::IndexMap;
use serde_json::Value;

use diorama_core::{
    CompileError, CompletedRender, ConfigMap, DiagramCompiler, InitOnce, MountedVisual,
    Notification, PendingRender, RenderEngine, Resolution, SurfaceKind,
};

use crate::error_panel::{ErrorCard, ErrorPanel};
use crate::geom::Point;
use crate::viewport::{
    Applied, CloseReason, InteractionMode, Key, PointerTarget, ViewMode, ViewTransform,
    ViewportController, ViewportState, WheelOutcome,
};

/// Pass-through presentation hints for the host element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presentation {
    pub class_name: Option<String>,
    pub style: IndexMap<String, String>,
}

impl Presentation {
    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_style(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(property.into(), value.into());
        self
    }

    /// Serializes the style map in author order, e.g. `margin: 0 auto; border: none;`.
    pub fn style_attribute(&self) -> String {
        self.style
            .iter()
            .map(|(k, v)| format!("{k}: {v};"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

type ErrorCallback = Box<dyn FnMut(&CompileError)>;
type RenderCallback = Box<dyn FnMut()>;

/// Inputs of a [`DiagramView`].
pub struct DiagramProps {
    pub diagram: String,
    pub presentation: Presentation,
    pub config: ConfigMap,
    pub on_error: Option<ErrorCallback>,
    pub on_render: Option<RenderCallback>,
}

impl fmt::Debug for DiagramProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagramProps")
            .field("diagram", &self.diagram)
            .field("presentation", &self.presentation)
            .field("config", &self.config)
            .field("on_error", &self.on_error.is_some())
            .field("on_render", &self.on_render.is_some())
            .finish()
    }
}

impl DiagramProps {
    pub fn new(diagram: impl Into<String>) -> Self {
        Self {
            diagram: diagram.into(),
            presentation: Presentation::default(),
            config: ConfigMap::empty_object(),
            on_error: None,
            on_render: None,
        }
    }

    pub fn with_presentation(mut self, presentation: Presentation) -> Self {
        self.presentation = presentation;
        self
    }

    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }

    /// Sets a single config option by dotted path, e.g. `"flowchart.padding"`.
    pub fn with_option(mut self, dotted_path: &str, value: Value) -> diorama_core::Result<Self> {
        self.config.set_option(dotted_path, value)?;
        Ok(self)
    }

    pub fn on_error(mut self, callback: impl FnMut(&CompileError) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_render(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_render = Some(Box::new(callback));
        self
    }
}

/// What a surface currently shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceView<'a> {
    Empty,
    Loading,
    Rendered(&'a MountedVisual),
    Failed(&'a ErrorPanel),
}

/// Paint model for the fullscreen overlay. Only exists while fullscreen.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay<'a> {
    pub surface: SurfaceView<'a>,
    /// Pan/zoom controls are shown and live only when a visual is mounted.
    pub interactive: bool,
    pub transform_css: String,
    pub transition_css: &'static str,
    pub cursor: &'static str,
    pub zoom_label: String,
}

pub struct DiagramView {
    engine: RenderEngine,
    viewport: ViewportController,
    diagram: String,
    presentation: Presentation,
    inline_error: Option<ErrorPanel>,
    fullscreen_error: Option<ErrorPanel>,
}

impl fmt::Debug for DiagramView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagramView")
            .field("diagram", &self.diagram)
            .field("mode", &self.viewport.mode())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl DiagramView {
    pub fn new(compiler: Rc<dyn DiagramCompiler>, props: DiagramProps) -> Self {
        let DiagramProps {
            diagram,
            presentation,
            config,
            on_error,
            on_render,
        } = props;

        let mut engine = RenderEngine::new(compiler).with_config(&config);
        if let Some(mut callback) = on_error {
            engine.set_on_error(move |err| callback(err));
        }
        if let Some(mut callback) = on_render {
            engine.set_on_render(move || callback());
        }

        Self {
            engine,
            viewport: ViewportController::new(),
            diagram,
            presentation,
            inline_error: None,
            fullscreen_error: None,
        }
    }

    /// Uses `guard` instead of the process-wide compiler initialization guard.
    pub fn with_init_guard(mut self, guard: &'static InitOnce) -> Self {
        self.engine = self.engine.with_init_guard(guard);
        self
    }

    pub fn with_id_prefix(mut self, prefix: &str) -> Self {
        self.engine = self.engine.with_id_prefix(prefix);
        self
    }

    pub fn diagram(&self) -> &str {
        &self.diagram
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.engine
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn mode(&self) -> ViewMode {
        self.viewport.mode()
    }

    pub fn active_surface(&self) -> SurfaceKind {
        match self.viewport.mode() {
            ViewMode::Inline => SurfaceKind::Inline,
            ViewMode::Fullscreen => SurfaceKind::Fullscreen,
        }
    }

    fn panel_mut(&mut self, surface: SurfaceKind) -> &mut Option<ErrorPanel> {
        match surface {
            SurfaceKind::Inline => &mut self.inline_error,
            SurfaceKind::Fullscreen => &mut self.fullscreen_error,
        }
    }

    pub fn error_panel(&self, surface: SurfaceKind) -> Option<&ErrorPanel> {
        match surface {
            SurfaceKind::Inline => self.inline_error.as_ref(),
            SurfaceKind::Fullscreen => self.fullscreen_error.as_ref(),
        }
    }

    /// Initial render into the inline surface.
    pub fn mount(&mut self) -> Option<PendingRender> {
        self.engine.sync(&self.diagram, SurfaceKind::Inline)
    }

    /// Replaces the description and re-renders the active surface if it changed.
    ///
    /// A description edited while fullscreen reaches the inline surface when the overlay closes.
    pub fn set_diagram(&mut self, diagram: impl Into<String>) -> Option<PendingRender> {
        self.diagram = diagram.into();
        let surface = self.active_surface();
        let pending = self.engine.sync(&self.diagram, surface);
        if pending.is_some() {
            tracing::trace!(%surface, "diagram description changed");
        }
        pending
    }

    /// Click on the inline preview: opens the overlay and renders into it from scratch.
    pub fn activate_inline(&mut self) -> Option<PendingRender> {
        if !self.viewport.enter_fullscreen() {
            return None;
        }
        self.fullscreen_error = None;
        self.engine.abandon(SurfaceKind::Fullscreen);
        self.engine.dispatch(&self.diagram, SurfaceKind::Fullscreen)
    }

    pub fn handle_inline_key(&mut self, key: Key) -> Option<PendingRender> {
        if self.viewport.is_fullscreen() || !key.activates() {
            return None;
        }
        self.activate_inline()
    }

    /// Closes the overlay. Any fullscreen compile still in flight is abandoned.
    ///
    /// The inline surface only renders again if the description changed meanwhile or it is
    /// empty.
    pub fn close_fullscreen(&mut self, reason: CloseReason) -> Option<PendingRender> {
        if !self.viewport.exit_fullscreen(reason) {
            return None;
        }
        self.engine.abandon(SurfaceKind::Fullscreen);
        self.fullscreen_error = None;
        self.engine.sync(&self.diagram, SurfaceKind::Inline)
    }

    pub fn handle_overlay_key(&mut self, key: Key) -> Option<PendingRender> {
        match key {
            Key::Escape => self.close_fullscreen(CloseReason::CancelKey),
            _ => None,
        }
    }

    /// Installs a finished compile, updates the surface's error panel and runs the host callback.
    pub fn resolve(&mut self, completed: CompletedRender) -> Resolution {
        let (resolution, notification) = self.resolve_deferred(completed);
        if let Some(notification) = notification {
            notification.fire();
        }
        resolution
    }

    /// Like [`DiagramView::resolve`], but leaves the host callback to the caller.
    pub fn resolve_deferred(
        &mut self,
        completed: CompletedRender,
    ) -> (Resolution, Option<Notification>) {
        let surface = completed.surface();
        let (resolution, notification) = self.engine.resolve_deferred(completed);
        match &resolution {
            Resolution::Rendered => *self.panel_mut(surface) = None,
            Resolution::Failed(info) => {
                *self.panel_mut(surface) = Some(ErrorPanel::new(info.clone()));
            }
            Resolution::Stale => {}
        }
        (resolution, notification)
    }

    /// Explicit retry of the last description on `surface`. Hidden surfaces are not retried.
    pub fn retry(&mut self, surface: SurfaceKind) -> Option<PendingRender> {
        if surface != self.active_surface() {
            return None;
        }
        self.engine.retry(surface)
    }

    pub fn toggle_error_details(&mut self, surface: SurfaceKind) -> Option<bool> {
        self.panel_mut(surface).as_mut().map(ErrorPanel::toggle_details)
    }

    pub fn error_card(&self, surface: SurfaceKind) -> Option<ErrorCard> {
        self.error_panel(surface).map(ErrorPanel::card)
    }

    pub fn error_card_in(&self, surface: SurfaceKind, offset: &FixedOffset) -> Option<ErrorCard> {
        self.error_panel(surface).map(|panel| panel.card_in(offset))
    }

    pub fn surface_view(&self, surface: SurfaceKind) -> SurfaceView<'_> {
        if let Some(panel) = self.error_panel(surface) {
            return SurfaceView::Failed(panel);
        }
        if let Some(visual) = self.engine.visual(surface) {
            return SurfaceView::Rendered(visual);
        }
        if self.engine.is_pending(surface) {
            return SurfaceView::Loading;
        }
        SurfaceView::Empty
    }

    /// Pan/zoom input is accepted only while a fullscreen visual is mounted.
    pub fn is_interactive(&self) -> bool {
        self.viewport.is_fullscreen()
            && self.fullscreen_error.is_none()
            && self.engine.visual(SurfaceKind::Fullscreen).is_some()
    }

    pub fn pointer_down(&mut self, at: Point, target: PointerTarget) -> Option<InteractionMode> {
        if !self.is_interactive() {
            return None;
        }
        Some(self.viewport.pointer_down(at, target))
    }

    pub fn pointer_move(&mut self, at: Point) -> Option<Applied> {
        if !self.is_interactive() {
            return None;
        }
        self.viewport.pointer_move(at)
    }

    /// Always forwarded, so a drag never outlives the visual it started on.
    pub fn pointer_up(&mut self) -> Option<ViewportState> {
        self.viewport.pointer_up()
    }

    pub fn pointer_leave(&mut self) -> Option<ViewportState> {
        self.viewport.pointer_up()
    }

    pub fn wheel(&mut self, delta_y: f64) -> WheelOutcome {
        if !self.is_interactive() {
            return WheelOutcome {
                applied: None,
                consumed: false,
            };
        }
        self.viewport.wheel(delta_y)
    }

    pub fn zoom_in(&mut self) -> Option<ViewTransform> {
        if !self.is_interactive() {
            return None;
        }
        self.viewport.zoom_in()
    }

    pub fn zoom_out(&mut self) -> Option<ViewTransform> {
        if !self.is_interactive() {
            return None;
        }
        self.viewport.zoom_out()
    }

    pub fn reset_view(&mut self) -> Option<ViewTransform> {
        if !self.is_interactive() {
            return None;
        }
        self.viewport.reset()
    }

    pub fn on_animation_frame(&mut self) -> Option<ViewportState> {
        self.viewport.on_animation_frame()
    }

    pub fn overlay(&self) -> Option<Overlay<'_>> {
        if !self.viewport.is_fullscreen() {
            return None;
        }
        Some(Overlay {
            surface: self.surface_view(SurfaceKind::Fullscreen),
            interactive: self.is_interactive(),
            transform_css: self.viewport.transform().to_css(),
            transition_css: self.viewport.transition_css(),
            cursor: self.viewport.cursor(),
            zoom_label: self.viewport.zoom_label(),
        })
    }
}
