//! Inline ⇄ fullscreen state machine with pan/zoom for the fullscreen overlay.
//!
//! Two tiers of state are kept:
//!
//! - the *live* transform, updated on every pointer/wheel event and returned to the caller so
//!   it can be applied to the visual in the same event-loop turn;
//! - the *published* [`ViewportState`], which observers read. Continuous input (drag, wheel)
//!   only marks it dirty; it is refreshed at most once per animation frame through
//!   [`ViewportController::on_animation_frame`]. Discrete actions (mode changes, zoom buttons,
//!   reset, pointer release) publish immediately, so the final position of a drag is never lost.

use serde::{Deserialize, Serialize};

use crate::geom::{Point, Vector, css_number, vector};

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 5.0;
pub const ZOOM_STEP: f64 = 0.1;
pub const WHEEL_ZOOM_FACTOR: f64 = 0.001;
pub const TRANSFORM_TRANSITION: &str = "transform 0.1s ease-out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Inline,
    Fullscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionMode {
    #[default]
    Idle,
    Dragging,
    TextSelecting,
}

/// What a pointer press landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerTarget {
    /// Label text; pressing here starts native text selection instead of a drag.
    Text,
    Graphic,
}

impl PointerTarget {
    /// Classifies an element by tag name. SVG text nodes and the HTML spans the compiler uses
    /// for labels count as text.
    pub fn from_tag_name(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "text" | "tspan" | "textpath" | "span" | "p" => Self::Text,
            _ => Self::Graphic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    CloseButton,
    OutsideDismiss,
    CancelKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Space,
    Escape,
    Other,
}

impl Key {
    /// Maps a DOM `KeyboardEvent.key` value.
    pub fn from_dom_key(key: &str) -> Self {
        match key {
            "Enter" => Self::Enter,
            " " | "Spacebar" => Self::Space,
            "Escape" | "Esc" => Self::Escape,
            _ => Self::Other,
        }
    }

    pub fn activates(self) -> bool {
        matches!(self, Self::Enter | Self::Space)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub scale: f64,
    pub offset: Vector,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ViewTransform {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset: Vector::new(0.0, 0.0),
    };

    pub fn to_css(&self) -> String {
        format!(
            "translate({}px, {}px) scale({})",
            css_number(self.offset.x),
            css_number(self.offset.y),
            css_number(self.scale)
        )
    }
}

/// Observable viewport snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub mode: ViewMode,
    pub scale: f64,
    pub offset: Vector,
    pub interaction: InteractionMode,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            mode: ViewMode::Inline,
            scale: 1.0,
            offset: vector(0.0, 0.0),
            interaction: InteractionMode::Idle,
        }
    }
}

/// Result of an input event that moved the visual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    /// Apply this to the visual now.
    pub transform: ViewTransform,
    /// Schedule an animation frame and call [`ViewportController::on_animation_frame`] from it.
    pub request_frame: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelOutcome {
    pub applied: Option<Applied>,
    /// The host must stop the event from scrolling the page.
    pub consumed: bool,
}

pub fn clamp_scale(scale: f64) -> f64 {
    if scale.is_nan() {
        return 1.0;
    }
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

#[derive(Debug, Clone)]
pub struct ViewportController {
    mode: ViewMode,
    live: ViewTransform,
    interaction: InteractionMode,
    last_pointer: Option<Point>,
    transition_enabled: bool,
    published: ViewportState,
    revision: u64,
    dirty: bool,
    frame_requested: bool,
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportController {
    pub fn new() -> Self {
        Self {
            mode: ViewMode::Inline,
            live: ViewTransform::IDENTITY,
            interaction: InteractionMode::Idle,
            last_pointer: None,
            transition_enabled: true,
            published: ViewportState::default(),
            revision: 0,
            dirty: false,
            frame_requested: false,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn is_fullscreen(&self) -> bool {
        self.mode == ViewMode::Fullscreen
    }

    pub fn interaction(&self) -> InteractionMode {
        self.interaction
    }

    /// The authoritative transform, including changes not yet published.
    pub fn transform(&self) -> ViewTransform {
        self.live
    }

    pub fn live_state(&self) -> ViewportState {
        ViewportState {
            mode: self.mode,
            scale: self.live.scale,
            offset: self.live.offset,
            interaction: self.interaction,
        }
    }

    /// The last published snapshot.
    pub fn snapshot(&self) -> ViewportState {
        self.published
    }

    /// Increments every time a new snapshot is published.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn publish(&mut self) -> ViewportState {
        self.published = self.live_state();
        self.revision += 1;
        self.dirty = false;
        self.published
    }

    fn mark_dirty(&mut self) -> Applied {
        self.dirty = true;
        let request_frame = !self.frame_requested;
        self.frame_requested = true;
        Applied {
            transform: self.live,
            request_frame,
        }
    }

    /// Starts a fresh overlay session. The host drops any frame it scheduled for the old one,
    /// so the next continuous change must ask for a new frame.
    fn reset_session(&mut self) {
        self.live = ViewTransform::IDENTITY;
        self.interaction = InteractionMode::Idle;
        self.last_pointer = None;
        self.transition_enabled = true;
        self.dirty = false;
        self.frame_requested = false;
    }

    /// `Inline → Fullscreen`. Returns `false` if already fullscreen.
    pub fn enter_fullscreen(&mut self) -> bool {
        if self.is_fullscreen() {
            return false;
        }
        self.mode = ViewMode::Fullscreen;
        self.reset_session();
        self.publish();
        tracing::debug!("viewport entered fullscreen");
        true
    }

    /// `Fullscreen → Inline`. Returns `false` if already inline.
    pub fn exit_fullscreen(&mut self, reason: CloseReason) -> bool {
        if !self.is_fullscreen() {
            return false;
        }
        self.mode = ViewMode::Inline;
        self.reset_session();
        self.publish();
        tracing::debug!(?reason, "viewport left fullscreen");
        true
    }

    pub fn pointer_down(&mut self, at: Point, target: PointerTarget) -> InteractionMode {
        if !self.is_fullscreen() {
            return self.interaction;
        }
        match target {
            PointerTarget::Text => {
                self.interaction = InteractionMode::TextSelecting;
                self.last_pointer = None;
            }
            PointerTarget::Graphic => {
                self.interaction = InteractionMode::Dragging;
                self.last_pointer = Some(at);
                self.transition_enabled = false;
            }
        }
        self.interaction
    }

    /// Pans by the pointer delta while dragging. Returns `None` when not dragging.
    pub fn pointer_move(&mut self, at: Point) -> Option<Applied> {
        if self.interaction != InteractionMode::Dragging {
            return None;
        }
        let last = self.last_pointer.replace(at)?;
        self.live.offset += at - last;
        Some(self.mark_dirty())
    }

    /// Ends a drag or text selection and publishes the final state.
    pub fn pointer_up(&mut self) -> Option<ViewportState> {
        if self.interaction == InteractionMode::Idle {
            return None;
        }
        self.interaction = InteractionMode::Idle;
        self.last_pointer = None;
        self.transition_enabled = true;
        Some(self.publish())
    }

    pub fn wheel(&mut self, delta_y: f64) -> WheelOutcome {
        if !self.is_fullscreen() {
            return WheelOutcome {
                applied: None,
                consumed: false,
            };
        }
        self.live.scale = clamp_scale(self.live.scale - delta_y * WHEEL_ZOOM_FACTOR);
        WheelOutcome {
            applied: Some(self.mark_dirty()),
            consumed: true,
        }
    }

    fn set_scale_now(&mut self, scale: f64) -> Option<ViewTransform> {
        if !self.is_fullscreen() {
            return None;
        }
        self.live.scale = clamp_scale(scale);
        self.publish();
        Some(self.live)
    }

    pub fn zoom_in(&mut self) -> Option<ViewTransform> {
        self.set_scale_now(self.live.scale + ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> Option<ViewTransform> {
        self.set_scale_now(self.live.scale - ZOOM_STEP)
    }

    pub fn reset(&mut self) -> Option<ViewTransform> {
        if !self.is_fullscreen() {
            return None;
        }
        self.live = ViewTransform::IDENTITY;
        self.publish();
        Some(self.live)
    }

    /// Publishes pending continuous changes. Call once per animation frame.
    pub fn on_animation_frame(&mut self) -> Option<ViewportState> {
        self.frame_requested = false;
        self.dirty.then(|| self.publish())
    }

    pub fn transition_css(&self) -> &'static str {
        if self.transition_enabled && self.interaction != InteractionMode::Dragging {
            TRANSFORM_TRANSITION
        } else {
            "none"
        }
    }

    pub fn cursor(&self) -> &'static str {
        match self.interaction {
            InteractionMode::Idle => "grab",
            InteractionMode::Dragging => "grabbing",
            InteractionMode::TextSelecting => "text",
        }
    }

    pub fn zoom_label(&self) -> String {
        format!("{:.0}%", self.live.scale * 100.0)
    }
}
