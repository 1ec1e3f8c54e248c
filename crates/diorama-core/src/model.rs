use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::classify::ErrorInfo;
use crate::config::ConfigMap;

/// The two independent rendering surfaces of a diagram view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Inline,
    Fullscreen,
}

impl SurfaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Fullscreen => "fullscreen",
        }
    }

    pub fn sizing(self) -> Sizing {
        match self {
            Self::Inline => Sizing::WidthConstrained,
            Self::Fullscreen => Sizing::Fill,
        }
    }
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a compiled visual is sized inside its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sizing {
    /// Never wider than the container; height follows the aspect ratio.
    WidthConstrained,
    /// Fills both axes, with transforms anchored at the center.
    Fill,
}

impl Sizing {
    pub fn style_declarations(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::WidthConstrained => &[("max-width", "100%"), ("height", "auto")],
            Self::Fill => &[
                ("width", "100%"),
                ("height", "100%"),
                ("max-width", "none"),
                ("transform-origin", "center"),
            ],
        }
    }
}

/// Monotonic per-engine request identifier. Later dispatches always carry larger tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An immutable render request. Superseded by the next request, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramRequest {
    pub description: Rc<str>,
    pub target: SurfaceKind,
    pub render_options: Rc<ConfigMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Pending,
    Success,
    Failed,
}

/// A compiled visual installed in a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedVisual {
    pub diagram_id: String,
    /// SVG markup with the surface sizing applied to its root element.
    pub svg: String,
    pub sizing: Sizing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub request_id: RequestToken,
    pub status: RenderStatus,
    pub visual: Option<MountedVisual>,
    pub error: Option<ErrorInfo>,
}

impl RenderOutcome {
    pub(crate) fn pending(request_id: RequestToken) -> Self {
        Self {
            request_id,
            status: RenderStatus::Pending,
            visual: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RenderStatus::Pending
    }
}
