//! Recoverable error card for a failed surface.

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use serde::Serialize;

use diorama_core::ErrorInfo;

pub const EDIT_HINT: &str = "Edit the diagram source to try again.";
pub const SHOW_DETAILS: &str = "Show details";
pub const HIDE_DETAILS: &str = "Hide details";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp_in<Tz>(timestamp: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    timestamp
        .with_timezone(tz)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Formats in the viewer's local offset.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    format_timestamp_in(timestamp, &Local)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub technical_message: String,
    pub timestamp: String,
}

/// What the host paints for a failed surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCard {
    pub message: String,
    pub hint: &'static str,
    pub toggle_label: &'static str,
    /// Present only while details are expanded.
    pub details: Option<ErrorDetails>,
}

/// An [`ErrorInfo`] plus the collapsed/expanded detail toggle.
///
/// A new panel is built for every failed resolution, so the toggle starts collapsed for each
/// new error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPanel {
    info: ErrorInfo,
    details_expanded: bool,
}

impl ErrorPanel {
    pub fn new(info: ErrorInfo) -> Self {
        Self {
            info,
            details_expanded: false,
        }
    }

    pub fn info(&self) -> &ErrorInfo {
        &self.info
    }

    pub fn details_expanded(&self) -> bool {
        self.details_expanded
    }

    /// Flips the detail toggle and returns the new state.
    pub fn toggle_details(&mut self) -> bool {
        self.details_expanded = !self.details_expanded;
        self.details_expanded
    }

    pub fn card(&self) -> ErrorCard {
        self.build_card(format_timestamp)
    }

    /// Like [`ErrorPanel::card`], with timestamps rendered at a fixed offset.
    pub fn card_in(&self, offset: &FixedOffset) -> ErrorCard {
        self.build_card(|ts| format_timestamp_in(ts, offset))
    }

    fn build_card(&self, fmt_ts: impl FnOnce(DateTime<Utc>) -> String) -> ErrorCard {
        let details = self.details_expanded.then(|| ErrorDetails {
            technical_message: self.info.technical_message.clone(),
            timestamp: fmt_ts(self.info.timestamp),
        });
        ErrorCard {
            message: self.info.user_message.clone(),
            hint: EDIT_HINT,
            toggle_label: if self.details_expanded {
                HIDE_DETAILS
            } else {
                SHOW_DETAILS
            },
            details,
        }
    }
}
