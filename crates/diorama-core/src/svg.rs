//! Helpers for compiled SVG documents: root element ids and surface sizing.

use std::cell::Cell;

use indexmap::IndexMap;
use lol_html::{RewriteStrSettings, element, rewrite_str};
use uuid::Uuid;

use crate::model::Sizing;

const FALLBACK_ID: &str = "diagram";

/// Normalizes `raw` into a token usable as the start of an SVG `id`.
///
/// Unsupported characters become `-`, runs of `-` collapse, leading and trailing `-` are dropped
/// and a token that does not start with a letter gets a `d-` prefix.
pub fn id_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for ch in raw.trim().chars() {
        let keep = ch.is_ascii_alphanumeric() || matches!(ch, '_' | ':' | '.');
        if keep {
            out.push(ch);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        return FALLBACK_ID.to_string();
    }
    if !out.starts_with(|c: char| c.is_ascii_alphabetic()) {
        out.insert_str(0, "d-");
    }
    out
}

/// Root element id for one render.
///
/// The compiler derives marker and title ids from the root id, so every render gets a fresh
/// `nonce` or inlined documents start sharing `<defs>`.
pub fn render_id(prefix: &str, nonce: &Uuid) -> String {
    format!("{}-{}", id_token(prefix), nonce.simple())
}

fn parse_style(style: &str) -> IndexMap<String, String> {
    style
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            (!prop.is_empty()).then(|| (prop, value.trim().to_string()))
        })
        .collect()
}

/// Merges the sizing declarations into an existing `style` value. Sizing wins on conflicts;
/// other declarations keep their order.
pub fn sized_style(existing: Option<&str>, sizing: Sizing) -> String {
    let mut decls = existing.map(parse_style).unwrap_or_default();
    for (prop, value) in sizing.style_declarations() {
        decls.insert((*prop).to_string(), (*value).to_string());
    }
    decls
        .iter()
        .map(|(prop, value)| format!("{prop}: {value};"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Upserts the sizing declarations into the root `<svg>` element's `style` attribute.
///
/// Nested `<svg>` elements are left alone. Documents without an `<svg>` element, and documents
/// the rewriter cannot parse, are returned unchanged.
pub fn apply_surface_sizing(svg: &str, sizing: Sizing) -> String {
    let seen_root = Cell::new(false);
    let settings = RewriteStrSettings {
        element_content_handlers: vec![element!("svg", |el| {
            if seen_root.replace(true) {
                return Ok(());
            }
            let style = sized_style(el.get_attribute("style").as_deref(), sizing);
            el.set_attribute("style", &style)?;
            Ok(())
        })],
        ..RewriteStrSettings::new()
    };

    match rewrite_str(svg, settings) {
        Ok(out) => out,
        Err(err) => {
            tracing::warn!(error = %err, "could not apply surface sizing; keeping compiler output");
            svg.to_string()
        }
    }
}
