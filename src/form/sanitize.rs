//! Sanitization of form-builder text: labels and descriptions arrive from
//! an untrusted rich widget and may carry injected HTML.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum stored length for labels, descriptions and choice text.
pub const MAX_TEXT_LEN: usize = 255;

/// Any markup tag, including unterminated fragments at end of input.
static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>?").expect("invalid markup regex"));

/// An HTML character reference: named or numeric.
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x?[0-9a-fA-F]+|[a-zA-Z]+);").expect("invalid entity regex"));

/// Remove all markup from `text`, keeping the contained content.
pub fn strip_markup(text: &str) -> String {
    MARKUP.replace_all(text, "").into_owned()
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Decode HTML character references. Unknown references pass through
/// unchanged, matching the leniency of the original widget data.
pub fn unescape_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            decode_entity(body).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(body: &str) -> Option<String> {
    let named = match body {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => None,
    };
    if let Some(c) = named {
        return Some(c.to_string());
    }
    let code = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(dec) = body.strip_prefix('#') {
        dec.parse::<u32>().ok()?
    } else {
        return None;
    };
    char::from_u32(code).map(|c| c.to_string())
}

/// Full cleanup for form-builder text: strip markup, cap the length,
/// then decode character references the widget escaped.
pub fn clean_text(text: &str) -> String {
    unescape_entities(&truncate_chars(&strip_markup(text), MAX_TEXT_LEN))
}
