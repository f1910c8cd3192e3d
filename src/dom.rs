//! DOM text helpers and the small scripts injected into pages.

use crate::types::ScrollDirection;

pub const PERCEPTION_DOM_MAX_CHARS: usize = 5000;
pub const PLANNER_DOM_MAX_CHARS: usize = 3000;
pub const DEFAULT_SCROLL_PIXELS: i64 = 500;

/// Cut `dom` to at most `max_chars` characters, never splitting a code point.
pub fn dom_excerpt(dom: &str, max_chars: usize) -> &str {
    match dom.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &dom[..byte_idx],
        None => dom,
    }
}

/// JSON string literals are valid JS string literals, so selectors and
/// values are embedded through serde_json rather than hand escaping.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Sets a `<select>` value and fires `change`. Evaluates to `true` only when
/// the element exists and the value took.
pub fn select_option_js(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.value = {val};
  if (el.value !== {val}) return false;
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#,
        sel = js_string(selector),
        val = js_string(value),
    )
}

/// Empties an input so the following keystrokes replace its content.
pub fn clear_field_js(selector: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.value = '';
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  return true;
}})()"#,
        sel = js_string(selector),
    )
}

pub fn scroll_js(direction: ScrollDirection, amount: Option<i64>) -> String {
    let pixels = amount.unwrap_or(DEFAULT_SCROLL_PIXELS).abs();
    let (dx, dy) = match direction {
        ScrollDirection::Up => (0, -pixels),
        ScrollDirection::Down => (0, pixels),
        ScrollDirection::Left => (-pixels, 0),
        ScrollDirection::Right => (pixels, 0),
    };
    format!("window.scrollBy({dx}, {dy}); true")
}

/// Evaluates to `[width, height]` of the whole document.
pub const PAGE_SIZE_JS: &str = r#"JSON.stringify([
  Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0),
  Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)
])"#;
