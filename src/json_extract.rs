//! Pulls JSON out of free-text model replies.
//!
//! Models wrap JSON in prose or markdown fences. These helpers only locate the
//! first balanced `{...}` / `[...]` span; callers still parse it strictly.

pub fn extract_json_object(raw: &str) -> Option<&str> {
    extract_balanced(raw, '{', '}')
}

pub fn extract_json_array(raw: &str) -> Option<&str> {
    extract_balanced(raw, '[', ']')
}

fn extract_balanced(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
