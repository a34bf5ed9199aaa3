//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// Single pass: substituted values are never scanned again, and unknown
/// placeholders (or stray braces, e.g. JSON examples) are copied verbatim.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    let key_end = after.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'));
    match key_end {
      Some(end) if end > 0 && after[end..].starts_with('}') => {
        let key = &after[..end];
        match pairs.iter().find(|(k, _)| *k == key) {
          Some((_, v)) => out.push_str(v),
          None => {
            out.push('{');
            out.push_str(key);
            out.push('}');
          }
        }
        rest = &after[end + 1..];
      }
      _ => {
        out.push('{');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

/// Models like to wrap JSON in ```json fences even in JSON mode.
/// Returns the inner text when the whole payload is a single fenced block.
pub fn strip_code_fence(s: &str) -> &str {
  let t = s.trim();
  if !t.starts_with("```") || !t.ends_with("```") || t.len() < 6 {
    return t;
  }
  let inner = &t[3..t.len() - 3];
  // Drop the info string (e.g. "json") on the opening line.
  match inner.find('\n') {
    Some(nl) => inner[nl + 1..].trim(),
    None => inner.trim(),
  }
}

/// `Some(trimmed)` when the value has visible content.
pub fn non_blank(s: Option<&str>) -> Option<&str> {
  s.map(str::trim).filter(|t| !t.is_empty())
}
