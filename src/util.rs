//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings (char boundary aware).
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) { end -= 1; }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// Longest encoded id used verbatim as a file stem.
const MAX_ENCODED_ID: usize = 200;

/// Turn a learner id into a file stem. Distinct ids give distinct stems:
/// ASCII letters, digits and `-` are kept and every other byte becomes `_XX`
/// (hex). Ids whose encoding would be too long for a file name are named by
/// their UUIDv5 instead, prefixed with `~`, which the escaped form never uses.
pub fn encode_id(id: &str) -> String {
  let mut out = String::with_capacity(id.len());
  for b in id.bytes() {
    if b.is_ascii_alphanumeric() || b == b'-' {
      out.push(b as char);
    } else {
      out.push_str(&format!("_{b:02X}"));
    }
  }
  if out.len() > MAX_ENCODED_ID {
    return format!("~{}", uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, id.as_bytes()).simple());
  }
  out
}
