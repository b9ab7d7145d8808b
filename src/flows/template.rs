//! Placeholder substitution for step content.
//!
//! Supports `{name}` and `{{name}}`. Lookup checks collected variables first,
//! then the session context. An unresolved placeholder renders as an empty
//! string. Braces that do not enclose a valid name are copied verbatim.

use crate::values::Variables;
use tracing::debug;

/// Output of a render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Placeholder names that had no value.
    pub unresolved: Vec<String>,
}

/// Substitute placeholders in `template`.
pub fn render(template: &str, variables: &Variables, context: &Variables) -> Rendered {
    let mut out = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];

        match placeholder(after) {
            Some((name, consumed)) => {
                match variables.get(name).or_else(|| context.get(name)) {
                    Some(value) => out.push_str(&value.as_text()),
                    None => unresolved.push(name.to_string()),
                }
                rest = &after[consumed..];
            }
            None => {
                out.push('{');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);

    if !unresolved.is_empty() {
        debug!(placeholders = ?unresolved, "unresolved template placeholders");
    }

    Rendered {
        text: out,
        unresolved,
    }
}

/// Parse a placeholder at the start of `s` (which begins with `{`).
///
/// Returns the trimmed name and the number of bytes consumed.
fn placeholder(s: &str) -> Option<(&str, usize)> {
    let double = s.starts_with("{{");
    let (open, close) = if double { ("{{", "}}") } else { ("{", "}") };

    let body_start = open.len();
    let body_len = s[body_start..].find(close)?;
    let body = &s[body_start..body_start + body_len];
    let name = body.trim();

    if !is_name(name) {
        return None;
    }
    Some((name, body_start + body_len + close.len()))
}

fn is_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
