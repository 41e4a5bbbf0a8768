//! `${name}` substitution for Caddyfile templates
//!
//! `$$` renders a literal `$`. Caddy's own `{placeholder}` syntax has no
//! leading `$` and passes through untouched. A line that only held
//! placeholders which all rendered empty is dropped.

use std::collections::BTreeMap;

use crate::errors::RenderError;

pub type Vars = BTreeMap<String, String>;

/// Substitute every `${name}` in `template` from `vars`.
pub fn render(template: &str, vars: &Vars) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    for (index, line) in template.split_inclusive('\n').enumerate() {
        let (rendered, substituted) = render_line(line, vars)
            .map_err(|e| match e {
                RenderError::Malformed(msg) => {
                    RenderError::Malformed(format!("template line {}: {}", index + 1, msg))
                }
                other => other,
            })?;
        if substituted && rendered.trim().is_empty() {
            continue;
        }
        out.push_str(&rendered);
    }
    Ok(out)
}

fn render_line(line: &str, vars: &Vars) -> Result<(String, bool), RenderError> {
    let mut out = String::with_capacity(line.len());
    let mut substituted = false;
    let mut rest = line;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(tail) = after.strip_prefix('{') {
            let end = tail
                .find('}')
                .ok_or_else(|| RenderError::Malformed("unterminated '${'".to_string()))?;
            let name = &tail[..end];
            if !is_valid_name(name) {
                return Err(RenderError::Malformed(format!(
                    "invalid placeholder name '{}'",
                    name
                )));
            }
            let value = vars
                .get(name)
                .ok_or_else(|| RenderError::MissingVariable(name.to_string()))?;
            out.push_str(value);
            substituted = true;
            rest = &tail[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }
    out.push_str(rest);
    Ok((out, substituted))
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
