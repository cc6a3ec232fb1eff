//! Step input templates
//!
//! String values may contain `{{ context.<path> }}` or
//! `{{ steps.<step>.output.<path> }}` placeholders. A string that is exactly
//! one placeholder is replaced by the referenced JSON value, keeping its type;
//! placeholders embedded in longer strings are interpolated as text.
//! Object keys are never templated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern"));

static SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("segment pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("invalid placeholder '{{{{ {0} }}}}': {1}")]
    Syntax(String, String),

    #[error("placeholder '{{{{ {0} }}}}' did not resolve to a value")]
    Unresolved(String),
}

/// Where a placeholder points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    Context { path: Vec<String> },
    StepOutput { step: String, path: Vec<String> },
}

/// Values placeholders resolve against
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    pub context: &'a JsonValue,
    pub step_outputs: &'a HashMap<String, JsonValue>,
}

/// Collect every placeholder in `template`, failing on malformed ones
pub fn template_references(template: &JsonValue) -> Result<Vec<TemplateRef>, TemplateError> {
    let mut refs = Vec::new();
    collect_refs(template, &mut refs)?;
    Ok(refs)
}

fn collect_refs(value: &JsonValue, refs: &mut Vec<TemplateRef>) -> Result<(), TemplateError> {
    match value {
        JsonValue::String(s) => {
            for caps in PLACEHOLDER.captures_iter(s) {
                refs.push(parse_expression(&caps[1])?);
            }
            Ok(())
        }
        JsonValue::Array(items) => items.iter().try_for_each(|item| collect_refs(item, refs)),
        JsonValue::Object(map) => map.values().try_for_each(|item| collect_refs(item, refs)),
        _ => Ok(()),
    }
}

fn parse_expression(expr: &str) -> Result<TemplateRef, TemplateError> {
    let segments: Vec<&str> = expr.split('.').collect();
    if let Some(bad) = segments.iter().find(|s| !SEGMENT.is_match(s)) {
        return Err(TemplateError::Syntax(expr.to_string(), format!("invalid path segment '{}'", bad)));
    }

    match segments.as_slice() {
        ["context", path @ ..] => Ok(TemplateRef::Context { path: owned(path) }),
        ["steps", step, "output", path @ ..] => {
            Ok(TemplateRef::StepOutput { step: step.to_string(), path: owned(path) })
        }
        _ => Err(TemplateError::Syntax(
            expr.to_string(),
            "expected context.<path> or steps.<step>.output.<path>".to_string(),
        )),
    }
}

fn owned(path: &[&str]) -> Vec<String> {
    path.iter().map(|s| s.to_string()).collect()
}

/// Render `template`, resolving every placeholder against `scope`
pub fn render_template(template: &JsonValue, scope: &TemplateScope<'_>) -> Result<JsonValue, TemplateError> {
    match template {
        JsonValue::String(s) => render_string(s, scope),
        JsonValue::Array(items) => Ok(JsonValue::Array(
            items.iter().map(|item| render_template(item, scope)).collect::<Result<_, _>>()?,
        )),
        JsonValue::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render_template(value, scope)?);
            }
            Ok(JsonValue::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(s: &str, scope: &TemplateScope<'_>) -> Result<JsonValue, TemplateError> {
    // Whole-string placeholder keeps the referenced value's type
    if let Some(caps) = PLACEHOLDER.captures(s) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
            return lookup(&caps[1], scope).cloned();
        }
    } else {
        return Ok(JsonValue::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&s[last..whole.start()]);
        match lookup(&caps[1], scope)? {
            JsonValue::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(JsonValue::String(out))
}

fn lookup<'a>(expr: &str, scope: &TemplateScope<'a>) -> Result<&'a JsonValue, TemplateError> {
    let (root, path) = match parse_expression(expr)? {
        TemplateRef::Context { path } => (scope.context, path),
        TemplateRef::StepOutput { step, path } => (
            scope
                .step_outputs
                .get(&step)
                .ok_or_else(|| TemplateError::Unresolved(expr.to_string()))?,
            path,
        ),
    };

    let mut current = root;
    for segment in &path {
        current = match current {
            JsonValue::Object(map) => map.get(segment.as_str()),
            JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| TemplateError::Unresolved(expr.to_string()))?;
    }
    Ok(current)
}
