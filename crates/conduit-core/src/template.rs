//! `{{key}}` placeholder rendering against execution data.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
            .expect("placeholder pattern compiles")
    })
}

/// Look up a dotted path (`lead.address.city`, `items.0`) in `data`.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Plain-text form of a value: strings unquoted, null empty, others as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every placeholder in `template`. Missing keys render empty.
pub fn render_str(template: &str, data: &Value) -> String {
    placeholder()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup(data, &caps[1]).map(display_value).unwrap_or_default()
        })
        .into_owned()
}

/// Render every string inside a JSON value.
///
/// A string consisting of exactly one placeholder is replaced by the typed
/// value it refers to, so `"{{amount}}"` stays a number.
pub fn render_value(value: &Value, data: &Value) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = placeholder().captures(s) {
                if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
                    return lookup(data, &caps[1]).cloned().unwrap_or(Value::Null);
                }
            }
            Value::String(render_str(s, data))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, data)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Placeholder keys referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_and_missing_keys() {
        let data = json!({ "lead": { "name": "Ada", "tags": ["vip"] }, "score": 82 });
        assert_eq!(
            render_str("{{lead.name}} scored {{score}} ({{lead.tags.0}})", &data),
            "Ada scored 82 (vip)"
        );
        assert_eq!(render_str("hi {{nobody}}!", &data), "hi !");
    }

    #[test]
    fn single_placeholder_keeps_type() {
        let data = json!({ "amount": 12.5, "who": "ops" });
        let rendered = render_value(
            &json!({ "total": "{{amount}}", "note": "for {{who}}", "raw": true }),
            &data,
        );
        assert_eq!(rendered, json!({ "total": 12.5, "note": "for ops", "raw": true }));
    }

    #[test]
    fn lists_placeholders() {
        assert_eq!(
            placeholders("{{a}} and {{ b.c }}"),
            vec!["a".to_string(), "b.c".to_string()]
        );
    }
}
