//! Frontmatter block handling
//!
//! A frontmatter block is recognized only when the file starts with a `---`
//! fence at offset 0, closed by a `---` or `...` line. The YAML inside maps
//! to JSON values; anything YAML can say that JSON cannot (tagged values,
//! non-string keys) is flattened on the way through.

use serde_json::{Map, Number, Value};

use super::inline::normalize_tag;

/// Split a note into (frontmatter source, body).
///
/// Returns `(None, source)` when no opening fence sits at offset 0, and
/// `(None, source)` when an opening fence is never closed (the whole file is
/// then treated as body, matching how editors render it).
pub fn split_frontmatter(source: &str) -> (Option<&str>, &str) {
    let rest = match source.strip_prefix("---") {
        Some(rest) => rest,
        None => return (None, source),
    };
    // The fence must be the entire first line.
    let after_fence = match rest.strip_prefix('\n') {
        Some(r) => r,
        None => match rest.strip_prefix("\r\n") {
            Some(r) => r,
            None => return (None, source),
        },
    };

    let mut offset = 0;
    for line in after_fence.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "---" || trimmed == "..." {
            let fm = &after_fence[..offset];
            let body = &after_fence[offset + line.len()..];
            return (Some(fm), body);
        }
        offset += line.len();
    }
    (None, source)
}

/// Parse frontmatter YAML into a JSON object map.
///
/// Non-mapping documents (a bare scalar or list) are rejected: frontmatter
/// is by contract a mapping from string keys to values.
pub fn parse_frontmatter(source: &str) -> std::result::Result<Map<String, Value>, String> {
    if source.trim().is_empty() {
        return Ok(Map::new());
    }
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(source).map_err(|e| e.to_string())?;
    match yaml {
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = yaml_key_to_string(&key);
                map.insert(key, yaml_to_json(value));
            }
            Ok(map)
        }
        serde_yaml::Value::Null => Ok(Map::new()),
        other => Err(format!(
            "expected a mapping, got {}",
            yaml_type_name(&other)
        )),
    }
}

/// Extract tags from the frontmatter `tags` field: a list of scalars or a
/// comma-separated string. Normalized; empties dropped; order preserved.
pub fn frontmatter_tags(frontmatter: &Map<String, Value>) -> Vec<String> {
    let mut tags = Vec::new();
    match frontmatter.get("tags") {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(s) = scalar_to_string(item) {
                    push_tag(&mut tags, &s);
                }
            }
        }
        Some(Value::String(s)) => {
            for part in s.split(',') {
                push_tag(&mut tags, part);
            }
        }
        _ => {}
    }
    tags
}

fn push_tag(tags: &mut Vec<String>, raw: &str) {
    if let Some(tag) = normalize_tag(raw) {
        tags.push(tag);
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else if let Some(f) = n.as_f64() {
                Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                map.insert(yaml_key_to_string(&key), yaml_to_json(value));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a bool",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a list",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// Re-serialize a frontmatter map to a fenced YAML block. Inverse of the
/// parse direction, used by rules that rewrite frontmatter in place.
pub fn render_frontmatter(frontmatter: &Map<String, Value>) -> String {
    if frontmatter.is_empty() {
        return String::new();
    }
    // Map<String, Value> serializes cleanly through serde_yaml.
    let yaml = serde_yaml::to_string(frontmatter).unwrap_or_default();
    format!("---\n{}---\n", yaml)
}

/// Replace (or insert) the frontmatter block of a note, leaving the body
/// byte-identical.
pub fn replace_frontmatter(source: &str, frontmatter: &Map<String, Value>) -> String {
    let (_, body) = split_frontmatter(source);
    let block = render_frontmatter(frontmatter);
    if block.is_empty() {
        body.to_string()
    } else {
        format!("{}{}", block, body)
    }
}
