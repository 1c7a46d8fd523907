//! Reference rewriting for queued payloads and cached entities
//!
//! When a temporary id (entity or asset) is resolved, anything still
//! holding the temporary value is patched in place: exact string values in
//! JSON documents and exact segments in target paths. Partial matches are
//! never touched, so `temp_1` does not rewrite `temp_10`.

use serde_json::Value;

/// Replace every string equal to `from` with `to`, returning the count
pub fn replace_json_value(value: &mut Value, from: &str, to: &Value) -> usize {
    match value {
        Value::String(s) if s == from => {
            *value = to.clone();
            1
        }
        Value::Array(items) => items
            .iter_mut()
            .map(|item| replace_json_value(item, from, to))
            .sum(),
        Value::Object(map) => map
            .values_mut()
            .map(|item| replace_json_value(item, from, to))
            .sum(),
        _ => 0,
    }
}

/// Patch a serialized JSON payload; `None` if it is not JSON or nothing matched
pub fn patch_payload(payload: &[u8], from: &str, to: &Value) -> Option<Vec<u8>> {
    let mut json: Value = serde_json::from_slice(payload).ok()?;
    if replace_json_value(&mut json, from, to) == 0 {
        return None;
    }
    serde_json::to_vec(&json).ok()
}

/// Rewrite path segments equal to `from`; `None` if nothing matched
pub fn rewrite_path(path: &str, from: &str, to: &str) -> Option<String> {
    let (route, query) = match path.split_once('?') {
        Some((route, query)) => (route, Some(query)),
        None => (path, None),
    };

    let mut changed = false;
    let segments: Vec<&str> = route
        .split('/')
        .map(|segment| {
            if segment == from {
                changed = true;
                to
            } else {
                segment
            }
        })
        .collect();

    if !changed {
        return None;
    }

    let mut rewritten = segments.join("/");
    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    Some(rewritten)
}

/// Render a JSON id as a store key (`42` and `"42"` both become `42`)
pub fn id_to_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
